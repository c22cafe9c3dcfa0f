//! Per-channel fire/confirm/prime state machine.
//!
//! One [`RelayMachine`] guards one relay channel. Requests that break a
//! safety interlock come back as [`CommandRejected`] and leave the machine
//! unchanged. Accepted requests produce a new machine plus the actions the
//! client must carry out (status writes, countdown timer control, commands to
//! dispatch).
//!
//! ```text
//! ready ──fire──▶ timer ──3 ticks──▶ firing ─▶ fired ──prime──▶ ready
//!   │               │
//!   └─stage─▶ staged└─cancel──▶ ready
//! ```

use mesh_types::{Command, RelayId, RelayStatus};

use crate::CommandRejected;

/// Countdown length used when none is configured.
pub const DEFAULT_COUNTDOWN_TICKS: u32 = 3;

/// Requests and observations fed to a [`RelayMachine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelayEvent {
    /// Start the confirmation countdown.
    Fire {
        /// Delay passed through to `fire_relay`.
        delay: f64,
    },
    /// Fire without a countdown (sequence steps).
    FireNow {
        /// Delay passed through to `fire_relay`.
        delay: f64,
    },
    /// Abort a pending countdown.
    Cancel,
    /// One countdown tick elapsed.
    Tick,
    /// Re-arm a fired channel.
    Prime,
    /// Stage a ready channel.
    Stage,
    /// The store reports this status (inbound update or another writer).
    Observed(RelayStatus),
    /// A dispatched command could not be delivered.
    DispatchFailed(Revert),
}

/// How to roll back the optimistic status written with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revert {
    /// Status written alongside the command.
    pub optimistic: RelayStatus,
    /// Status the channel had before.
    pub previous: RelayStatus,
}

/// Instructions produced by a [`RelayMachine`].
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Write this status to the store.
    SetStatus(RelayStatus),
    /// Start ticking the countdown.
    StartCountdown {
        /// Number of ticks.
        ticks: u32,
    },
    /// The countdown advanced.
    CountdownTick {
        /// Ticks remaining.
        remaining: u32,
    },
    /// Stop the countdown timer.
    StopCountdown,
    /// Stamp `lastFiredAt` once the fire command is delivered.
    RecordFired,
    /// Send a command for this channel.
    Dispatch {
        /// Command to send.
        command: Command,
        /// Feed back as [`RelayEvent::DispatchFailed`] if sending fails.
        revert: Revert,
    },
}

/// State machine for one relay channel - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayMachine {
    id: RelayId,
    status: RelayStatus,
    countdown: Option<Countdown>,
    countdown_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Countdown {
    remaining: u32,
    delay: f64,
    from: RelayStatus,
}

impl RelayMachine {
    /// Create a machine for a channel currently in `status`.
    pub fn new(id: RelayId, status: RelayStatus) -> Self {
        Self {
            id,
            status,
            countdown: None,
            countdown_ticks: DEFAULT_COUNTDOWN_TICKS,
        }
    }

    /// Use a different countdown length (at least one tick).
    pub fn with_countdown_ticks(mut self, ticks: u32) -> Self {
        self.countdown_ticks = ticks.max(1);
        self
    }

    /// Current status as the machine sees it.
    pub fn status(&self) -> RelayStatus {
        self.status
    }

    /// Ticks left on the pending countdown, if any.
    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining)
    }

    /// Process an event and return the new machine plus actions to execute.
    pub fn on_event(self, event: RelayEvent) -> Result<(Self, Vec<RelayAction>), CommandRejected> {
        match event {
            RelayEvent::Fire { delay } => {
                self.check_can_fire()?;
                let next = Self {
                    status: RelayStatus::Timer,
                    countdown: Some(Countdown {
                        remaining: self.countdown_ticks,
                        delay,
                        from: self.status,
                    }),
                    ..self
                };
                Ok((
                    next,
                    vec![
                        RelayAction::SetStatus(RelayStatus::Timer),
                        RelayAction::StartCountdown {
                            ticks: self.countdown_ticks,
                        },
                    ],
                ))
            }

            RelayEvent::FireNow { delay } => {
                self.check_can_fire()?;
                Ok(self.fired(delay, self.status, Vec::new()))
            }

            RelayEvent::Cancel => match self.countdown {
                Some(_) => Ok((
                    Self {
                        status: RelayStatus::Ready,
                        countdown: None,
                        ..self
                    },
                    vec![
                        RelayAction::StopCountdown,
                        RelayAction::SetStatus(RelayStatus::Ready),
                    ],
                )),
                None => Ok((self, vec![])),
            },

            RelayEvent::Tick => match self.countdown {
                Some(c) if c.remaining > 1 => {
                    let remaining = c.remaining - 1;
                    Ok((
                        Self {
                            countdown: Some(Countdown { remaining, ..c }),
                            ..self
                        },
                        vec![RelayAction::CountdownTick { remaining }],
                    ))
                }
                Some(c) => Ok(Self {
                    countdown: None,
                    ..self
                }
                .fired(c.delay, c.from, vec![RelayAction::StopCountdown])),
                // Stale tick from an already-cancelled countdown
                None => Ok((self, vec![])),
            },

            RelayEvent::Prime => {
                if self.status != RelayStatus::Fired {
                    return Err(CommandRejected::NotFired {
                        status: self.status,
                    });
                }
                Ok((
                    Self {
                        status: RelayStatus::Ready,
                        ..self
                    },
                    vec![
                        RelayAction::SetStatus(RelayStatus::Ready),
                        RelayAction::Dispatch {
                            command: Command::PrimeRelay { id: self.id },
                            revert: Revert {
                                optimistic: RelayStatus::Ready,
                                previous: RelayStatus::Fired,
                            },
                        },
                    ],
                ))
            }

            RelayEvent::Stage => {
                if self.countdown.is_some() {
                    return Err(CommandRejected::CountdownPending);
                }
                if self.status != RelayStatus::Ready {
                    return Err(CommandRejected::NotReady {
                        status: self.status,
                    });
                }
                Ok((
                    Self {
                        status: RelayStatus::Staged,
                        ..self
                    },
                    vec![
                        RelayAction::SetStatus(RelayStatus::Staged),
                        RelayAction::Dispatch {
                            command: Command::StageRelay { id: self.id },
                            revert: Revert {
                                optimistic: RelayStatus::Staged,
                                previous: RelayStatus::Ready,
                            },
                        },
                    ],
                ))
            }

            RelayEvent::Observed(status) => {
                if status == self.status {
                    return Ok((self, vec![]));
                }
                // An authoritative status other than timer supersedes the countdown
                if self.countdown.is_some() && status != RelayStatus::Timer {
                    return Ok((
                        Self {
                            status,
                            countdown: None,
                            ..self
                        },
                        vec![RelayAction::StopCountdown],
                    ));
                }
                Ok((Self { status, ..self }, vec![]))
            }

            RelayEvent::DispatchFailed(revert) => {
                // Something newer replaced the optimistic status; it stands
                if self.status != revert.optimistic {
                    return Ok((self, vec![]));
                }
                Ok((
                    Self {
                        status: revert.previous,
                        countdown: None,
                        ..self
                    },
                    vec![RelayAction::SetStatus(revert.previous)],
                ))
            }
        }
    }

    fn check_can_fire(&self) -> Result<(), CommandRejected> {
        if self.status.is_fired() {
            return Err(CommandRejected::AlreadyFired {
                status: self.status,
            });
        }
        if self.countdown.is_some() || self.status == RelayStatus::Timer {
            return Err(CommandRejected::CountdownPending);
        }
        if self.status.is_unavailable() {
            return Err(CommandRejected::Unavailable {
                status: self.status,
            });
        }
        Ok(())
    }

    // firing -> fired is synchronous and optimistic
    fn fired(
        self,
        delay: f64,
        from: RelayStatus,
        mut actions: Vec<RelayAction>,
    ) -> (Self, Vec<RelayAction>) {
        actions.extend([
            RelayAction::SetStatus(RelayStatus::Firing),
            RelayAction::SetStatus(RelayStatus::Fired),
            RelayAction::RecordFired,
            RelayAction::Dispatch {
                command: Command::FireRelay { id: self.id, delay },
                revert: Revert {
                    optimistic: RelayStatus::Fired,
                    previous: from,
                },
            },
        ]);
        (
            Self {
                status: RelayStatus::Fired,
                ..self
            },
            actions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(status: RelayStatus) -> RelayMachine {
        RelayMachine::new(RelayId::new(3), status)
    }

    fn dispatched(actions: &[RelayAction]) -> Vec<Command> {
        actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::Dispatch { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    // ========================================================================
    // Countdown fire
    // ========================================================================

    #[test]
    fn fire_starts_countdown() {
        let (m, actions) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 2.0 })
            .unwrap();
        assert_eq!(m.status(), RelayStatus::Timer);
        assert_eq!(m.countdown_remaining(), Some(3));
        assert_eq!(
            actions,
            vec![
                RelayAction::SetStatus(RelayStatus::Timer),
                RelayAction::StartCountdown { ticks: 3 }
            ]
        );
    }

    #[test]
    fn three_ticks_fire_the_relay() {
        let (mut m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 2.0 })
            .unwrap();
        let mut all = Vec::new();
        for _ in 0..3 {
            let (next, actions) = m.on_event(RelayEvent::Tick).unwrap();
            m = next;
            all.extend(actions);
        }
        assert_eq!(m.status(), RelayStatus::Fired);
        assert_eq!(m.countdown_remaining(), None);
        assert_eq!(
            dispatched(&all),
            vec![Command::FireRelay {
                id: RelayId::new(3),
                delay: 2.0
            }]
        );
        assert!(all.contains(&RelayAction::RecordFired));
        assert!(all.contains(&RelayAction::SetStatus(RelayStatus::Firing)));
    }

    #[test]
    fn nothing_dispatched_before_the_last_tick() {
        let (m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 0.0 })
            .unwrap();
        let (m, a1) = m.on_event(RelayEvent::Tick).unwrap();
        let (m, a2) = m.on_event(RelayEvent::Tick).unwrap();
        assert!(dispatched(&a1).is_empty());
        assert_eq!(a2, vec![RelayAction::CountdownTick { remaining: 1 }]);
        assert_eq!(m.status(), RelayStatus::Timer);
    }

    #[test]
    fn cancel_returns_to_ready() {
        let (m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 1.0 })
            .unwrap();
        let (m, actions) = m.on_event(RelayEvent::Cancel).unwrap();
        assert_eq!(m.status(), RelayStatus::Ready);
        assert!(actions.contains(&RelayAction::StopCountdown));

        // Cancelling again is a no-op, and so is a late tick
        let (m, actions) = m.on_event(RelayEvent::Cancel).unwrap();
        assert!(actions.is_empty());
        let (m, actions) = m.on_event(RelayEvent::Tick).unwrap();
        assert!(actions.is_empty());
        assert_eq!(m.status(), RelayStatus::Ready);
    }

    #[test]
    fn custom_countdown_length() {
        let m = machine(RelayStatus::Ready).with_countdown_ticks(1);
        let (m, _) = m.on_event(RelayEvent::Fire { delay: 0.0 }).unwrap();
        let (m, actions) = m.on_event(RelayEvent::Tick).unwrap();
        assert_eq!(m.status(), RelayStatus::Fired);
        assert_eq!(dispatched(&actions).len(), 1);
    }

    // ========================================================================
    // Interlocks
    // ========================================================================

    #[test]
    fn fire_on_fired_relay_is_rejected() {
        for status in [RelayStatus::Fired, RelayStatus::Firing] {
            let m = machine(status);
            let err = m.on_event(RelayEvent::Fire { delay: 1.0 }).unwrap_err();
            assert_eq!(err, CommandRejected::AlreadyFired { status });
            assert_eq!(m.status(), status);
            let err = m.on_event(RelayEvent::FireNow { delay: 1.0 }).unwrap_err();
            assert_eq!(err, CommandRejected::AlreadyFired { status });
        }
    }

    #[test]
    fn second_fire_during_countdown_is_rejected() {
        let (m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 1.0 })
            .unwrap();
        assert_eq!(
            m.on_event(RelayEvent::Fire { delay: 1.0 }).unwrap_err(),
            CommandRejected::CountdownPending
        );
        assert_eq!(
            m.on_event(RelayEvent::FireNow { delay: 1.0 }).unwrap_err(),
            CommandRejected::CountdownPending
        );
    }

    #[test]
    fn unavailable_relays_cannot_fire() {
        for status in [RelayStatus::Error, RelayStatus::Disabled] {
            assert_eq!(
                machine(status)
                    .on_event(RelayEvent::Fire { delay: 1.0 })
                    .unwrap_err(),
                CommandRejected::Unavailable { status }
            );
        }
    }

    #[test]
    fn staged_relay_can_fire() {
        let (m, actions) = machine(RelayStatus::Ready).on_event(RelayEvent::Stage).unwrap();
        assert_eq!(m.status(), RelayStatus::Staged);
        assert_eq!(
            dispatched(&actions),
            vec![Command::StageRelay { id: RelayId::new(3) }]
        );
        let (m, _) = m.on_event(RelayEvent::Fire { delay: 0.5 }).unwrap();
        assert_eq!(m.status(), RelayStatus::Timer);
    }

    #[test]
    fn stage_requires_ready() {
        assert_eq!(
            machine(RelayStatus::Fired)
                .on_event(RelayEvent::Stage)
                .unwrap_err(),
            CommandRejected::NotReady {
                status: RelayStatus::Fired
            }
        );
    }

    // ========================================================================
    // Prime and authoritative updates
    // ========================================================================

    #[test]
    fn prime_rearms_a_fired_relay() {
        let (m, actions) = machine(RelayStatus::Fired).on_event(RelayEvent::Prime).unwrap();
        assert_eq!(m.status(), RelayStatus::Ready);
        assert_eq!(
            dispatched(&actions),
            vec![Command::PrimeRelay { id: RelayId::new(3) }]
        );
    }

    #[test]
    fn prime_only_from_fired() {
        assert_eq!(
            machine(RelayStatus::Ready)
                .on_event(RelayEvent::Prime)
                .unwrap_err(),
            CommandRejected::NotFired {
                status: RelayStatus::Ready
            }
        );
    }

    #[test]
    fn fire_now_skips_the_countdown() {
        let (m, actions) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::FireNow { delay: 0.0 })
            .unwrap();
        assert_eq!(m.status(), RelayStatus::Fired);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, RelayAction::StartCountdown { .. })));
        assert_eq!(dispatched(&actions).len(), 1);
    }

    #[test]
    fn authoritative_update_overrides_countdown() {
        let (m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::Fire { delay: 1.0 })
            .unwrap();
        let (m, actions) = m
            .on_event(RelayEvent::Observed(RelayStatus::Disabled))
            .unwrap();
        assert_eq!(m.status(), RelayStatus::Disabled);
        assert_eq!(m.countdown_remaining(), None);
        assert_eq!(actions, vec![RelayAction::StopCountdown]);
    }

    #[test]
    fn authoritative_update_can_revert_optimistic_fire() {
        let (m, _) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::FireNow { delay: 0.0 })
            .unwrap();
        let (m, _) = m.on_event(RelayEvent::Observed(RelayStatus::Ready)).unwrap();
        assert_eq!(m.status(), RelayStatus::Ready);
    }

    fn revert_of(actions: &[RelayAction]) -> Revert {
        actions
            .iter()
            .find_map(|a| match a {
                RelayAction::Dispatch { revert, .. } => Some(*revert),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn dispatch_failure_reverts() {
        let (m, actions) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::FireNow { delay: 0.0 })
            .unwrap();
        let (m, actions) = m
            .on_event(RelayEvent::DispatchFailed(revert_of(&actions)))
            .unwrap();
        assert_eq!(m.status(), RelayStatus::Ready);
        assert_eq!(actions, vec![RelayAction::SetStatus(RelayStatus::Ready)]);
    }

    #[test]
    fn dispatch_failure_restores_staged() {
        let (m, _) = machine(RelayStatus::Staged)
            .on_event(RelayEvent::Fire { delay: 0.0 })
            .unwrap();
        let (m, _) = m.on_event(RelayEvent::Tick).unwrap();
        let (m, _) = m.on_event(RelayEvent::Tick).unwrap();
        let (m, actions) = m.on_event(RelayEvent::Tick).unwrap();
        assert_eq!(m.status(), RelayStatus::Fired);

        let revert = revert_of(&actions);
        assert_eq!(revert.previous, RelayStatus::Staged);
        let (m, _) = m.on_event(RelayEvent::DispatchFailed(revert)).unwrap();
        assert_eq!(m.status(), RelayStatus::Staged);
    }

    #[test]
    fn dispatch_failure_keeps_newer_status() {
        let (m, actions) = machine(RelayStatus::Ready)
            .on_event(RelayEvent::FireNow { delay: 0.0 })
            .unwrap();
        let (m, _) = m.on_event(RelayEvent::Observed(RelayStatus::Error)).unwrap();

        let (m, actions) = m
            .on_event(RelayEvent::DispatchFailed(revert_of(&actions)))
            .unwrap();
        assert_eq!(m.status(), RelayStatus::Error);
        assert!(actions.is_empty());
    }
}
