//! Relay command control.
//!
//! [`RelayController`] keeps one [`RelayMachine`] per channel and carries out
//! what the machines ask for: status writes to the [`StateStore`], the
//! confirmation countdown timer, and commands through the [`Transport`].
//!
//! Before every request the machine is re-synced with the status the store
//! holds, so authoritative updates from the controller always win over local
//! optimistic state.

use crate::store::{EntityPatch, StateStore};
use crate::transport::Transport;
use crate::ClientError;
use dashmap::DashMap;
use mesh_core::{
    validate_fire_delay, CommandRejected, RelayAction, RelayEvent, RelayMachine, Revert,
    DEFAULT_COUNTDOWN_TICKS,
};
use mesh_types::{now_millis, ChannelKey, Command, Outbound, RelayPatch};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Countdown and limits for firing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaySettings {
    /// Confirmation ticks before a fire is dispatched.
    pub countdown_ticks: u32,
    /// Length of one tick.
    pub tick_interval: Duration,
    /// Largest accepted fire delay (s).
    pub max_fire_delay: f64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            countdown_ticks: DEFAULT_COUNTDOWN_TICKS,
            tick_interval: Duration::from_secs(1),
            max_fire_delay: 10.0,
        }
    }
}

/// Progress reported to observers of a [`RelayController`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A confirmation countdown began.
    CountdownStarted {
        /// Channel.
        key: ChannelKey,
        /// Ticks to go.
        ticks: u32,
    },
    /// The countdown advanced.
    CountdownTick {
        /// Channel.
        key: ChannelKey,
        /// Ticks left.
        remaining: u32,
    },
    /// The countdown was cancelled or superseded.
    CountdownCancelled {
        /// Channel.
        key: ChannelKey,
    },
    /// `fire_relay` was delivered.
    Fired {
        /// Channel.
        key: ChannelKey,
        /// Delay sent with the command (s).
        delay: f64,
    },
    /// `prime_relay` was delivered.
    Primed {
        /// Channel.
        key: ChannelKey,
    },
    /// `stage_relay` was delivered.
    Staged {
        /// Channel.
        key: ChannelKey,
    },
    /// A command could not be delivered; the optimistic status was reverted.
    CommandFailed {
        /// Channel.
        key: ChannelKey,
        /// Wire type of the failed command.
        command: &'static str,
        /// Failure description.
        error: String,
    },
}

/// Fire/confirm/prime control for every relay channel.
#[derive(Clone)]
pub struct RelayController {
    inner: Arc<Inner>,
}

struct Inner {
    store: StateStore,
    transport: Arc<dyn Transport>,
    settings: RelaySettings,
    slots: DashMap<ChannelKey, Slot>,
    events: broadcast::Sender<ControllerEvent>,
}

struct Slot {
    machine: RelayMachine,
    countdown: Option<CancellationToken>,
}

/// Result of one machine transition, before any I/O.
struct Step {
    actions: Vec<RelayAction>,
    countdown: Option<CancellationToken>,
}

impl Slot {
    /// Run the timer-related actions that need the slot itself.
    fn apply_timers(&mut self, actions: &[RelayAction]) -> Option<CancellationToken> {
        let mut started = None;
        for action in actions {
            match action {
                RelayAction::StopCountdown => {
                    if let Some(token) = self.countdown.take() {
                        token.cancel();
                    }
                }
                RelayAction::StartCountdown { .. } => {
                    let token = CancellationToken::new();
                    if let Some(previous) = self.countdown.replace(token.clone()) {
                        previous.cancel();
                    }
                    started = Some(token);
                }
                _ => {}
            }
        }
        started
    }
}

impl RelayController {
    /// Create a controller over `store`, sending through `transport`.
    pub fn new(store: StateStore, transport: Arc<dyn Transport>, settings: RelaySettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                settings,
                slots: DashMap::new(),
                events,
            }),
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &RelaySettings {
        &self.inner.settings
    }

    /// Observe countdowns, deliveries and failures.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Ticks left on a pending countdown.
    pub fn countdown_remaining(&self, key: &ChannelKey) -> Option<u32> {
        self.inner
            .slots
            .get(key)
            .and_then(|slot| slot.machine.countdown_remaining())
    }

    /// Arm the confirmation countdown; `fire_relay` is sent when it runs out.
    ///
    /// Returns as soon as the countdown has started. Delivery is reported as
    /// [`ControllerEvent::Fired`] or [`ControllerEvent::CommandFailed`].
    pub fn fire(&self, key: &ChannelKey, delay: f64) -> Result<(), ClientError> {
        validate_fire_delay(delay, self.inner.settings.max_fire_delay)?;
        let step = self.transition(key, RelayEvent::Fire { delay })?;
        info!(relay = %key, delay, "fire countdown started");
        if let Some(token) = step.countdown.clone() {
            self.spawn_countdown(key.clone(), token);
        }
        self.report(key, &step.actions);
        Ok(())
    }

    /// [`fire`](Self::fire) on the selected channel, if any.
    pub fn fire_selected(&self, selected: Option<&ChannelKey>, delay: f64) -> Result<(), ClientError> {
        let key = selected.ok_or(CommandRejected::NoChannelSelected)?;
        self.fire(key, delay)
    }

    /// Fire immediately, without a countdown. Used by sequence runs.
    pub async fn fire_now(&self, key: &ChannelKey, delay: f64) -> Result<(), ClientError> {
        validate_fire_delay(delay, self.inner.settings.max_fire_delay)?;
        let step = self.transition(key, RelayEvent::FireNow { delay })?;
        self.execute(key, step).await
    }

    /// Abort a pending countdown. Returns whether one was pending.
    pub fn cancel(&self, key: &ChannelKey) -> Result<bool, ClientError> {
        let step = self.transition(key, RelayEvent::Cancel)?;
        let cancelled = step.actions.contains(&RelayAction::StopCountdown);
        if cancelled {
            info!(relay = %key, "fire countdown cancelled");
            self.emit(ControllerEvent::CountdownCancelled { key: key.clone() });
        }
        Ok(cancelled)
    }

    /// Re-arm a fired channel.
    pub async fn prime(&self, key: &ChannelKey) -> Result<(), ClientError> {
        let step = self.transition(key, RelayEvent::Prime)?;
        self.execute(key, step).await
    }

    /// Stage a ready channel.
    pub async fn stage(&self, key: &ChannelKey) -> Result<(), ClientError> {
        let step = self.transition(key, RelayEvent::Stage)?;
        self.execute(key, step).await
    }

    /// Sync the machine with the store, then feed `event`. Synchronous: no lock
    /// outlives this call.
    fn transition(&self, key: &ChannelKey, event: RelayEvent) -> Result<Step, ClientError> {
        let current = self
            .inner
            .store
            .relay(key)
            .ok_or_else(|| CommandRejected::UnknownChannel(key.to_string()))?;

        let (actions, countdown) = {
            let mut slot = self.inner.slots.entry(key.clone()).or_insert_with(|| Slot {
                machine: RelayMachine::new(key.relay_id, current.status)
                    .with_countdown_ticks(self.inner.settings.countdown_ticks),
                countdown: None,
            });

            let (observed, mut actions) =
                slot.machine.on_event(RelayEvent::Observed(current.status))?;
            slot.machine = observed;
            slot.apply_timers(&actions);
            if actions.contains(&RelayAction::StopCountdown) {
                debug!(relay = %key, status = %current.status, "countdown superseded by controller");
            }

            let (next, more) = slot.machine.on_event(event)?;
            slot.machine = next;
            let countdown = slot.apply_timers(&more);
            actions.extend(more);
            (actions, countdown)
        };

        for action in &actions {
            if let RelayAction::SetStatus(status) = action {
                self.write(key, RelayPatch::status(key.relay_id, *status));
            }
        }
        Ok(Step { actions, countdown })
    }

    fn write(&self, key: &ChannelKey, patch: RelayPatch) {
        self.inner.store.merge_entity(EntityPatch::Relay {
            node_id: key.node_id.clone(),
            patch,
        });
    }

    async fn execute(&self, key: &ChannelKey, step: Step) -> Result<(), ClientError> {
        if let Some(token) = step.countdown {
            self.spawn_countdown(key.clone(), token);
        }
        self.report(key, &step.actions);
        for action in &step.actions {
            if let RelayAction::Dispatch { command, revert } = action {
                self.dispatch(key, command.clone(), *revert).await?;
            }
        }
        // Only a delivered fire counts
        if step.actions.contains(&RelayAction::RecordFired) {
            self.write(
                key,
                RelayPatch {
                    id: key.relay_id,
                    last_fired_at: Some(now_millis()),
                    ..RelayPatch::default()
                },
            );
        }
        Ok(())
    }

    fn report(&self, key: &ChannelKey, actions: &[RelayAction]) {
        for action in actions {
            match action {
                RelayAction::StartCountdown { ticks } => self.emit(ControllerEvent::CountdownStarted {
                    key: key.clone(),
                    ticks: *ticks,
                }),
                RelayAction::CountdownTick { remaining } => {
                    debug!(relay = %key, remaining, "countdown tick");
                    self.emit(ControllerEvent::CountdownTick {
                        key: key.clone(),
                        remaining: *remaining,
                    })
                }
                _ => {}
            }
        }
    }

    async fn dispatch(
        &self,
        key: &ChannelKey,
        command: Command,
        revert: Revert,
    ) -> Result<(), ClientError> {
        let name = command.message_type();
        let delivered = match &command {
            Command::FireRelay { delay, .. } => ControllerEvent::Fired {
                key: key.clone(),
                delay: *delay,
            },
            Command::PrimeRelay { .. } => ControllerEvent::Primed { key: key.clone() },
            _ => ControllerEvent::Staged { key: key.clone() },
        };

        match self
            .inner
            .transport
            .send(Outbound::to_node(&key.node_id, command))
            .await
        {
            Ok(()) => {
                info!(relay = %key, command = name, "command delivered");
                self.emit(delivered);
                Ok(())
            }
            Err(e) => {
                warn!(relay = %key, command = name, error = %e, "command failed, reverting to {}", revert.previous);
                if let Err(skipped) = self.transition(key, RelayEvent::DispatchFailed(revert)) {
                    debug!(relay = %key, error = %skipped, "revert skipped");
                }
                self.emit(ControllerEvent::CommandFailed {
                    key: key.clone(),
                    command: name,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    fn spawn_countdown(&self, key: ChannelKey, token: CancellationToken) {
        let controller = self.clone();
        let period = self.inner.settings.tick_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                match controller.tick(&key).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        debug!(relay = %key, error = %e, "countdown ended with an error");
                        break;
                    }
                }
            }
        });
    }

    /// One countdown tick. Returns whether the countdown is still pending.
    async fn tick(&self, key: &ChannelKey) -> Result<bool, ClientError> {
        let step = self.transition(key, RelayEvent::Tick)?;
        if step.actions.contains(&RelayAction::StopCountdown)
            && !step
                .actions
                .iter()
                .any(|a| matches!(a, RelayAction::Dispatch { .. }))
        {
            self.emit(ControllerEvent::CountdownCancelled { key: key.clone() });
        }
        self.execute(key, step).await?;
        Ok(self.countdown_remaining(key).is_some())
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::PersistedState;
    use crate::transport::{DeviceFault, MockTransport, TransportError};
    use mesh_types::{Inbound, RelayId, RelayStatus, RelayUpdate};

    async fn setup() -> (RelayController, StateStore, MockTransport) {
        let store = StateStore::from_persisted(PersistedState::default());
        let mock = MockTransport::new();
        mock.connect().await.unwrap();
        let controller =
            RelayController::new(store.clone(), Arc::new(mock.clone()), RelaySettings::default());
        (controller, store, mock)
    }

    fn status(store: &StateStore, relay: u32) -> RelayStatus {
        store.relay(&ChannelKey::local(relay)).unwrap().status
    }

    fn set_status(store: &StateStore, relay: u32, status: RelayStatus) {
        store.apply_inbound(&Inbound::RelayUpdate {
            node_id: None,
            update: RelayUpdate::Merge(RelayPatch::status(relay, status)),
        });
    }

    use crate::transport::Transport as _;

    // ========================================================================
    // Countdown fire
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn fire_counts_down_then_dispatches() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(3u32);

        controller.fire(&key, 2.0).unwrap();
        assert_eq!(status(&store, 3), RelayStatus::Timer);
        assert_eq!(controller.countdown_remaining(&key), Some(3));
        assert!(mock.sent_messages().is_empty());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(controller.countdown_remaining(&key), Some(1));
        assert!(mock.sent_messages().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(status(&store, 3), RelayStatus::Fired);
        assert!(store.relay(&key).unwrap().last_fired_at.is_some());
        assert_eq!(
            mock.sent_commands(),
            vec![Command::FireRelay {
                id: RelayId::new(3),
                delay: 2.0
            }]
        );
        assert_eq!(controller.countdown_remaining(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_events_are_reported() {
        let (controller, _store, _mock) = setup().await;
        let mut events = controller.subscribe();
        let key = ChannelKey::local(1u32);

        controller.fire(&key, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ControllerEvent::CountdownStarted {
                    key: key.clone(),
                    ticks: 3
                },
                ControllerEvent::CountdownTick {
                    key: key.clone(),
                    remaining: 2
                },
                ControllerEvent::CountdownTick {
                    key: key.clone(),
                    remaining: 1
                },
                ControllerEvent::Fired { key, delay: 0.0 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_countdown() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(2u32);

        controller.fire(&key, 1.0).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(controller.cancel(&key).unwrap());
        assert_eq!(status(&store, 2), RelayStatus::Ready);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(mock.sent_messages().is_empty());
        assert!(!controller.cancel(&key).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn authoritative_update_abandons_countdown() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(4u32);

        controller.fire(&key, 1.0).unwrap();
        set_status(&store, 4, RelayStatus::Error);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(mock.sent_messages().is_empty());
        assert_eq!(status(&store, 4), RelayStatus::Error);
        assert_eq!(controller.countdown_remaining(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_reverts_to_ready() {
        let (controller, store, mock) = setup().await;
        let mut events = controller.subscribe();
        let key = ChannelKey::local(5u32);
        mock.fault_next_send(DeviceFault::RelayMalfunction);

        controller.fire(&key, 0.0).unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert_eq!(status(&store, 5), RelayStatus::Ready);
        assert_eq!(store.relay(&key).unwrap().last_fired_at, None);
        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            if let ControllerEvent::CommandFailed { command, .. } = event {
                assert_eq!(command, "fire_relay");
                failed = true;
            }
        }
        assert!(failed);
    }

    // ========================================================================
    // Interlocks
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn fired_relay_rejects_fire() {
        let (controller, store, mock) = setup().await;
        set_status(&store, 1, RelayStatus::Fired);

        let err = controller.fire(&ChannelKey::local(1u32), 0.0).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected(CommandRejected::AlreadyFired { .. })
        ));
        assert_eq!(status(&store, 1), RelayStatus::Fired);
        assert!(mock.sent_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_fire_during_countdown_rejected() {
        let (controller, _store, _mock) = setup().await;
        let key = ChannelKey::local(1u32);
        controller.fire(&key, 0.0).unwrap();

        let err = controller.fire(&key, 0.0).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected(CommandRejected::CountdownPending)
        ));
        assert_eq!(controller.countdown_remaining(&key), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_and_unknown_channels_rejected() {
        let (controller, store, _mock) = setup().await;
        set_status(&store, 6, RelayStatus::Disabled);

        assert!(matches!(
            controller.fire(&ChannelKey::local(6u32), 0.0),
            Err(ClientError::Rejected(CommandRejected::Unavailable { .. }))
        ));
        assert!(matches!(
            controller.fire(&ChannelKey::new("node_9", 1u32), 0.0),
            Err(ClientError::Rejected(CommandRejected::UnknownChannel(_)))
        ));
        assert!(matches!(
            controller.fire_selected(None, 0.0),
            Err(ClientError::Rejected(CommandRejected::NoChannelSelected))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_delay_is_validated() {
        let (controller, store, _mock) = setup().await;
        let err = controller.fire(&ChannelKey::local(1u32), 11.0).unwrap_err();
        match err {
            ClientError::Validation(v) => assert!(v.has_field("delay")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(status(&store, 1), RelayStatus::Ready);
    }

    // ========================================================================
    // Prime, stage, immediate fire
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn prime_rearms_fired_relay() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(2u32);

        assert!(matches!(
            controller.prime(&key).await,
            Err(ClientError::Rejected(CommandRejected::NotFired { .. }))
        ));

        set_status(&store, 2, RelayStatus::Fired);
        controller.prime(&key).await.unwrap();
        assert_eq!(status(&store, 2), RelayStatus::Ready);
        assert_eq!(
            mock.sent_commands(),
            vec![Command::PrimeRelay {
                id: RelayId::new(2)
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_prime_stays_fired() {
        let (controller, store, mock) = setup().await;
        set_status(&store, 2, RelayStatus::Fired);
        mock.fail_next_send("link lost");

        let err = controller.prime(&ChannelKey::local(2u32)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::SendFailed(_))
        ));
        assert_eq!(status(&store, 2), RelayStatus::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_then_fire_now() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::new("local", 3u32);

        controller.stage(&key).await.unwrap();
        assert_eq!(status(&store, 3), RelayStatus::Staged);

        controller.fire_now(&key, 0.5).await.unwrap();
        assert_eq!(status(&store, 3), RelayStatus::Fired);
        assert_eq!(
            mock.sent_commands(),
            vec![
                Command::StageRelay {
                    id: RelayId::new(3)
                },
                Command::FireRelay {
                    id: RelayId::new(3),
                    delay: 0.5
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fire_now_failure_is_returned_and_reverted() {
        let (controller, store, mock) = setup().await;
        mock.drop_link();

        let err = controller
            .fire_now(&ChannelKey::local(1u32), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::NotConnected)
        ));
        assert_eq!(status(&store, 1), RelayStatus::Ready);
        assert_eq!(store.relay(&ChannelKey::local(1u32)).unwrap().last_fired_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fire_from_staged_returns_to_staged() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(4u32);
        set_status(&store, 4, RelayStatus::Staged);
        mock.fault_next_send(DeviceFault::RelayMalfunction);

        controller.fire_now(&key, 0.0).await.unwrap_err();
        assert_eq!(status(&store, 4), RelayStatus::Staged);
        assert_eq!(store.relay(&key).unwrap().last_fired_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn controller_error_during_send_survives_failed_fire() {
        let (controller, store, mock) = setup().await;
        let key = ChannelKey::local(2u32);
        mock.set_latency(Duration::from_millis(100));
        mock.fault_next_send(DeviceFault::RelayMalfunction);

        let firing = {
            let controller = controller.clone();
            let key = key.clone();
            tokio::spawn(async move { controller.fire_now(&key, 0.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(status(&store, 2), RelayStatus::Fired);
        set_status(&store, 2, RelayStatus::Error);

        assert!(firing.await.unwrap().is_err());
        assert_eq!(status(&store, 2), RelayStatus::Error);
        assert_eq!(store.relay(&key).unwrap().last_fired_at, None);
        assert!(matches!(
            controller.fire(&key, 0.0),
            Err(ClientError::Rejected(CommandRejected::Unavailable { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_node_commands_carry_node_id() {
        let (controller, store, mock) = setup().await;
        store.apply_inbound(&Inbound::RelayUpdate {
            node_id: Some(mesh_types::NodeId::new("node_2")),
            update: RelayUpdate::Replace(vec![mesh_types::RelayChannel::new("node_2", 1u32)]),
        });

        controller
            .fire_now(&ChannelKey::new("node_2", 1u32), 0.0)
            .await
            .unwrap();
        let sent = mock.last_sent().unwrap();
        assert_eq!(sent.node_id, Some(mesh_types::NodeId::new("node_2")));
    }
}
