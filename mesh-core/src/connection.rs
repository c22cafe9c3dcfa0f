//! Connection state machine for the controller link.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the WebSocket lifecycle: connect, heartbeat, linear reconnect backoff and
//! the terminal "connection failed" condition. It takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening sockets, running timers) is performed by
//! relaymesh-client, not by this module.

use std::time::Duration;

/// Timing and retry limits for the controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; retry `n` waits `base_delay × n`.
    pub base_delay: Duration,
    /// Consecutive failed retries before the link gives up.
    pub max_attempts: u32,
    /// Liveness ping interval while connected.
    pub heartbeat_interval: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            heartbeat_interval: Duration::from_millis(5000),
        }
    }
}

/// Externally visible link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// A connection attempt is in progress.
    Connecting,
    /// The link is up.
    Connected,
    /// The link is down (possibly waiting to retry).
    Disconnected,
    /// Retries are exhausted; an explicit connect is required.
    Error,
}

impl LinkStatus {
    /// Lowercase name, as shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Idle, no socket.
    #[default]
    Disconnected,
    /// Socket is being opened.
    Connecting {
        /// 0 for an explicit connect, otherwise the retry number.
        attempt: u32,
    },
    /// Socket is open.
    Connected,
    /// Link dropped, waiting for the reconnect timer.
    Reconnecting {
        /// Retry number the timer will start.
        attempt: u32,
    },
    /// Retries exhausted.
    Failed {
        /// How many retries were made.
        attempts: u32,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// A [`LinkEvent::StatusChanged`] is appended whenever the externally
    /// visible [`LinkStatus`] changes.
    pub fn on_event(self, event: Event, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        let before = self.status();
        let (state, mut actions) = self.transition(event, policy);
        let after = state.status();
        if before != after {
            actions.push(Action::Emit(LinkEvent::StatusChanged(after)));
        }
        (state, actions)
    }

    fn transition(self, event: Event, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // Explicit connect, also the only way out of Failed
            (Self::Disconnected | Self::Failed { .. }, Event::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![Action::OpenSocket])
            }

            (Self::Connecting { .. }, Event::Opened) => (
                Self::Connected,
                vec![Action::StartHeartbeat {
                    interval: policy.heartbeat_interval,
                }],
            ),

            (Self::Connected, Event::Closed { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::StopHeartbeat,
                    Action::ScheduleReconnect {
                        attempt: 1,
                        delay: policy.delay_for(1),
                        reason,
                    },
                ],
            ),

            (Self::Connecting { attempt }, Event::Closed { reason }) => {
                if attempt < policy.max_attempts {
                    let next = attempt + 1;
                    (
                        Self::Reconnecting { attempt: next },
                        vec![Action::ScheduleReconnect {
                            attempt: next,
                            delay: policy.delay_for(next),
                            reason,
                        }],
                    )
                } else {
                    (
                        Self::Failed { attempts: attempt },
                        vec![Action::Emit(LinkEvent::ConnectionFailed {
                            attempts: attempt,
                            reason,
                        })],
                    )
                }
            }

            (Self::Reconnecting { attempt }, Event::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![Action::OpenSocket])
            }

            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![Action::StopHeartbeat, Action::CloseSocket],
            ),
            (Self::Connecting { .. }, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CloseSocket])
            }
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => {
                (Self::Disconnected, vec![Action::CancelReconnect])
            }
            (Self::Failed { .. }, Event::DisconnectRequested) => (Self::Disconnected, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Externally visible status.
    pub fn status(&self) -> LinkStatus {
        match self {
            Self::Disconnected | Self::Reconnecting { .. } => LinkStatus::Disconnected,
            Self::Connecting { .. } => LinkStatus::Connecting,
            Self::Connected => LinkStatus::Connected,
            Self::Failed { .. } => LinkStatus::Error,
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the link gave up retrying.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested connection.
    ConnectRequested,
    /// The socket opened.
    Opened,
    /// The socket closed or errored (including a failed open).
    Closed {
        /// Reason for the close.
        reason: String,
    },
    /// Reconnect timer fired.
    ReconnectTimer,
    /// User requested disconnect.
    DisconnectRequested,
}

/// Actions to be executed by the transport.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new socket.
    OpenSocket,
    /// Close the socket.
    CloseSocket,
    /// Start the periodic liveness ping.
    StartHeartbeat {
        /// Ping interval.
        interval: Duration,
    },
    /// Stop the liveness ping.
    StopHeartbeat,
    /// Start the reconnect timer.
    ScheduleReconnect {
        /// Retry number the timer will start.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
        /// Why the link dropped.
        reason: String,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Emit an event to subscribers.
    Emit(LinkEvent),
}

/// Events emitted to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The visible status changed.
    StatusChanged(LinkStatus),
    /// Retries are exhausted.
    ConnectionFailed {
        /// How many retries were made.
        attempts: u32,
        /// Reason of the last failure.
        reason: String,
    },
}
