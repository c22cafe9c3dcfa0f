//! Transport abstraction for relaymesh.
//!
//! One contract, several links to the controller:
//! - [`WsTransport`] - a live WebSocket with heartbeat and reconnect backoff
//! - [`SimulatedTransport`] - no socket; synthetic telemetry, injected latency and faults
//! - [`MockTransport`] - records outbound commands and injects inbound ones for tests
//!
//! # Design
//!
//! The transport is push-based:
//! - `connect()` starts the link
//! - `send()` transmits one command
//! - `on_event()` registers a handler for status changes and inbound messages
//! - `close()` stops the link and any background tasks
//!
//! Handlers run inline on the task that received the frame, so every
//! subscriber sees events in receipt order.

mod mock;
mod simulated;
mod ws;

pub use mock::MockTransport;
pub use simulated::{SimulatedTransport, SimulationSettings};
pub use ws::WsTransport;

use async_trait::async_trait;
use mesh_core::LinkStatus;
use mesh_types::{Inbound, Outbound, WireError};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Something a transport reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link status changed.
    StatusChanged(LinkStatus),
    /// A decoded message from the controller.
    Message(Inbound),
    /// Reconnection gave up.
    ConnectionFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure reason.
        reason: String,
    },
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Fault kinds the simulated device can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DeviceFault {
    ConnectionTimeout,
    AuthenticationFailed,
    RelayMalfunction,
    TemperatureCritical,
    VoltageWarning,
    MeshDisconnected,
}

impl DeviceFault {
    /// Every fault kind.
    pub const ALL: [DeviceFault; 6] = [
        DeviceFault::ConnectionTimeout,
        DeviceFault::AuthenticationFailed,
        DeviceFault::RelayMalfunction,
        DeviceFault::TemperatureCritical,
        DeviceFault::VoltageWarning,
        DeviceFault::MeshDisconnected,
    ];

    /// Error code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFault::ConnectionTimeout => "connection_timeout",
            DeviceFault::AuthenticationFailed => "authentication_failed",
            DeviceFault::RelayMalfunction => "relay_malfunction",
            DeviceFault::TemperatureCritical => "temperature_critical",
            DeviceFault::VoltageWarning => "voltage_warning",
            DeviceFault::MeshDisconnected => "mesh_disconnected",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            DeviceFault::ConnectionTimeout => "device did not answer in time",
            DeviceFault::AuthenticationFailed => "device refused the credentials",
            DeviceFault::RelayMalfunction => "relay did not switch",
            DeviceFault::TemperatureCritical => "relay temperature above safe limit",
            DeviceFault::VoltageWarning => "supply voltage out of range",
            DeviceFault::MeshDisconnected => "target node left the mesh",
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An injected failure, returned from `send()` like a real device failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("simulated device error ({fault}): {message}")]
pub struct SimulatedDeviceError {
    /// What went wrong.
    pub fault: DeviceFault,
    /// Human-readable description.
    pub message: String,
}

impl SimulatedDeviceError {
    /// Build the error for a fault kind.
    pub fn new(fault: DeviceFault) -> Self {
        Self {
            fault,
            message: fault.message().to_string(),
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Reconnection gave up.
    #[error("connection failed after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Command could not be encoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Fault injected by the simulated transport.
    #[error(transparent)]
    SimulatedDevice(#[from] SimulatedDeviceError),
}

/// Transport trait for talking to the relay controller.
///
/// Implementations handle the underlying link (WebSocket, simulation, mock).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the link.
    ///
    /// Resolves once the first attempt has succeeded or failed. A real link
    /// keeps retrying in the background after a failed first attempt.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send one command.
    async fn send(&self, message: Outbound) -> Result<(), TransportError>;

    /// Register a handler for status changes and inbound messages.
    fn on_event(&self, handler: EventHandler);

    /// Current link status.
    fn status(&self) -> LinkStatus;

    /// Close the link and stop background tasks.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Fan-out list shared by the transports.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl Subscribers {
    pub(crate) fn add(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub(crate) fn emit(&self, event: &TransportEvent) {
        // Snapshot so a handler may subscribe without deadlocking
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers.iter() {
            handler(event);
        }
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("Subscribers").field("count", &count).finish()
    }
}
