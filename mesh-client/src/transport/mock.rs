//! Mock transport for testing.
//!
//! Captures outbound commands for verification and lets tests inject inbound
//! messages and link drops.

use super::{
    DeviceFault, EventHandler, SimulatedDeviceError, Subscribers, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use mesh_core::LinkStatus;
use mesh_types::{Command, Inbound, Outbound};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle while the client owns another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    subscribers: Subscribers,
}

#[derive(Debug)]
struct MockTransportInner {
    status: LinkStatus,
    sent_messages: Vec<Outbound>,
    latency: Option<Duration>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fault_next_send: Option<DeviceFault>,
}

impl Default for MockTransportInner {
    fn default() -> Self {
        Self {
            status: LinkStatus::Disconnected,
            sent_messages: Vec::new(),
            latency: None,
            fail_next_connect: None,
            fail_next_send: None,
            fault_next_send: None,
        }
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Outbound> {
        self.lock().sent_messages.clone()
    }

    /// Just the commands that were sent, in order.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.lock()
            .sent_messages
            .iter()
            .map(|m| m.command.clone())
            .collect()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Outbound> {
        self.lock().sent_messages.last().cloned()
    }

    /// Make every send wait this long before it is recorded.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next send() to fail like a simulated device fault.
    pub fn fault_next_send(&self, fault: DeviceFault) {
        self.lock().fault_next_send = Some(fault);
    }

    /// Deliver an inbound message to subscribers, as if the controller sent it.
    pub fn inject(&self, message: Inbound) {
        self.subscribers.emit(&TransportEvent::Message(message));
    }

    /// Simulate the link dropping.
    pub fn drop_link(&self) {
        self.set_status(LinkStatus::Disconnected);
    }

    /// Clear all state (messages, failures, connection).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }

    fn set_status(&self, status: LinkStatus) {
        let changed = {
            let mut inner = self.lock();
            let changed = inner.status != status;
            inner.status = status;
            changed
        };
        if changed {
            self.subscribers.emit(&TransportEvent::StatusChanged(status));
        }
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            subscribers: self.subscribers.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // Check for forced failure
        let forced = self.lock().fail_next_connect.take();
        if let Some(error) = forced {
            self.set_status(LinkStatus::Disconnected);
            return Err(TransportError::ConnectionFailed(error));
        }
        self.set_status(LinkStatus::Connected);
        Ok(())
    }

    async fn send(&self, message: Outbound) -> Result<(), TransportError> {
        let latency = {
            let inner = self.lock();
            if inner.status != LinkStatus::Connected {
                return Err(TransportError::NotConnected);
            }
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        if let Some(fault) = inner.fault_next_send.take() {
            return Err(SimulatedDeviceError::new(fault).into());
        }
        inner.sent_messages.push(message);
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        self.subscribers.add(handler);
    }

    fn status(&self) -> LinkStatus {
        self.lock().status
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.set_status(LinkStatus::Disconnected);
        Ok(())
    }
}
