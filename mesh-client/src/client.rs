//! RelayClient - the main interface for relaymesh.
//!
//! This module provides [`RelayClient`], the façade applications use to
//! drive a relay bank: it owns the transport, feeds every inbound message
//! into the [`StateStore`], and routes commands through the relay
//! controller, the sequence runner and payload validation.
//!
//! # Architecture
//!
//! ```text
//! Application → RelayClient → RelayController / SequenceRunner → Transport → Controller
//!                    ↑                                               │
//!                StateStore  ←──────────── inbound updates ──────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relaymesh_client::{ClientConfig, RelayClient, StateStore};
//! use relaymesh_types::ChannelKey;
//!
//! let mut config = ClientConfig::default();
//! config.simulation.enabled = true;
//! let client = RelayClient::from_config(config, None, StateStore::default());
//!
//! client.connect().await?;
//! client.fire(&ChannelKey::local(3u32), 2.0)?;
//! ```

use crate::config::{ClientConfig, ConfigError};
use crate::persist::{PersistError, PersistStore};
use crate::relay::RelayController;
use crate::sequencer::SequenceRunner;
use crate::store::StateStore;
use crate::transport::{
    EventHandler, SimulatedTransport, Transport, TransportError, TransportEvent, WsTransport,
};
use mesh_core::{
    find_route, mesh_links, network_health, rank_nodes, validate_sequence, CommandRejected,
    LinkStatus, MeshLink, NetworkHealth, RankedNode, Validate, ValidationError,
};
use mesh_types::{
    ChannelKey, Command, MeshConfig, NetworkConfig, NodeId, NodePatch, Outbound, RelayConfig,
    SecurityConfig, SequenceId, SystemConfig, WireError,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Refused by a safety interlock or lifecycle rule.
    #[error("command rejected: {0}")]
    Rejected(#[from] CommandRejected),

    /// Payload failed validation; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Wire encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence error.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Which transport a client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Live WebSocket link to the controller.
    WebSocket,
    /// In-process simulation.
    Simulated,
}

impl TransportKind {
    /// The kind a configuration asks for.
    pub fn of(config: &ClientConfig) -> Self {
        if config.simulation.enabled {
            TransportKind::Simulated
        } else {
            TransportKind::WebSocket
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Simulated => "simulated",
        })
    }
}

/// The main relaymesh client.
pub struct RelayClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: StateStore,
    relays: RelayController,
    sequencer: SequenceRunner,
}

impl RelayClient {
    /// Create a client over an existing transport.
    ///
    /// Inbound messages from `transport` are applied to `store` in arrival order.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, store: StateStore) -> Self {
        let sink = store.clone();
        transport.on_event(Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::Message(message) = event {
                sink.apply_inbound(message);
            }
        }));

        let relays = RelayController::new(store.clone(), transport.clone(), config.relay_settings());
        let sequencer = SequenceRunner::with_max_steps(
            store.clone(),
            relays.clone(),
            config.relay.max_sequence_steps,
        );
        Self {
            config,
            transport,
            store,
            relays,
            sequencer,
        }
    }

    /// Create a client with the transport the configuration selects.
    ///
    /// `serving_host` is the host the application was reached on, used to
    /// find the controller when no host is configured.
    pub fn from_config(config: ClientConfig, serving_host: Option<&str>, store: StateStore) -> Self {
        let kind = TransportKind::of(&config);
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::WebSocket => Arc::new(WsTransport::new(
                config.resolve_endpoint(serving_host),
                config.reconnect_policy(),
            )),
            TransportKind::Simulated => {
                Arc::new(SimulatedTransport::new(config.simulation_settings()))
            }
        };
        info!(transport = %kind, "relay client created");
        Self::new(config, transport, store)
    }

    // ========================================================================
    // Link
    // ========================================================================

    /// Connect to the controller.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.transport.connect().await?;
        Ok(())
    }

    /// Close the link and stop any local sequence run.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.sequencer.stop();
        self.transport.close().await?;
        Ok(())
    }

    /// Link status.
    pub fn status(&self) -> LinkStatus {
        self.transport.status()
    }

    /// Observe link status changes and inbound messages.
    pub fn on_event(&self, handler: EventHandler) {
        self.transport.on_event(handler);
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The synchronized state.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Per-channel fire control.
    pub fn relays(&self) -> &RelayController {
        &self.relays
    }

    /// Local sequence runs and editing.
    pub fn sequencer(&self) -> &SequenceRunner {
        &self.sequencer
    }

    // ========================================================================
    // Relays
    // ========================================================================

    /// Start the confirmation countdown on a channel.
    pub fn fire(&self, key: &ChannelKey, delay: f64) -> Result<(), ClientError> {
        self.relays.fire(key, delay)
    }

    /// Abort a pending countdown.
    pub fn cancel(&self, key: &ChannelKey) -> Result<bool, ClientError> {
        self.relays.cancel(key)
    }

    /// Re-arm a fired channel.
    pub async fn prime(&self, key: &ChannelKey) -> Result<(), ClientError> {
        self.relays.prime(key).await
    }

    /// Stage a ready channel.
    pub async fn stage(&self, key: &ChannelKey) -> Result<(), ClientError> {
        self.relays.stage(key).await
    }

    /// Push a channel configuration to the node that owns it.
    pub async fn update_relay_config(&self, node_id: &NodeId, config: RelayConfig) -> Result<(), ClientError> {
        config.validate()?;
        self.send(Outbound::to_node(node_id, Command::UpdateRelayConfig(config)))
            .await
    }

    /// Restore a channel's factory configuration.
    pub async fn reset_relay_config(&self, key: &ChannelKey) -> Result<(), ClientError> {
        self.send(Outbound::to_node(
            &key.node_id,
            Command::ResetRelayConfig { id: key.relay_id },
        ))
        .await
    }

    // ========================================================================
    // Sequences
    // ========================================================================

    /// Run a sequence locally, step by step.
    pub fn run_sequence(&self, id: &SequenceId) -> Result<(), ClientError> {
        self.sequencer.run(id)
    }

    /// Stop the local run. Returns whether one was active.
    pub fn stop_sequence(&self) -> bool {
        self.sequencer.stop()
    }

    /// Hand a whole sequence to the device to run.
    pub async fn run_on_device(&self, id: &SequenceId) -> Result<(), ClientError> {
        let sequence = self
            .store
            .sequence(id)
            .ok_or_else(|| CommandRejected::UnknownSequence(id.clone()))?;
        validate_sequence(&sequence, self.config.relay.max_sequence_steps)?;
        self.send(Outbound::local(Command::RunSequence { sequence }))
            .await
    }

    /// Stop a device-side run.
    pub async fn stop_on_device(&self) -> Result<(), ClientError> {
        self.send(Outbound::local(Command::StopSequence)).await
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Push Wi-Fi and mesh radio settings.
    pub async fn update_network_config(&self, config: NetworkConfig) -> Result<(), ClientError> {
        config.validate()?;
        self.send(Outbound::local(Command::UpdateNetworkConfig(config)))
            .await
    }

    /// Push mesh membership settings.
    pub async fn update_mesh_config(&self, config: MeshConfig) -> Result<(), ClientError> {
        config.validate()?;
        self.send(Outbound::local(Command::UpdateMeshConfig(config)))
            .await
    }

    /// Push security settings.
    pub async fn update_security_config(&self, config: SecurityConfig) -> Result<(), ClientError> {
        config.validate()?;
        self.send(Outbound::local(Command::UpdateSecurityConfig(config)))
            .await
    }

    /// Push controller system settings.
    pub async fn update_system_config(&self, config: SystemConfig) -> Result<(), ClientError> {
        config.validate()?;
        self.send(Outbound::local(Command::UpdateSystemConfig(config)))
            .await
    }

    // ========================================================================
    // Mesh
    // ========================================================================

    /// Ask the controller to rescan the mesh.
    pub async fn scan_network(&self) -> Result<(), ClientError> {
        self.send(Outbound::local(Command::ScanNetwork)).await
    }

    /// Ask a node to join the mesh.
    pub async fn connect_node(&self, id: &NodeId) -> Result<(), ClientError> {
        self.send(Outbound::local(Command::ConnectNode { id: id.clone() }))
            .await
    }

    /// Push node settings.
    pub async fn update_node_config(&self, id: &NodeId, config: NodePatch) -> Result<(), ClientError> {
        self.send(Outbound::local(Command::UpdateNodeConfig {
            id: id.clone(),
            config,
        }))
        .await
    }

    /// Cheapest route between two nodes over the current mesh, or empty.
    pub fn route(&self, source: &NodeId, target: &NodeId) -> Vec<NodeId> {
        find_route(source, target, &self.store.nodes())
    }

    /// Health of the current mesh.
    pub fn health(&self) -> NetworkHealth {
        network_health(&self.store.nodes())
    }

    /// Usable links in the current mesh.
    pub fn links(&self) -> Vec<MeshLink> {
        mesh_links(&self.store.nodes())
    }

    /// Nodes ordered by how well they anchor the mesh.
    pub fn rank(&self) -> Vec<RankedNode> {
        rank_nodes(&self.store.nodes())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save the current model.
    pub async fn save(&self, persist: &PersistStore) -> Result<(), ClientError> {
        persist.set_persisted(&self.store.snapshot()).await?;
        Ok(())
    }

    /// Replace the model with what was saved.
    pub async fn restore(&self, persist: &PersistStore) -> Result<(), ClientError> {
        self.store.restore(persist.get_persisted().await?);
        Ok(())
    }

    async fn send(&self, message: Outbound) -> Result<(), ClientError> {
        let name = message.command.message_type();
        self.transport.send(message).await.map_err(|e| {
            warn!(command = name, error = %e, "command failed");
            ClientError::from(e)
        })
    }
}
