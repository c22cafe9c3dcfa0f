//! Closed unions of every inbound message and outbound command.
//!
//! Dispatch on the envelope `type` string happens exactly once, here, in an
//! exhaustive match. Everything downstream works with [`Inbound`] and
//! [`Command`] values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Envelope, MeshConfig, MeshNode, NetworkConfig, NodeId, NodePatch, RelayChannel, RelayConfig,
    RelayId, RelayPatch, SecurityConfig, Sequence, SequencePatch, SystemConfig, SystemMetrics,
    WireError,
};

// ============================================================================
// Inbound
// ============================================================================

/// A `meshUpdate` payload: a full node list or a single-node partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeshUpdate {
    /// Replace the whole node collection.
    Replace(Vec<MeshNode>),
    /// Merge onto one node.
    Merge(NodePatch),
}

/// A `relayUpdate` payload: a full channel list or a single-channel partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayUpdate {
    /// Replace the channel collection of the addressed node.
    Replace(Vec<RelayChannel>),
    /// Merge onto one channel.
    Merge(RelayPatch),
}

/// A `sequenceUpdate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceUpdate {
    /// Replace the whole sequence collection.
    Replace(Vec<Sequence>),
    /// Merge onto one sequence.
    Merge(SequencePatch),
}

/// An `error` message reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceErrorReport {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Every message the controller can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `systemMetrics` - a complete metrics snapshot.
    SystemMetrics(SystemMetrics),
    /// `meshUpdate`
    MeshUpdate {
        /// Envelope `nodeId`, if any.
        node_id: Option<NodeId>,
        /// Payload.
        update: MeshUpdate,
    },
    /// `relayUpdate`
    RelayUpdate {
        /// Envelope `nodeId`, if any.
        node_id: Option<NodeId>,
        /// Payload.
        update: RelayUpdate,
    },
    /// `sequenceUpdate`
    SequenceUpdate(SequenceUpdate),
    /// `error`
    Error(DeviceErrorReport),
    /// `heartbeat`
    Heartbeat,
}

impl Inbound {
    /// Wire type string.
    pub fn message_type(&self) -> &'static str {
        match self {
            Inbound::SystemMetrics(_) => "systemMetrics",
            Inbound::MeshUpdate { .. } => "meshUpdate",
            Inbound::RelayUpdate { .. } => "relayUpdate",
            Inbound::SequenceUpdate(_) => "sequenceUpdate",
            Inbound::Error(_) => "error",
            Inbound::Heartbeat => "heartbeat",
        }
    }

    /// Decode the payload of an envelope.
    pub fn from_envelope(env: &Envelope) -> Result<Self, WireError> {
        let node_id = env.node_id.clone();
        match env.msg_type.as_str() {
            "systemMetrics" => Ok(Inbound::SystemMetrics(decode(env)?)),
            "meshUpdate" => Ok(Inbound::MeshUpdate {
                node_id,
                update: decode(env)?,
            }),
            "relayUpdate" => Ok(Inbound::RelayUpdate {
                node_id,
                update: decode(env)?,
            }),
            "sequenceUpdate" => Ok(Inbound::SequenceUpdate(decode(env)?)),
            "error" => Ok(Inbound::Error(decode(env)?)),
            "heartbeat" => Ok(Inbound::Heartbeat),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }

    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Self::from_envelope(&Envelope::from_json(text)?)
    }

    /// Wrap in an envelope, as the controller would send it.
    pub fn to_envelope(&self) -> Result<Envelope, WireError> {
        let (data, node_id) = match self {
            Inbound::SystemMetrics(m) => (encode(m)?, None),
            Inbound::MeshUpdate { node_id, update } => (encode(update)?, node_id.clone()),
            Inbound::RelayUpdate { node_id, update } => (encode(update)?, node_id.clone()),
            Inbound::SequenceUpdate(u) => (encode(u)?, None),
            Inbound::Error(e) => (encode(e)?, None),
            Inbound::Heartbeat => (Value::Null, None),
        };
        Ok(Envelope::new(self.message_type(), data).with_node(node_id))
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Every command this client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `fire_relay{id, delay}`
    FireRelay {
        /// Channel to fire.
        id: RelayId,
        /// Requested delay (s).
        delay: f64,
    },
    /// `prime_relay{id}`
    PrimeRelay {
        /// Channel to re-arm.
        id: RelayId,
    },
    /// `stage_relay{id}`
    StageRelay {
        /// Channel to stage.
        id: RelayId,
    },
    /// `update_relay_config`
    UpdateRelayConfig(RelayConfig),
    /// `reset_relay_config{id}`
    ResetRelayConfig {
        /// Channel to restore to factory settings.
        id: RelayId,
    },
    /// `update_network_config`
    UpdateNetworkConfig(NetworkConfig),
    /// `update_mesh_config`
    UpdateMeshConfig(MeshConfig),
    /// `update_security_config`
    UpdateSecurityConfig(SecurityConfig),
    /// `update_system_config`
    UpdateSystemConfig(SystemConfig),
    /// `run_sequence{sequence}` - delegate a whole sequence to the device.
    RunSequence {
        /// Sequence to run.
        sequence: Sequence,
    },
    /// `stop_sequence`
    StopSequence,
    /// `scan_network`
    ScanNetwork,
    /// `connect_node{id}`
    ConnectNode {
        /// Node to join.
        id: NodeId,
    },
    /// `update_node_config{id, config}`
    UpdateNodeConfig {
        /// Node to update.
        id: NodeId,
        /// Fields to change.
        config: NodePatch,
    },
    /// `heartbeat` - liveness ping, never acknowledged.
    Heartbeat,
}

#[derive(Serialize, Deserialize)]
struct IdPayload<T> {
    id: T,
}

#[derive(Serialize, Deserialize)]
struct FirePayload {
    id: RelayId,
    delay: f64,
}

#[derive(Serialize, Deserialize)]
struct RunPayload {
    sequence: Sequence,
}

#[derive(Serialize, Deserialize)]
struct NodeConfigPayload {
    id: NodeId,
    config: NodePatch,
}

impl Command {
    /// Wire type string.
    pub fn message_type(&self) -> &'static str {
        match self {
            Command::FireRelay { .. } => "fire_relay",
            Command::PrimeRelay { .. } => "prime_relay",
            Command::StageRelay { .. } => "stage_relay",
            Command::UpdateRelayConfig(_) => "update_relay_config",
            Command::ResetRelayConfig { .. } => "reset_relay_config",
            Command::UpdateNetworkConfig(_) => "update_network_config",
            Command::UpdateMeshConfig(_) => "update_mesh_config",
            Command::UpdateSecurityConfig(_) => "update_security_config",
            Command::UpdateSystemConfig(_) => "update_system_config",
            Command::RunSequence { .. } => "run_sequence",
            Command::StopSequence => "stop_sequence",
            Command::ScanNetwork => "scan_network",
            Command::ConnectNode { .. } => "connect_node",
            Command::UpdateNodeConfig { .. } => "update_node_config",
            Command::Heartbeat => "heartbeat",
        }
    }

    /// Encode the `data` field.
    pub fn payload(&self) -> Result<Value, WireError> {
        match self {
            Command::FireRelay { id, delay } => encode(&FirePayload {
                id: *id,
                delay: *delay,
            }),
            Command::PrimeRelay { id }
            | Command::StageRelay { id }
            | Command::ResetRelayConfig { id } => encode(&IdPayload { id: *id }),
            Command::UpdateRelayConfig(c) => encode(c),
            Command::UpdateNetworkConfig(c) => encode(c),
            Command::UpdateMeshConfig(c) => encode(c),
            Command::UpdateSecurityConfig(c) => encode(c),
            Command::UpdateSystemConfig(c) => encode(c),
            Command::RunSequence { sequence } => encode(&RunPayload {
                sequence: sequence.clone(),
            }),
            Command::ConnectNode { id } => encode(&IdPayload { id: id.clone() }),
            Command::UpdateNodeConfig { id, config } => encode(&NodeConfigPayload {
                id: id.clone(),
                config: config.clone(),
            }),
            Command::StopSequence | Command::ScanNetwork | Command::Heartbeat => Ok(Value::Null),
        }
    }

    /// Decode a command from an envelope, as the controller would.
    pub fn from_envelope(env: &Envelope) -> Result<Self, WireError> {
        match env.msg_type.as_str() {
            "fire_relay" => {
                let p: FirePayload = decode(env)?;
                Ok(Command::FireRelay {
                    id: p.id,
                    delay: p.delay,
                })
            }
            "prime_relay" => Ok(Command::PrimeRelay {
                id: decode::<IdPayload<RelayId>>(env)?.id,
            }),
            "stage_relay" => Ok(Command::StageRelay {
                id: decode::<IdPayload<RelayId>>(env)?.id,
            }),
            "update_relay_config" => Ok(Command::UpdateRelayConfig(decode(env)?)),
            "reset_relay_config" => Ok(Command::ResetRelayConfig {
                id: decode::<IdPayload<RelayId>>(env)?.id,
            }),
            "update_network_config" => Ok(Command::UpdateNetworkConfig(decode(env)?)),
            "update_mesh_config" => Ok(Command::UpdateMeshConfig(decode(env)?)),
            "update_security_config" => Ok(Command::UpdateSecurityConfig(decode(env)?)),
            "update_system_config" => Ok(Command::UpdateSystemConfig(decode(env)?)),
            "run_sequence" => Ok(Command::RunSequence {
                sequence: decode::<RunPayload>(env)?.sequence,
            }),
            "stop_sequence" => Ok(Command::StopSequence),
            "scan_network" => Ok(Command::ScanNetwork),
            "connect_node" => Ok(Command::ConnectNode {
                id: decode::<IdPayload<NodeId>>(env)?.id,
            }),
            "update_node_config" => {
                let p: NodeConfigPayload = decode(env)?;
                Ok(Command::UpdateNodeConfig {
                    id: p.id,
                    config: p.config,
                })
            }
            "heartbeat" => Ok(Command::Heartbeat),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }
}

/// A command addressed to the local controller or to a mesh node.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Target node; `None` for the local controller.
    pub node_id: Option<NodeId>,
    /// The command.
    pub command: Command,
}

impl Outbound {
    /// A command for the local controller.
    pub fn local(command: Command) -> Self {
        Self {
            node_id: None,
            command,
        }
    }

    /// A command for a specific node. The local node id maps to no `nodeId`.
    pub fn to_node(node_id: &NodeId, command: Command) -> Self {
        Self {
            node_id: (!node_id.is_local()).then(|| node_id.clone()),
            command,
        }
    }

    /// The node this command is about, with `None` mapped to the local node.
    pub fn target(&self) -> NodeId {
        self.node_id.clone().unwrap_or_default()
    }

    /// Wrap in an envelope stamped with the current time.
    pub fn to_envelope(&self) -> Result<Envelope, WireError> {
        Ok(Envelope::new(self.command.message_type(), self.command.payload()?)
            .with_node(self.node_id.clone()))
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        self.to_envelope()?.to_json()
    }

    /// Decode from an envelope.
    pub fn from_envelope(env: &Envelope) -> Result<Self, WireError> {
        Ok(Self {
            node_id: env.node_id.clone(),
            command: Command::from_envelope(env)?,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(WireError::Serialization)
}

fn decode<T: DeserializeOwned>(env: &Envelope) -> Result<T, WireError> {
    serde_json::from_value(env.data.clone()).map_err(|source| WireError::InvalidPayload {
        msg_type: env.msg_type.clone(),
        source,
    })
}
