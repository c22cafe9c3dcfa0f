//! The hardware model: relay channels, mesh nodes, sequences and metrics.
//!
//! Every entity has a matching `*Patch` type with all-optional fields. Patches
//! are what the controller sends for partial updates and are applied as a
//! shallow merge (present fields overwrite, absent fields are kept).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NodeId, RelayId, SequenceId};

// ============================================================================
// Relay channels
// ============================================================================

/// Lifecycle status of a relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    /// Idle and armed.
    #[default]
    Ready,
    /// Staged on the device, waiting for fire.
    Staged,
    /// Confirmation countdown running.
    Timer,
    /// Fire dispatched.
    Firing,
    /// Fired; must be primed before it can fire again.
    Fired,
    /// Device reported a fault.
    Error,
    /// Disabled by the device.
    Disabled,
}

impl RelayStatus {
    /// Whether the channel has fired or is in the middle of firing.
    pub fn is_fired(&self) -> bool {
        matches!(self, RelayStatus::Fired | RelayStatus::Firing)
    }

    /// Whether the device has taken the channel out of service.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RelayStatus::Error | RelayStatus::Disabled)
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Ready => "ready",
            RelayStatus::Staged => "staged",
            RelayStatus::Timer => "timer",
            RelayStatus::Firing => "firing",
            RelayStatus::Fired => "fired",
            RelayStatus::Error => "error",
            RelayStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remotely controlled switch output with its telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayChannel {
    /// Channel id, unique within the owning node.
    pub id: RelayId,
    /// Owning node.
    pub node_id: NodeId,
    /// Display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: RelayStatus,
    /// Supply voltage (V).
    pub voltage: f64,
    /// Load current (A).
    pub current: f64,
    /// Channel temperature (°C).
    pub temperature: f64,
    /// Safety delay before a fire is allowed (s).
    #[serde(alias = "safetyDelay")]
    pub safety_delay_seconds: f64,
    /// Temperature above which the channel reports a warning (°C).
    pub max_temperature: f64,
    /// Whether the device re-arms the channel on its own after firing.
    pub auto_reset: bool,
    /// Current limit (A).
    pub current_limit: f64,
    /// Remaining countdown, when a timer is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<f64>,
    /// When the channel last fired (unix millis).
    #[serde(skip_serializing_if = "Option::is_none", alias = "lastFired")]
    pub last_fired_at: Option<u64>,
}

impl RelayChannel {
    /// A channel with factory defaults.
    pub fn new(node_id: impl Into<NodeId>, id: impl Into<RelayId>) -> Self {
        let id = id.into();
        Self {
            id,
            node_id: node_id.into(),
            name: format!("Relay {}", id),
            ..Self::default()
        }
    }

    /// The six channels of a freshly installed local controller.
    pub fn factory_bank() -> Vec<Self> {
        (1..=6).map(|i| Self::new(NodeId::local(), i)).collect()
    }

    /// Whether the channel is running hotter than its configured maximum.
    ///
    /// This is informational only and never changes the status.
    pub fn temperature_warning(&self) -> bool {
        self.temperature > self.max_temperature
    }

    /// Shallow-merge a partial update onto this channel.
    pub fn apply(&mut self, patch: &RelayPatch) {
        if let Some(node_id) = &patch.node_id {
            self.node_id = node_id.clone();
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(v) = patch.voltage {
            self.voltage = v;
        }
        if let Some(v) = patch.current {
            self.current = v;
        }
        if let Some(v) = patch.temperature {
            self.temperature = v;
        }
        if let Some(v) = patch.safety_delay_seconds {
            self.safety_delay_seconds = v;
        }
        if let Some(v) = patch.max_temperature {
            self.max_temperature = v;
        }
        if let Some(v) = patch.auto_reset {
            self.auto_reset = v;
        }
        if let Some(v) = patch.current_limit {
            self.current_limit = v;
        }
        if let Some(v) = patch.time_left {
            self.time_left = Some(v);
        }
        if let Some(v) = patch.last_fired_at {
            self.last_fired_at = Some(v);
        }
    }
}

impl Default for RelayChannel {
    fn default() -> Self {
        Self {
            id: RelayId::default(),
            node_id: NodeId::local(),
            name: String::new(),
            status: RelayStatus::Ready,
            voltage: 12.0,
            current: 0.0,
            temperature: 25.0,
            safety_delay_seconds: 3.0,
            max_temperature: 85.0,
            auto_reset: false,
            current_limit: 10.0,
            time_left: None,
            last_fired_at: None,
        }
    }
}

/// Partial update for a [`RelayChannel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPatch {
    /// Channel being updated.
    pub id: RelayId,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RelayStatus>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "safetyDelay")]
    pub safety_delay_seconds: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reset: Option<bool>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limit: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "lastFired")]
    pub last_fired_at: Option<u64>,
}

impl RelayPatch {
    /// A patch that only sets the status.
    pub fn status(id: impl Into<RelayId>, status: RelayStatus) -> Self {
        Self {
            id: id.into(),
            status: Some(status),
            ..Self::default()
        }
    }
}

// ============================================================================
// Mesh nodes
// ============================================================================

/// Whether a mesh node is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node is up and participating in the mesh.
    #[default]
    Active,
    /// Node has dropped out.
    Inactive,
}

/// Position of a node in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Mesh root (at most one, not enforced here).
    Root,
    /// Intermediate node.
    #[default]
    Node,
    /// Leaf node.
    Leaf,
}

/// Logical position, used for display only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[allow(missing_docs)]
    pub x: f64,
    #[allow(missing_docs)]
    pub y: f64,
}

/// One physical controller unit in the wireless mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshNode {
    /// Node id.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Received signal strength (dBm).
    pub rssi: f64,
    /// Reachability.
    pub status: NodeStatus,
    /// Battery level (%).
    pub battery_level: f64,
    /// Signal strength (%).
    pub signal_strength: f64,
    /// Display position.
    pub position: Position,
    /// Mesh role.
    #[serde(alias = "meshRole")]
    pub role: NodeRole,
    /// Firmware version string.
    pub firmware_version: String,
    /// IP address on the mesh network.
    pub ip_address: String,
    /// Hardware address.
    pub mac_address: String,
    /// Relay channels hosted by this node.
    pub relays: Vec<RelayId>,
    /// When the node was last heard from (unix millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

impl MeshNode {
    /// A node with default telemetry.
    pub fn new(id: impl Into<NodeId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            ..Self::default()
        }
    }

    /// Whether the node is reachable.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Shallow-merge a partial update onto this node.
    pub fn apply(&mut self, patch: &NodePatch) {
        if let Some(v) = &patch.name {
            self.name = v.clone();
        }
        if let Some(v) = patch.rssi {
            self.rssi = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.battery_level {
            self.battery_level = v;
        }
        if let Some(v) = patch.signal_strength {
            self.signal_strength = v;
        }
        if let Some(v) = patch.position {
            self.position = v;
        }
        if let Some(v) = patch.role {
            self.role = v;
        }
        if let Some(v) = &patch.firmware_version {
            self.firmware_version = v.clone();
        }
        if let Some(v) = &patch.ip_address {
            self.ip_address = v.clone();
        }
        if let Some(v) = &patch.mac_address {
            self.mac_address = v.clone();
        }
        if let Some(v) = &patch.relays {
            self.relays = v.clone();
        }
        if let Some(v) = patch.last_seen {
            self.last_seen = Some(v);
        }
    }
}

impl Default for MeshNode {
    fn default() -> Self {
        Self {
            id: NodeId::local(),
            name: String::new(),
            rssi: -100.0,
            status: NodeStatus::Active,
            battery_level: 100.0,
            signal_strength: 0.0,
            position: Position::default(),
            role: NodeRole::Node,
            firmware_version: String::new(),
            ip_address: String::new(),
            mac_address: String::new(),
            relays: Vec::new(),
            last_seen: None,
        }
    }
}

/// Partial update for a [`MeshNode`].
///
/// The id may be omitted when the envelope carries `nodeId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct NodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "meshRole")]
    pub role: Option<NodeRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relays: Option<Vec<RelayId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

// ============================================================================
// Sequences
// ============================================================================

/// Run status of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceStatus {
    /// Not running.
    #[default]
    Ready,
    /// Steps are being executed.
    Running,
    /// All steps fired.
    Completed,
    /// A step failed and the run was abandoned.
    Error,
}

/// One timed fire within a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStep {
    /// Channel to fire.
    pub relay_id: RelayId,
    /// Node hosting the channel.
    #[serde(default)]
    pub node_id: NodeId,
    /// Wait before this step fires (s).
    #[serde(rename = "delay", alias = "delaySeconds")]
    pub delay_seconds: f64,
}

impl SequenceStep {
    /// Create a step.
    pub fn new(node_id: impl Into<NodeId>, relay_id: impl Into<RelayId>, delay_seconds: f64) -> Self {
        Self {
            relay_id: relay_id.into(),
            node_id: node_id.into(),
            delay_seconds,
        }
    }
}

/// An ordered, timed plan of fire operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    /// Sequence id.
    pub id: SequenceId,
    /// Display name.
    pub name: String,
    /// Steps, executed strictly in order.
    #[serde(default)]
    pub steps: Vec<SequenceStep>,
    /// Run status.
    #[serde(default)]
    pub status: SequenceStatus,
    /// Creation time (unix millis).
    #[serde(default)]
    pub created: u64,
    /// Completion time of the last successful run (unix millis).
    #[serde(default)]
    pub last_run: Option<u64>,
}

impl Sequence {
    /// Create an empty sequence with a fresh id.
    pub fn new(name: impl Into<String>, created: u64) -> Self {
        Self {
            id: SequenceId::random(),
            name: name.into(),
            steps: Vec::new(),
            status: SequenceStatus::Ready,
            created,
            last_run: None,
        }
    }

    /// Whether the sequence is currently executing.
    pub fn is_running(&self) -> bool {
        self.status == SequenceStatus::Running
    }

    /// Shallow-merge a partial update onto this sequence.
    pub fn apply(&mut self, patch: &SequencePatch) {
        if let Some(v) = &patch.name {
            self.name = v.clone();
        }
        if let Some(v) = &patch.steps {
            self.steps = v.clone();
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.created {
            self.created = v;
        }
        if let Some(v) = patch.last_run {
            self.last_run = Some(v);
        }
    }
}

/// Partial update for a [`Sequence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SequencePatch {
    pub id: SequenceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<SequenceStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SequenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<u64>,
}

impl SequencePatch {
    /// A patch that only sets the status.
    pub fn status(id: SequenceId, status: SequenceStatus) -> Self {
        Self {
            id,
            name: None,
            steps: None,
            status: Some(status),
            created: None,
            last_run: None,
        }
    }
}

// ============================================================================
// System metrics
// ============================================================================

/// Battery classification shown next to the metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BatteryStatus {
    Optimal,
    Good,
    Low,
    Critical,
}

/// Temperature classification shown next to the metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TemperatureStatus {
    Normal,
    Elevated,
    High,
    Critical,
}

/// Aggregate controller metrics. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMetrics {
    /// CPU usage (%).
    pub cpu_usage: f64,
    /// Memory usage (%).
    pub memory_usage: f64,
    /// Board temperature (°C).
    pub temperature: f64,
    /// Battery level (%).
    pub battery_level: f64,
    /// Signal strength (%).
    pub signal_strength: f64,
    /// Uptime (s).
    #[serde(alias = "uptime")]
    pub uptime_seconds: u64,
    /// Network load (%).
    pub network_load: f64,
    /// Mesh quality (%).
    pub mesh_quality: f64,
    /// Packet loss (%).
    pub packet_loss: f64,
    /// Round-trip latency (ms).
    #[serde(alias = "latency")]
    pub latency_ms: f64,
}

impl SystemMetrics {
    /// Classify the battery level.
    pub fn battery_status(&self) -> BatteryStatus {
        match self.battery_level {
            b if b > 75.0 => BatteryStatus::Optimal,
            b if b > 50.0 => BatteryStatus::Good,
            b if b > 25.0 => BatteryStatus::Low,
            _ => BatteryStatus::Critical,
        }
    }

    /// Classify the board temperature.
    pub fn temperature_status(&self) -> TemperatureStatus {
        match self.temperature {
            t if t < 50.0 => TemperatureStatus::Normal,
            t if t < 70.0 => TemperatureStatus::Elevated,
            t if t < 85.0 => TemperatureStatus::High,
            _ => TemperatureStatus::Critical,
        }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            temperature: 25.0,
            battery_level: 100.0,
            signal_strength: 0.0,
            uptime_seconds: 0,
            network_load: 0.0,
            mesh_quality: 0.0,
            packet_loss: 0.0,
            latency_ms: 0.0,
        }
    }
}
