//! Configuration payloads pushed to the controller.
//!
//! These are the bodies of the `update_*_config` commands. Their shape is
//! checked by `relaymesh-core`'s validation before anything is sent.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{NodeRole, RelayId};

/// Per-channel relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Channel being configured.
    pub id: RelayId,
    /// Display name.
    pub name: String,
    /// Safety delay before a fire is allowed (s).
    pub safety_delay: f64,
    /// Warning temperature (°C).
    pub max_temperature: f64,
    /// Re-arm automatically after firing.
    pub auto_reset: bool,
    /// Supply voltage (V).
    pub voltage: f64,
    /// Current limit (A).
    pub current_limit: f64,
}

impl RelayConfig {
    /// Factory configuration for a channel.
    pub fn factory(id: impl Into<RelayId>) -> Self {
        let id = id.into();
        Self {
            id,
            name: format!("Relay {}", id),
            safety_delay: 3.0,
            max_temperature: 85.0,
            auto_reset: false,
            voltage: 12.0,
            current_limit: 10.0,
        }
    }
}

/// Wi-Fi and mesh radio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Access point SSID (1-32 chars).
    pub ssid: String,
    /// Wi-Fi channel (1-13).
    pub channel: u8,
    /// Transmit power (dBm, 0-20).
    pub tx_power: u8,
    /// Whether the mesh radio is enabled.
    pub mesh_enabled: bool,
    /// Mesh channel (1-13).
    pub mesh_channel: u8,
    /// Mesh password (at least 8 chars when set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_password: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "RelayMesh".to_string(),
            channel: 1,
            tx_power: 20,
            mesh_enabled: true,
            mesh_channel: 1,
            mesh_password: None,
        }
    }
}

/// Mesh participation settings for the local node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfig {
    /// Node name advertised on the mesh (1-32 chars).
    pub node_name: String,
    /// Requested role.
    pub node_role: NodeRole,
    /// Maximum peer connections (1-32).
    pub max_connections: u32,
    /// Forward traffic for other nodes.
    pub routing_enabled: bool,
    /// Reduce radio duty cycle.
    pub power_saving: bool,
    /// Rejoin automatically after losing the mesh.
    pub auto_reconnect: bool,
    /// Minimum RSSI for a usable link (dBm).
    pub signal_strength_threshold: i32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_name: "relay-node".to_string(),
            node_role: NodeRole::Node,
            max_connections: 10,
            routing_enabled: true,
            power_saving: false,
            auto_reconnect: true,
            signal_strength_threshold: -75,
        }
    }
}

/// Access control settings.
///
/// Secrets are opaque to this crate; they are validated for shape only.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Administrator password (at least 8 chars).
    pub admin_password: String,
    /// Payload encryption key (at least 16 chars).
    pub encryption_key: String,
    /// Require a second factor at login.
    pub two_factor_enabled: bool,
    /// Minutes of inactivity before the UI locks (0-60).
    pub auto_lock_timeout: u32,
    /// Require the firing PIN before every fire.
    pub require_pin_for_firing: bool,
    /// Six-digit firing PIN.
    pub firing_pin: String,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("admin_password", &"[REDACTED]")
            .field("encryption_key", &"[REDACTED]")
            .field("two_factor_enabled", &self.two_factor_enabled)
            .field("auto_lock_timeout", &self.auto_lock_timeout)
            .field("require_pin_for_firing", &self.require_pin_for_firing)
            .field("firing_pin", &"[REDACTED]")
            .finish()
    }
}

/// Operating profile of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum PerformanceMode {
    #[default]
    Balanced,
    Performance,
    Powersave,
}

/// Controller housekeeping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    /// CPU clock (MHz): 80, 160 or 240.
    pub cpu_frequency: u32,
    /// Allow deep sleep when idle.
    pub deep_sleep_enabled: bool,
    /// Idle minutes before deep sleep.
    pub sleep_threshold: u32,
    /// Drive the fan from the board temperature.
    pub fan_control_enabled: bool,
    /// Fan switch-on temperature (°C, 20-100).
    pub fan_threshold: u32,
    /// Keep an on-device log.
    pub logging_enabled: bool,
    /// Days of log to keep (1-30).
    pub log_retention_days: u32,
    /// Operating profile.
    pub performance_mode: PerformanceMode,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cpu_frequency: 240,
            deep_sleep_enabled: false,
            sleep_threshold: 30,
            fan_control_enabled: true,
            fan_threshold: 45,
            logging_enabled: true,
            log_retention_days: 7,
            performance_mode: PerformanceMode::Balanced,
        }
    }
}
