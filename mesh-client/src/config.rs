//! Configuration loading for relaymesh clients.
//!
//! Configuration is loaded from a TOML file (default: `relaymesh.toml`).
//! Every section and field may be omitted.

use crate::relay::RelaySettings;
use crate::transport::SimulationSettings;
use mesh_core::{ReconnectPolicy, DEFAULT_MAX_STEPS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Controller address used when the client is served from a local host.
pub const DEFAULT_CONTROLLER_HOST: &str = "192.168.4.1";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ClientConfig {
    /// Link to the controller.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Fire and sequence limits.
    #[serde(default)]
    pub relay: RelayLimitsConfig,
    /// Simulated transport.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Local state on disk.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Link configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    /// Controller host. Falls back to the serving host, then the access point.
    pub host: Option<String>,
    /// Controller port (default: 81).
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path (default: `/ws`).
    #[serde(default = "default_path")]
    pub path: String,
    /// Heartbeat interval in milliseconds (default: 5000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Reconnect delay unit in milliseconds; retry `n` waits `n` units (default: 1000).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Retries before the link is marked failed (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Fire and sequence limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayLimitsConfig {
    /// Confirmation ticks before a fire is sent (default: 3).
    #[serde(default = "default_countdown_ticks")]
    pub countdown_ticks: u32,
    /// Length of a countdown tick in milliseconds (default: 1000).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Largest accepted fire delay in seconds (default: 10).
    #[serde(default = "default_max_fire_delay_secs")]
    pub max_fire_delay_secs: f64,
    /// Most steps a sequence may hold (default: 50).
    #[serde(default = "default_max_sequence_steps")]
    pub max_sequence_steps: usize,
}

/// Simulated transport configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Use the simulated transport instead of a socket (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Apply artificial latency to sends (default: true).
    #[serde(default = "default_latency_enabled")]
    pub latency_enabled: bool,
    /// Lower latency bound in milliseconds (default: 50).
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,
    /// Upper latency bound in milliseconds (default: 150).
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Probability that a send fails (default: 0.01).
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    /// Telemetry push interval in milliseconds (default: 1000).
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Synthetic mesh nodes (default: 3).
    #[serde(default = "default_node_count")]
    pub node_count: usize,
    /// Relay channels per synthetic node (default: 4).
    #[serde(default = "default_relays_per_node")]
    pub relays_per_node: u32,
    /// Fixed RNG seed for reproducible sessions.
    pub seed: Option<u64>,
}

/// Local state configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory for persisted records. The CLI picks a per-user directory when unset.
    pub data_dir: Option<PathBuf>,
}

// Default value functions
fn default_port() -> u16 {
    81
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_countdown_ticks() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_max_fire_delay_secs() -> f64 {
    10.0
}

fn default_max_sequence_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_latency_enabled() -> bool {
    true
}

fn default_min_latency_ms() -> u64 {
    50
}

fn default_max_latency_ms() -> u64 {
    150
}

fn default_failure_rate() -> f64 {
    0.01
}

fn default_update_interval_ms() -> u64 {
    1000
}

fn default_node_count() -> usize {
    3
}

fn default_relays_per_node() -> u32 {
    4
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            path: default_path(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for RelayLimitsConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: default_countdown_ticks(),
            tick_interval_ms: default_tick_interval_ms(),
            max_fire_delay_secs: default_max_fire_delay_secs(),
            max_sequence_steps: default_max_sequence_steps(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            latency_enabled: default_latency_enabled(),
            min_latency_ms: default_min_latency_ms(),
            max_latency_ms: default_max_latency_ms(),
            failure_rate: default_failure_rate(),
            update_interval_ms: default_update_interval_ms(),
            node_count: default_node_count(),
            relays_per_node: default_relays_per_node(),
            seed: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds
    /// values no client could run with.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid(reason.to_string()));
        if self.connection.max_reconnect_attempts == 0 {
            return invalid("connection.max_reconnect_attempts must be at least 1");
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return invalid("connection.heartbeat_interval_ms must be positive");
        }
        if self.relay.countdown_ticks == 0 {
            return invalid("relay.countdown_ticks must be at least 1");
        }
        if !(self.relay.max_fire_delay_secs.is_finite() && self.relay.max_fire_delay_secs >= 0.0) {
            return invalid("relay.max_fire_delay_secs must be zero or more");
        }
        if !(0.0..=1.0).contains(&self.simulation.failure_rate) {
            return invalid("simulation.failure_rate must be between 0 and 1");
        }
        if self.simulation.min_latency_ms > self.simulation.max_latency_ms {
            return invalid("simulation.min_latency_ms must not exceed max_latency_ms");
        }
        if self.simulation.update_interval_ms == 0 {
            return invalid("simulation.update_interval_ms must be positive");
        }
        Ok(())
    }

    /// WebSocket URL of the controller.
    ///
    /// `serving_host` is the host the client itself was reached on, if any.
    /// A loopback host means the client is running off-device, so the
    /// controller's access-point address is used instead.
    pub fn resolve_endpoint(&self, serving_host: Option<&str>) -> String {
        let host = self
            .connection
            .host
            .as_deref()
            .or(serving_host)
            .filter(|h| !is_loopback(h))
            .unwrap_or(DEFAULT_CONTROLLER_HOST);
        format!(
            "ws://{}:{}{}",
            host, self.connection.port, self.connection.path
        )
    }

    /// Reconnect and heartbeat timing.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.connection.reconnect_base_delay_ms),
            max_attempts: self.connection.max_reconnect_attempts,
            heartbeat_interval: Duration::from_millis(self.connection.heartbeat_interval_ms),
        }
    }

    /// Countdown timing and fire limits.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            countdown_ticks: self.relay.countdown_ticks,
            tick_interval: Duration::from_millis(self.relay.tick_interval_ms),
            max_fire_delay: self.relay.max_fire_delay_secs,
        }
    }

    /// Simulated transport settings.
    pub fn simulation_settings(&self) -> SimulationSettings {
        let sim = &self.simulation;
        SimulationSettings {
            latency: sim.latency_enabled.then(|| {
                (
                    Duration::from_millis(sim.min_latency_ms),
                    Duration::from_millis(sim.max_latency_ms),
                )
            }),
            failure_rate: sim.failure_rate,
            update_interval: Duration::from_millis(sim.update_interval_ms),
            node_count: sim.node_count,
            relays_per_node: sim.relays_per_node,
            seed: sim.seed,
        }
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
