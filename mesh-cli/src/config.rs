//! Configuration management for relaymesh.

use anyhow::{Context, Result};
use mesh_client::ClientConfig;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the config directory.
pub const CONFIG_FILE: &str = "relaymesh.toml";

/// Load the client configuration.
///
/// An explicit path must exist. Without one, `relaymesh.toml` in the user
/// config directory is used when present, otherwise the defaults.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(ClientConfig::default()),
        },
    };
    ClientConfig::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Apply command-line flags on top of the file.
pub fn apply_overrides(config: &mut ClientConfig, simulate: bool, host: Option<String>) {
    if simulate {
        config.simulation.enabled = true;
    }
    if host.is_some() {
        config.connection.host = host;
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ydun", "relaymesh")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
