//! Last-known state kept on disk between sessions.
//!
//! Each collection is an independent JSON record in the data directory, so a
//! damaged or missing record only costs that one collection.

use mesh_types::{MeshNode, RelayChannel, Sequence, SystemMetrics};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Record holding the relay channels.
pub const RELAYS_FILE: &str = "relays.json";
/// Record holding the mesh nodes.
pub const MESH_NODES_FILE: &str = "mesh_nodes.json";
/// Record holding the sequences.
pub const SEQUENCES_FILE: &str = "sequences.json";
/// Record holding the last metrics snapshot.
pub const METRICS_FILE: &str = "last_known_metrics.json";

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Relay channels.
    pub relays: Vec<RelayChannel>,
    /// Mesh nodes.
    pub mesh_nodes: Vec<MeshNode>,
    /// Sequences.
    pub sequences: Vec<Sequence>,
    /// Last metrics snapshot.
    pub last_known_metrics: SystemMetrics,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            relays: RelayChannel::factory_bank(),
            mesh_nodes: Vec::new(),
            sequences: Vec::new(),
            last_known_metrics: SystemMetrics::default(),
        }
    }
}

impl PersistedState {
    /// Whether anything differs from a fresh install.
    pub fn has_recoverable_state(&self) -> bool {
        *self != Self::default()
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing a record failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Record path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A record could not be encoded or decoded.
    #[error("invalid record {path}: {source}")]
    Json {
        /// Record path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Reads and writes [`PersistedState`] in a data directory.
#[derive(Debug, Clone)]
pub struct PersistStore {
    dir: PathBuf,
}

impl PersistStore {
    /// Use `dir` for the records. It is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load every record, using defaults for missing ones.
    pub async fn get_persisted(&self) -> Result<PersistedState, PersistError> {
        let defaults = PersistedState::default();
        Ok(PersistedState {
            relays: self.read(RELAYS_FILE).await?.unwrap_or(defaults.relays),
            mesh_nodes: self
                .read(MESH_NODES_FILE)
                .await?
                .unwrap_or(defaults.mesh_nodes),
            sequences: self
                .read(SEQUENCES_FILE)
                .await?
                .unwrap_or(defaults.sequences),
            last_known_metrics: self
                .read(METRICS_FILE)
                .await?
                .unwrap_or(defaults.last_known_metrics),
        })
    }

    /// Write every record.
    pub async fn set_persisted(&self, state: &PersistedState) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PersistError::Io {
                path: self.dir.clone(),
                source,
            })?;
        self.write(RELAYS_FILE, &state.relays).await?;
        self.write(MESH_NODES_FILE, &state.mesh_nodes).await?;
        self.write(SEQUENCES_FILE, &state.sequences).await?;
        self.write(METRICS_FILE, &state.last_known_metrics).await?;
        Ok(())
    }

    /// Whether the stored records differ from a fresh install.
    pub async fn has_recoverable_state(&self) -> Result<bool, PersistError> {
        Ok(self.get_persisted().await?.has_recoverable_state())
    }

    /// Delete every record, going back to defaults.
    pub async fn clear(&self) -> Result<(), PersistError> {
        for name in [RELAYS_FILE, MESH_NODES_FILE, SEQUENCES_FILE, METRICS_FILE] {
            let path = self.dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(PersistError::Io { path, source }),
            }
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        let path = self.dir.join(name);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no persisted record");
                return Ok(None);
            }
            Err(source) => return Err(PersistError::Io { path, source }),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| PersistError::Json { path, source })
    }

    async fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), PersistError> {
        let path = self.dir.join(name);
        let contents = serde_json::to_string_pretty(value).map_err(|source| PersistError::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| PersistError::Io {
                path: path.clone(),
                source,
            })?;
        set_file_permissions_0600(&path).await
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<(), PersistError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|source| PersistError::Io {
                path: path.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
