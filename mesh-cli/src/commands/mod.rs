//! CLI command implementations.

pub mod mesh;
pub mod relay;
pub mod sequence;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};
use mesh_client::{ClientConfig, PersistStore, RelayClient, StateStore};
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the controller to answer a mesh scan.
pub const MESH_WAIT: Duration = Duration::from_secs(5);

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Client configuration after flag overrides.
    pub config: ClientConfig,
    /// Directory holding persisted state.
    pub data_dir: PathBuf,
}

impl AppContext {
    /// Bundle the configuration and data directory.
    pub fn new(config: ClientConfig, data_dir: PathBuf) -> Self {
        Self { config, data_dir }
    }

    /// Persisted state records.
    pub fn persist(&self) -> PersistStore {
        PersistStore::new(self.data_dir.clone())
    }

    /// A store seeded from the last saved state.
    pub async fn load_state(&self) -> Result<StateStore> {
        let state = self
            .persist()
            .get_persisted()
            .await
            .context("Failed to load saved state")?;
        Ok(StateStore::from_persisted(state))
    }

    /// Connect to the controller (or the simulation) with the saved state loaded.
    pub async fn open(&self) -> Result<Session> {
        let store = self.load_state().await?;
        let client = RelayClient::from_config(self.config.clone(), None, store);
        client
            .connect()
            .await
            .context("Failed to connect to controller")?;
        Ok(Session {
            client,
            persist: self.persist(),
        })
    }
}

/// A connected client that saves its state when finished.
pub struct Session {
    /// The connected client.
    pub client: RelayClient,
    persist: PersistStore,
}

impl Session {
    /// Save state and close the link.
    pub async fn finish(self) -> Result<()> {
        self.client
            .save(&self.persist)
            .await
            .context("Failed to save state")?;
        self.client.close().await.context("Failed to close link")?;
        Ok(())
    }
}
