//! # relaymesh-client
//!
//! Client library for operating a wirelessly meshed relay bank.
//!
//! This is the main library that applications use to talk to a relay
//! controller.
//!
//! ## Features
//!
//! - **Live link**: WebSocket with heartbeat and linear reconnect backoff
//! - **Simulation**: drop-in transport with synthetic telemetry, latency and faults
//! - **Synchronized state**: one store fed by inbound updates, watchable per collection
//! - **Safety interlocks**: confirmation countdown before any fire
//! - **Sequences**: ordered, timed firing across nodes
//! - **Pure State Machines**: uses relaymesh-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use relaymesh_client::{ClientConfig, RelayClient, StateStore};
//! use relaymesh_types::ChannelKey;
//!
//! let config = ClientConfig::from_file("relaymesh.toml".as_ref())?;
//! let client = RelayClient::from_config(config, None, StateStore::default());
//!
//! client.connect().await?;
//! client.fire(&ChannelKey::local(1u32), 0.0)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod persist;
pub mod relay;
pub mod sequencer;
pub mod store;
pub mod transport;

pub use client::{ClientError, RelayClient, TransportKind};
pub use config::{ClientConfig, ConfigError};
pub use persist::{PersistError, PersistStore, PersistedState};
pub use relay::{ControllerEvent, RelayController, RelaySettings};
pub use sequencer::SequenceRunner;
pub use store::{Collection, EntityPatch, StateStore};
pub use transport::{
    DeviceFault, EventHandler, MockTransport, SimulatedDeviceError, SimulatedTransport,
    SimulationSettings, Transport, TransportError, TransportEvent, WsTransport,
};
