//! # relaymesh-types
//!
//! Wire format and entity types for the relaymesh relay-bank controller.
//!
//! This crate provides the foundational types used across all relaymesh crates:
//! - [`NodeId`], [`RelayId`], [`SequenceId`], [`ChannelKey`] - Identity types
//! - [`RelayChannel`], [`MeshNode`], [`Sequence`], [`SystemMetrics`] - The hardware model
//! - [`Envelope`] - The JSON frame exchanged with the controller
//! - [`Inbound`], [`Command`] - Closed unions of every message and command type
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;
mod model;
mod settings;

pub use envelope::{now_millis, Envelope};
pub use error::WireError;
pub use ids::{ChannelKey, NodeId, RelayId, SequenceId, LOCAL_NODE};
pub use messages::{
    Command, DeviceErrorReport, Inbound, MeshUpdate, Outbound, RelayUpdate, SequenceUpdate,
};
pub use model::{
    BatteryStatus, MeshNode, NodePatch, NodeRole, NodeStatus, Position, RelayChannel, RelayPatch,
    RelayStatus, Sequence, SequencePatch, SequenceStatus, SequenceStep, SystemMetrics,
    TemperatureStatus,
};
pub use settings::{
    MeshConfig, NetworkConfig, PerformanceMode, RelayConfig, SecurityConfig, SystemConfig,
};
