//! # relaymesh-core
//!
//! Pure logic for relaymesh (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of the relay-bank
//! client without any network or disk I/O:
//! - [`connection`] - link lifecycle with linear reconnect backoff
//! - [`relay`] - per-channel fire/confirm/prime interlocks
//! - [`sequence`] - ordered sequence runs and step editing
//! - [`topology`] - signal quality, distance, routing and mesh health
//! - [`validation`] - payload shape checks
//!
//! State machines take an event and return the next state plus a list of
//! actions. The actual I/O (sockets, timers, the store) is performed by
//! `relaymesh-client`, which interprets those actions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
mod error;
pub mod relay;
pub mod sequence;
pub mod topology;
pub mod validation;

pub use connection::{Action, ConnectionState, Event, LinkEvent, LinkStatus, ReconnectPolicy};
pub use error::{CommandRejected, FieldError, ValidationError};
pub use relay::{RelayAction, RelayEvent, RelayMachine, Revert, DEFAULT_COUNTDOWN_TICKS};
pub use sequence::{RunAction, RunEvent, SequenceEdit, SequenceRun, DEFAULT_MAX_STEPS};
pub use topology::{
    edge_weight, estimate_distance, find_route, mesh_links, network_health, rank_nodes,
    signal_quality, Environment, MeshLink, NetworkHealth, RankedNode,
};
pub use validation::{validate_fire_delay, validate_sequence, Validate};
