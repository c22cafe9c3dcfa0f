//! Identity types for relaymesh.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node id used for relay channels that arrive without an owning node.
///
/// A single-controller installation never sends `nodeId`, so all of its
/// channels live under this id.
pub const LOCAL_NODE: &str = "local";

/// Identifier of a mesh node (e.g. `node_1`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id of the local (directly attached) controller.
    pub fn local() -> Self {
        Self(LOCAL_NODE.to_string())
    }

    /// Whether this is the local controller id.
    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_NODE
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a relay channel, unique within its owning node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(u32);

impl RelayId {
    /// Create a new RelayId.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayId({})", self.0)
    }
}

impl From<u32> for RelayId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier of a sequence.
///
/// Locally created sequences get a random UUIDv4; ids received from the
/// controller are kept verbatim.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(String);

impl SequenceId {
    /// Create a new random SequenceId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create a SequenceId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceId({})", self.0)
    }
}

impl From<&str> for SequenceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Addresses one relay channel across the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelKey {
    /// Owning node.
    pub node_id: NodeId,
    /// Channel id within the node.
    pub relay_id: RelayId,
}

impl ChannelKey {
    /// Create a key for a channel on a specific node.
    pub fn new(node_id: impl Into<NodeId>, relay_id: impl Into<RelayId>) -> Self {
        Self {
            node_id: node_id.into(),
            relay_id: relay_id.into(),
        }
    }

    /// Create a key for a channel on the local controller.
    pub fn local(relay_id: impl Into<RelayId>) -> Self {
        Self::new(NodeId::local(), relay_id)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.relay_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_defaults_to_local() {
        assert!(NodeId::default().is_local());
        assert!(!NodeId::new("node_1").is_local());
    }

    #[test]
    fn relay_id_serializes_as_number() {
        let json = serde_json::to_string(&RelayId::new(3)).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn random_sequence_ids_differ() {
        assert_ne!(SequenceId::random(), SequenceId::random());
    }

    #[test]
    fn channel_key_display() {
        let key = ChannelKey::new("node_2", 4u32);
        assert_eq!(key.to_string(), "node_2/4");
        assert_eq!(ChannelKey::local(1u32).to_string(), "local/1");
    }

    #[test]
    fn channel_keys_order_by_node_then_relay() {
        let mut keys = vec![
            ChannelKey::new("b", 1u32),
            ChannelKey::new("a", 2u32),
            ChannelKey::new("a", 1u32),
        ];
        keys.sort();
        assert_eq!(keys[0], ChannelKey::new("a", 1u32));
        assert_eq!(keys[2], ChannelKey::new("b", 1u32));
    }
}
