//! The single authoritative in-memory model of the remote hardware.
//!
//! [`StateStore`] is a cheap cloneable handle. Every collection lives in a
//! [`tokio::sync::watch`] channel, so readers can either take a snapshot or
//! subscribe and be woken on change. Writes are last-message-wins with no
//! versioning and no validation; inbound updates are applied in the order the
//! transport delivers them.

use crate::persist::PersistedState;
use mesh_types::{
    ChannelKey, Inbound, MeshNode, MeshUpdate, NodeId, NodePatch, RelayChannel, RelayPatch,
    RelayUpdate, Sequence, SequenceId, SequencePatch, SequenceStatus, SequenceUpdate,
    SystemMetrics,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Relay channels keyed by owning node and channel id.
pub type RelayMap = BTreeMap<ChannelKey, RelayChannel>;
/// Mesh nodes keyed by id.
pub type NodeMap = BTreeMap<NodeId, MeshNode>;
/// Sequences keyed by id.
pub type SequenceMap = BTreeMap<SequenceId, Sequence>;

/// A whole collection, replacing what the store holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    /// Every channel of one node.
    Relays {
        /// Node whose channels are replaced.
        node_id: NodeId,
        /// The new channel set.
        items: Vec<RelayChannel>,
    },
    /// The full node set.
    Nodes(Vec<MeshNode>),
    /// The full sequence list.
    Sequences(Vec<Sequence>),
}

/// A partial update for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPatch {
    /// One relay channel.
    Relay {
        /// Owning node.
        node_id: NodeId,
        /// Fields to change.
        patch: RelayPatch,
    },
    /// One mesh node.
    Node {
        /// Node id.
        id: NodeId,
        /// Fields to change.
        patch: NodePatch,
    },
    /// One sequence.
    Sequence(SequencePatch),
}

/// Shared handle to the synchronized state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

struct Inner {
    relays: watch::Sender<RelayMap>,
    nodes: watch::Sender<NodeMap>,
    sequences: watch::Sender<SequenceMap>,
    metrics: watch::Sender<SystemMetrics>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("relays", &self.inner.relays.borrow().len())
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("sequences", &self.inner.sequences.borrow().len())
            .finish()
    }
}

impl StateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                relays: watch::Sender::new(RelayMap::new()),
                nodes: watch::Sender::new(NodeMap::new()),
                sequences: watch::Sender::new(SequenceMap::new()),
                metrics: watch::Sender::new(SystemMetrics::default()),
            }),
        }
    }

    /// A store seeded from persisted state.
    pub fn from_persisted(state: PersistedState) -> Self {
        let store = Self::new();
        store.restore(state);
        store
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// One relay channel.
    pub fn relay(&self, key: &ChannelKey) -> Option<RelayChannel> {
        self.inner.relays.borrow().get(key).cloned()
    }

    /// Every relay channel, ordered by node then channel id.
    pub fn relays(&self) -> Vec<RelayChannel> {
        self.inner.relays.borrow().values().cloned().collect()
    }

    /// The channels owned by one node.
    pub fn relays_of(&self, node_id: &NodeId) -> Vec<RelayChannel> {
        self.inner
            .relays
            .borrow()
            .values()
            .filter(|r| &r.node_id == node_id)
            .cloned()
            .collect()
    }

    /// One mesh node.
    pub fn node(&self, id: &NodeId) -> Option<MeshNode> {
        self.inner.nodes.borrow().get(id).cloned()
    }

    /// Every mesh node, ordered by id.
    pub fn nodes(&self) -> Vec<MeshNode> {
        self.inner.nodes.borrow().values().cloned().collect()
    }

    /// One sequence.
    pub fn sequence(&self, id: &SequenceId) -> Option<Sequence> {
        self.inner.sequences.borrow().get(id).cloned()
    }

    /// Every sequence, oldest first.
    pub fn sequences(&self) -> Vec<Sequence> {
        let mut all: Vec<Sequence> = self.inner.sequences.borrow().values().cloned().collect();
        all.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// The latest metrics snapshot.
    pub fn metrics(&self) -> SystemMetrics {
        self.inner.metrics.borrow().clone()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Watch the relay channels.
    pub fn subscribe_relays(&self) -> watch::Receiver<RelayMap> {
        self.inner.relays.subscribe()
    }

    /// Watch the mesh nodes.
    pub fn subscribe_nodes(&self) -> watch::Receiver<NodeMap> {
        self.inner.nodes.subscribe()
    }

    /// Watch the sequences.
    pub fn subscribe_sequences(&self) -> watch::Receiver<SequenceMap> {
        self.inner.sequences.subscribe()
    }

    /// Watch the metrics snapshot.
    pub fn subscribe_metrics(&self) -> watch::Receiver<SystemMetrics> {
        self.inner.metrics.subscribe()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Replace a whole collection. Entities missing from `collection` are gone.
    pub fn replace_collection(&self, collection: Collection) {
        match collection {
            Collection::Relays { node_id, items } => {
                self.inner.relays.send_modify(|relays| {
                    relays.retain(|key, _| key.node_id != node_id);
                    for mut relay in items {
                        relay.node_id = node_id.clone();
                        relays.insert(ChannelKey::new(node_id.clone(), relay.id), relay);
                    }
                });
            }
            Collection::Nodes(items) => {
                self.inner
                    .nodes
                    .send_replace(items.into_iter().map(|n| (n.id.clone(), n)).collect());
            }
            Collection::Sequences(items) => {
                self.inner
                    .sequences
                    .send_replace(items.into_iter().map(|s| (s.id.clone(), s)).collect());
            }
        }
    }

    /// Shallow-merge a partial update, inserting the entity with defaults when
    /// it is not known yet.
    pub fn merge_entity(&self, patch: EntityPatch) {
        match patch {
            EntityPatch::Relay { node_id, patch } => {
                let key = ChannelKey::new(node_id, patch.id);
                self.inner.relays.send_modify(|relays| {
                    let relay = relays
                        .entry(key.clone())
                        .or_insert_with(|| RelayChannel::new(key.node_id.clone(), key.relay_id));
                    relay.apply(&patch);
                    relay.id = key.relay_id;
                    relay.node_id = key.node_id.clone();
                });
            }
            EntityPatch::Node { id, patch } => {
                self.inner.nodes.send_modify(|nodes| {
                    let node = nodes
                        .entry(id.clone())
                        .or_insert_with(|| MeshNode::new(id.clone()));
                    node.apply(&patch);
                });
            }
            EntityPatch::Sequence(patch) => {
                self.inner.sequences.send_modify(|sequences| {
                    let sequence = sequences.entry(patch.id.clone()).or_insert_with(|| {
                        let mut fresh = Sequence::new(patch.id.to_string(), 0);
                        fresh.id = patch.id.clone();
                        fresh
                    });
                    sequence.apply(&patch);
                });
            }
        }
    }

    /// Replace the metrics snapshot wholesale.
    pub fn replace_metrics(&self, metrics: SystemMetrics) {
        self.inner.metrics.send_replace(metrics);
    }

    /// Insert or overwrite one sequence.
    pub fn put_sequence(&self, sequence: Sequence) {
        self.inner.sequences.send_modify(|sequences| {
            sequences.insert(sequence.id.clone(), sequence);
        });
    }

    /// Remove one sequence, returning it.
    pub fn remove_sequence(&self, id: &SequenceId) -> Option<Sequence> {
        let mut removed = None;
        self.inner.sequences.send_if_modified(|sequences| {
            removed = sequences.remove(id);
            removed.is_some()
        });
        removed
    }

    /// Apply a message from the controller.
    ///
    /// Arrays replace a collection, objects merge into one entity keyed by
    /// the envelope `nodeId` or the payload `id`.
    pub fn apply_inbound(&self, message: &Inbound) {
        match message {
            Inbound::SystemMetrics(metrics) => self.replace_metrics(metrics.clone()),
            Inbound::MeshUpdate { node_id, update } => match update {
                MeshUpdate::Replace(nodes) => {
                    self.replace_collection(Collection::Nodes(nodes.clone()))
                }
                MeshUpdate::Merge(patch) => match node_id.clone().or_else(|| patch.id.clone()) {
                    Some(id) => self.merge_entity(EntityPatch::Node {
                        id,
                        patch: patch.clone(),
                    }),
                    None => warn!("meshUpdate without a node id, ignored"),
                },
            },
            Inbound::RelayUpdate { node_id, update } => match update {
                RelayUpdate::Replace(items) => self.replace_collection(Collection::Relays {
                    node_id: node_id.clone().unwrap_or_default(),
                    items: items.clone(),
                }),
                RelayUpdate::Merge(patch) => self.merge_entity(EntityPatch::Relay {
                    node_id: node_id
                        .clone()
                        .or_else(|| patch.node_id.clone())
                        .unwrap_or_default(),
                    patch: patch.clone(),
                }),
            },
            Inbound::SequenceUpdate(update) => match update {
                SequenceUpdate::Replace(items) => {
                    self.replace_collection(Collection::Sequences(items.clone()))
                }
                SequenceUpdate::Merge(patch) => {
                    self.merge_entity(EntityPatch::Sequence(patch.clone()))
                }
            },
            Inbound::Error(report) => {
                warn!(code = %report.code, message = %report.message, "controller reported an error")
            }
            Inbound::Heartbeat => debug!("controller heartbeat"),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Copy the persistable parts of the model.
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            relays: self.relays(),
            mesh_nodes: self.nodes(),
            sequences: self.sequences(),
            last_known_metrics: self.metrics(),
        }
    }

    /// Replace the whole model with persisted state.
    ///
    /// A sequence saved mid-run cannot still be running, so it comes back ready.
    pub fn restore(&self, state: PersistedState) {
        self.inner.relays.send_replace(
            state
                .relays
                .into_iter()
                .map(|r| (ChannelKey::new(r.node_id.clone(), r.id), r))
                .collect(),
        );
        self.replace_collection(Collection::Nodes(state.mesh_nodes));
        self.replace_collection(Collection::Sequences(
            state
                .sequences
                .into_iter()
                .map(|mut s| {
                    if s.status == SequenceStatus::Running {
                        s.status = SequenceStatus::Ready;
                    }
                    s
                })
                .collect(),
        ));
        self.replace_metrics(state.last_known_metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::{RelayStatus, SequenceStep};

    fn relay_update(node: Option<&str>, patch: RelayPatch) -> Inbound {
        Inbound::RelayUpdate {
            node_id: node.map(NodeId::new),
            update: RelayUpdate::Merge(patch),
        }
    }

    // ========================================================================
    // Relays
    // ========================================================================

    #[test]
    fn merge_inserts_unknown_relay_with_defaults() {
        let store = StateStore::new();
        store.apply_inbound(&relay_update(
            None,
            RelayPatch::status(3u32, RelayStatus::Fired),
        ));

        let relay = store.relay(&ChannelKey::local(3u32)).unwrap();
        assert_eq!(relay.status, RelayStatus::Fired);
        assert_eq!(relay.name, "Relay 3");
        assert_eq!(relay.voltage, 12.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let store = StateStore::from_persisted(PersistedState::default());
        let update = relay_update(None, RelayPatch::status(2u32, RelayStatus::Ready));

        store.apply_inbound(&update);
        let once = store.snapshot();
        store.apply_inbound(&update);
        assert_eq!(store.snapshot(), once);
    }

    #[test]
    fn relays_keyed_per_node() {
        let store = StateStore::new();
        store.apply_inbound(&relay_update(
            Some("node_1"),
            RelayPatch::status(1u32, RelayStatus::Staged),
        ));
        store.apply_inbound(&relay_update(
            None,
            RelayPatch::status(1u32, RelayStatus::Fired),
        ));

        assert_eq!(
            store.relay(&ChannelKey::new("node_1", 1u32)).unwrap().status,
            RelayStatus::Staged
        );
        assert_eq!(
            store.relay(&ChannelKey::local(1u32)).unwrap().status,
            RelayStatus::Fired
        );
    }

    #[test]
    fn replace_only_touches_addressed_node() {
        let store = StateStore::from_persisted(PersistedState::default());
        store.apply_inbound(&Inbound::RelayUpdate {
            node_id: Some(NodeId::new("node_2")),
            update: RelayUpdate::Replace(vec![RelayChannel::new("node_2", 1u32)]),
        });
        assert_eq!(store.relays().len(), 7);

        store.apply_inbound(&Inbound::RelayUpdate {
            node_id: None,
            update: RelayUpdate::Replace(vec![RelayChannel::new("ignored", 9u32)]),
        });
        let local = store.relays_of(&NodeId::local());
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id.value(), 9);
        assert!(local[0].node_id.is_local());
        assert_eq!(store.relays_of(&NodeId::new("node_2")).len(), 1);
    }

    // ========================================================================
    // Nodes, sequences, metrics
    // ========================================================================

    #[test]
    fn mesh_replace_then_merge() {
        let store = StateStore::new();
        store.apply_inbound(&Inbound::MeshUpdate {
            node_id: None,
            update: MeshUpdate::Replace(vec![MeshNode::new("a"), MeshNode::new("b")]),
        });
        store.apply_inbound(&Inbound::MeshUpdate {
            node_id: Some(NodeId::new("b")),
            update: MeshUpdate::Merge(NodePatch {
                rssi: Some(-61.0),
                ..NodePatch::default()
            }),
        });

        assert_eq!(store.nodes().len(), 2);
        assert_eq!(store.node(&NodeId::new("b")).unwrap().rssi, -61.0);

        store.apply_inbound(&Inbound::MeshUpdate {
            node_id: None,
            update: MeshUpdate::Replace(vec![MeshNode::new("c")]),
        });
        assert!(store.node(&NodeId::new("a")).is_none());
    }

    #[test]
    fn node_merge_without_id_is_dropped() {
        let store = StateStore::new();
        store.apply_inbound(&Inbound::MeshUpdate {
            node_id: None,
            update: MeshUpdate::Merge(NodePatch::default()),
        });
        assert!(store.nodes().is_empty());
    }

    #[test]
    fn sequence_merge_and_removal() {
        let store = StateStore::new();
        let seq = Sequence::new("finale", 10);
        store.put_sequence(seq.clone());
        store.apply_inbound(&Inbound::SequenceUpdate(SequenceUpdate::Merge(
            SequencePatch::status(seq.id.clone(), SequenceStatus::Completed),
        )));

        assert_eq!(
            store.sequence(&seq.id).unwrap().status,
            SequenceStatus::Completed
        );
        assert!(store.remove_sequence(&seq.id).is_some());
        assert!(store.remove_sequence(&seq.id).is_none());
    }

    #[test]
    fn metrics_replaced_wholesale() {
        let store = StateStore::new();
        let metrics = SystemMetrics {
            cpu_usage: 42.0,
            ..SystemMetrics::default()
        };
        store.apply_inbound(&Inbound::SystemMetrics(metrics.clone()));
        assert_eq!(store.metrics(), metrics);
    }

    #[tokio::test]
    async fn subscribers_are_woken() {
        let store = StateStore::new();
        let mut rx = store.subscribe_relays();
        store.apply_inbound(&relay_update(
            None,
            RelayPatch::status(1u32, RelayStatus::Staged),
        ));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    #[test]
    fn snapshot_round_trip_resets_running_sequences() {
        let store = StateStore::from_persisted(PersistedState::default());
        let mut seq = Sequence::new("show", 1);
        seq.steps.push(SequenceStep::new("local", 1u32, 0.5));
        seq.status = SequenceStatus::Running;
        store.put_sequence(seq.clone());

        let restored = StateStore::from_persisted(store.snapshot());
        assert_eq!(restored.relays().len(), 6);
        let back = restored.sequence(&seq.id).unwrap();
        assert_eq!(back.status, SequenceStatus::Ready);
        assert_eq!(back.steps, seq.steps);
    }
}
