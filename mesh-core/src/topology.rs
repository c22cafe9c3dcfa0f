//! Mesh topology engine: link quality, distance, routing and health.
//!
//! Everything here is a pure function over a snapshot of [`MeshNode`]s.

use mesh_types::{MeshNode, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Edges at or above this weight are treated as unusable.
pub const MAX_EDGE_WEIGHT: f64 = 100.0;

const RSSI_FLOOR: f64 = -100.0;
const RSSI_CEILING: f64 = -50.0;
const MIN_DISTANCE_M: f64 = 0.1;
const MAX_DISTANCE_M: f64 = 1000.0;

// ============================================================================
// Signal and distance
// ============================================================================

/// Link quality in percent: -100 dBm maps to 0, -50 dBm to 100.
pub fn signal_quality(rssi: f64) -> u32 {
    let pct = (rssi - RSSI_FLOOR) / (RSSI_CEILING - RSSI_FLOOR) * 100.0;
    pct.clamp(0.0, 100.0).round() as u32
}

/// Propagation environment for distance estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Walls and furniture.
    Indoor,
    /// Open air.
    Outdoor,
    /// Partly obstructed.
    #[default]
    Mixed,
}

impl Environment {
    /// Reference RSSI at 1 m and the path-loss exponent for a reading.
    ///
    /// Weaker readings get a higher exponent to model more obstruction.
    fn model(&self, rssi: f64) -> (f64, f64) {
        match self {
            Environment::Indoor => {
                let n = if rssi > -60.0 {
                    2.5
                } else if rssi > -75.0 {
                    3.0
                } else {
                    3.5
                };
                (-40.0, n)
            }
            Environment::Outdoor => {
                let n = if rssi > -65.0 {
                    2.0
                } else if rssi > -80.0 {
                    2.5
                } else {
                    3.0
                };
                (-45.0, n)
            }
            Environment::Mixed => {
                let n = if rssi > -62.0 {
                    2.2
                } else if rssi > -77.0 {
                    2.8
                } else {
                    3.2
                };
                (-42.0, n)
            }
        }
    }

    fn correction(&self) -> f64 {
        match self {
            Environment::Indoor => 0.8,
            Environment::Outdoor => 1.2,
            Environment::Mixed => 1.0,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Indoor => "indoor",
            Environment::Outdoor => "outdoor",
            Environment::Mixed => "mixed",
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "indoor" => Ok(Environment::Indoor),
            "outdoor" => Ok(Environment::Outdoor),
            "mixed" => Ok(Environment::Mixed),
            other => Err(format!(
                "unknown environment '{}' (expected indoor, outdoor or mixed)",
                other
            )),
        }
    }
}

/// Estimated distance in meters using a log-distance path-loss model.
///
/// The environment correction is applied before clamping, so the result is
/// always within [0.1, 1000].
pub fn estimate_distance(rssi: f64, environment: Environment) -> f64 {
    let (reference, exponent) = environment.model(rssi);
    let raw = 10f64.powf((reference - rssi) / (10.0 * exponent));
    let corrected = raw * environment.correction();
    if corrected.is_nan() {
        return MAX_DISTANCE_M;
    }
    corrected.clamp(MIN_DISTANCE_M, MAX_DISTANCE_M)
}

// ============================================================================
// Links and routing
// ============================================================================

/// Weight of the link between two nodes, or `None` if unusable.
///
/// `|rssi_a - rssi_b| / mean(signalStrength)`; links at or above
/// [`MAX_EDGE_WEIGHT`] and links between nodes with no signal are dropped.
pub fn edge_weight(a: &MeshNode, b: &MeshNode) -> Option<f64> {
    let avg = (a.signal_strength + b.signal_strength) / 2.0;
    if avg <= 0.0 {
        return None;
    }
    let weight = (a.rssi - b.rssi).abs() / avg;
    (weight.is_finite() && weight < MAX_EDGE_WEIGHT).then_some(weight)
}

/// A usable link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshLink {
    /// One end.
    pub from: NodeId,
    /// Other end.
    pub to: NodeId,
    /// Routing weight (lower is better).
    pub weight: f64,
    /// Mean signal quality of both ends (%).
    pub quality: u32,
}

/// Every usable link in the snapshot, each pair listed once.
pub fn mesh_links(nodes: &[MeshNode]) -> Vec<MeshLink> {
    let mut links = Vec::new();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            if let Some(weight) = edge_weight(a, b) {
                let quality = (signal_quality(a.rssi) + signal_quality(b.rssi)) as f64 / 2.0;
                links.push(MeshLink {
                    from: a.id.clone(),
                    to: b.id.clone(),
                    weight,
                    quality: quality.round() as u32,
                });
            }
        }
    }
    links
}

struct HeapEntry {
    cost: f64,
    node: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default)
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Cheapest path from `source` to `target` (Dijkstra over [`edge_weight`]).
///
/// Returns the node ids from source to target inclusive, or an empty list if
/// either endpoint is missing or no path exists.
pub fn find_route(source: &NodeId, target: &NodeId, nodes: &[MeshNode]) -> Vec<NodeId> {
    let mut index: HashMap<&NodeId, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        index.entry(&node.id).or_insert(i);
    }
    let (Some(&start), Some(&goal)) = (index.get(source), index.get(target)) else {
        return Vec::new();
    };

    let mut dist = vec![f64::INFINITY; nodes.len()];
    let mut prev: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut heap = BinaryHeap::new();
    dist[start] = 0.0;
    heap.push(HeapEntry {
        cost: 0.0,
        node: start,
    });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if node == goal {
            break;
        }
        if cost > dist[node] {
            continue;
        }
        for (next, neighbour) in nodes.iter().enumerate() {
            if next == node {
                continue;
            }
            let Some(weight) = edge_weight(&nodes[node], neighbour) else {
                continue;
            };
            let candidate = cost + weight;
            if candidate < dist[next] {
                dist[next] = candidate;
                prev[next] = Some(node);
                heap.push(HeapEntry {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }

    if dist[goal].is_infinite() {
        return Vec::new();
    }
    let mut path = vec![nodes[goal].id.clone()];
    let mut cursor = goal;
    while let Some(p) = prev[cursor] {
        path.push(nodes[p].id.clone());
        cursor = p;
    }
    path.reverse();
    path
}

// ============================================================================
// Health and ranking
// ============================================================================

/// Aggregate mesh health, all in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NetworkHealth {
    /// Share of active nodes.
    pub connectivity: u32,
    /// Mean signal strength.
    pub stability: u32,
    /// Mean of connectivity and stability.
    pub overall: u32,
}

/// Health of a node snapshot. An empty snapshot scores zero everywhere.
pub fn network_health(nodes: &[MeshNode]) -> NetworkHealth {
    if nodes.is_empty() {
        return NetworkHealth::default();
    }
    let total = nodes.len() as f64;
    let active = nodes.iter().filter(|n| n.is_active()).count() as f64;
    let connectivity = active / total * 100.0;
    let stability = nodes.iter().map(|n| n.signal_strength).sum::<f64>() / total;
    let overall = (connectivity + stability) / 2.0;
    NetworkHealth {
        connectivity: connectivity.round() as u32,
        stability: stability.round().max(0.0) as u32,
        overall: overall.round().max(0.0) as u32,
    }
}

/// A node with its topology score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNode {
    /// Node id.
    pub id: NodeId,
    /// `signalStrength + 10 × usable links`.
    pub score: f64,
}

/// Nodes ordered best first, for picking relays and roots.
pub fn rank_nodes(nodes: &[MeshNode]) -> Vec<RankedNode> {
    let links = mesh_links(nodes);
    let mut ranked: Vec<RankedNode> = nodes
        .iter()
        .map(|n| {
            let degree = links
                .iter()
                .filter(|l| l.from == n.id || l.to == n.id)
                .count();
            RankedNode {
                id: n.id.clone(),
                score: n.signal_strength + degree as f64 * 10.0,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_types::NodeStatus;

    fn node(id: &str, rssi: f64, signal: f64) -> MeshNode {
        let mut n = MeshNode::new(id);
        n.rssi = rssi;
        n.signal_strength = signal;
        n
    }

    // ========================================================================
    // Signal quality and distance
    // ========================================================================

    #[test]
    fn quality_endpoints_and_clamping() {
        assert_eq!(signal_quality(-100.0), 0);
        assert_eq!(signal_quality(-50.0), 100);
        assert_eq!(signal_quality(-75.0), 50);
        assert_eq!(signal_quality(-120.0), 0);
        assert_eq!(signal_quality(-20.0), 100);
    }

    #[test]
    fn quality_is_monotonic() {
        let mut last = 0;
        let mut rssi = -110.0;
        while rssi <= -40.0 {
            let q = signal_quality(rssi);
            assert!(q >= last, "quality dropped at {}", rssi);
            last = q;
            rssi += 0.5;
        }
    }

    #[test]
    fn distance_grows_as_signal_weakens() {
        for env in [Environment::Indoor, Environment::Outdoor, Environment::Mixed] {
            let near = estimate_distance(-45.0, env);
            let far = estimate_distance(-85.0, env);
            assert!(far > near, "{}: {} <= {}", env, far, near);
        }
    }

    #[test]
    fn distance_uses_environment_model() {
        // Mixed, rssi -62 falls in the middle bucket: n = 2.8
        let expected = 10f64.powf((-42.0 + 62.0) / 28.0);
        assert!((estimate_distance(-62.0, Environment::Mixed) - expected).abs() < 1e-9);

        // Indoor at -40 is 1 m before the 0.8 correction
        assert!((estimate_distance(-40.0, Environment::Indoor) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn distance_is_clamped() {
        assert_eq!(estimate_distance(0.0, Environment::Indoor), MIN_DISTANCE_M);
        assert_eq!(estimate_distance(-200.0, Environment::Outdoor), MAX_DISTANCE_M);
    }

    #[test]
    fn environment_parses() {
        assert_eq!("Outdoor".parse::<Environment>().unwrap(), Environment::Outdoor);
        assert!("underwater".parse::<Environment>().is_err());
    }

    // ========================================================================
    // Routing
    // ========================================================================

    #[test]
    fn close_nodes_share_an_edge() {
        let a = node("a", -55.0, 90.0);
        let b = node("b", -65.0, 80.0);
        let w = edge_weight(&a, &b).unwrap();
        assert!((w - 10.0 / 85.0).abs() < 1e-9);
        let route = find_route(&a.id, &b.id, &[a.clone(), b.clone()]);
        assert_eq!(route, vec![a.id.clone(), b.id.clone()]);
    }

    #[test]
    fn heavy_or_dead_links_are_dropped() {
        let a = node("a", -40.0, 0.5);
        let b = node("b", -95.0, 0.5);
        assert_eq!(edge_weight(&a, &b), None);
        let dead = node("c", -60.0, 0.0);
        assert_eq!(edge_weight(&dead, &node("d", -60.0, 0.0)), None);
    }

    #[test]
    fn route_prefers_cheaper_detour() {
        // a-c direct: 40/50 = 0.8; a-b-c: 20/70 + 20/50 ≈ 0.686
        let nodes = vec![
            node("a", -50.0, 70.0),
            node("b", -70.0, 70.0),
            node("c", -90.0, 30.0),
        ];
        let route = find_route(&NodeId::new("a"), &NodeId::new("c"), &nodes);
        assert_eq!(
            route,
            vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")]
        );
    }

    #[test]
    fn unreachable_or_missing_gives_empty_route() {
        let nodes = vec![node("a", -50.0, 0.1), node("b", -99.0, 0.1)];
        assert!(find_route(&NodeId::new("a"), &NodeId::new("b"), &nodes).is_empty());
        assert!(find_route(&NodeId::new("a"), &NodeId::new("zz"), &nodes).is_empty());
    }

    #[test]
    fn route_to_self_is_single_node() {
        let nodes = vec![node("a", -50.0, 50.0)];
        assert_eq!(
            find_route(&NodeId::new("a"), &NodeId::new("a"), &nodes),
            vec![NodeId::new("a")]
        );
    }

    #[test]
    fn links_listed_once_per_pair() {
        let nodes = vec![
            node("a", -55.0, 90.0),
            node("b", -65.0, 80.0),
            node("c", -60.0, 85.0),
        ];
        let links = mesh_links(&nodes);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].from, NodeId::new("a"));
        assert_eq!(links[0].to, NodeId::new("b"));
        // quality: mean(90, 70)
        assert_eq!(links[0].quality, 80);
    }

    // ========================================================================
    // Health and ranking
    // ========================================================================

    #[test]
    fn health_formula() {
        let mut down = node("c", -80.0, 40.0);
        down.status = NodeStatus::Inactive;
        let nodes = vec![node("a", -55.0, 90.0), node("b", -65.0, 80.0), down];
        let health = network_health(&nodes);
        assert_eq!(health.connectivity, 67);
        assert_eq!(health.stability, 70);
        assert_eq!(health.overall, 68);
    }

    #[test]
    fn empty_snapshot_is_zero_health() {
        assert_eq!(network_health(&[]), NetworkHealth::default());
    }

    #[test]
    fn ranking_rewards_connectivity() {
        // Two silent nodes cannot link to each other, only to the hub
        let nodes = vec![
            node("q", -80.0, 0.0),
            node("p", -70.0, 0.0),
            node("hub", -60.0, 60.0),
        ];
        let ranked = rank_nodes(&nodes);
        let order: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["hub", "p", "q"]);
        assert_eq!(ranked[0].score, 80.0);
        assert_eq!(ranked[1].score, 10.0);
    }
}
