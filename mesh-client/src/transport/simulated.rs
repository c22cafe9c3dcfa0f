//! Simulated controller for running without hardware.
//!
//! Behaves like the real link from the outside: a fixed-interval generator
//! pushes metrics and mesh updates, and every command is answered with the
//! authoritative update a device would send, after an artificial latency and
//! with randomly injected faults.

use super::{
    DeviceFault, EventHandler, SimulatedDeviceError, Subscribers, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use mesh_core::LinkStatus;
use mesh_types::{
    now_millis, Command, Inbound, MeshNode, MeshUpdate, NodeId, NodePatch, NodeRole, NodeStatus,
    Outbound, Position, RelayChannel, RelayConfig, RelayId, RelayPatch, RelayStatus, RelayUpdate,
    SystemMetrics,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Knobs for the simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    /// Latency window applied to every send; `None` disables it.
    pub latency: Option<(Duration, Duration)>,
    /// Probability (0-1) that a send fails with a [`SimulatedDeviceError`].
    pub failure_rate: f64,
    /// How often metrics and mesh updates are pushed.
    pub update_interval: Duration,
    /// Number of synthetic mesh nodes.
    pub node_count: usize,
    /// Relay channels hosted by each synthetic node.
    pub relays_per_node: u32,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            latency: Some((Duration::from_millis(50), Duration::from_millis(150))),
            failure_rate: 0.01,
            update_interval: Duration::from_secs(1),
            node_count: 3,
            relays_per_node: 4,
            seed: None,
        }
    }
}

/// Transport that fakes a relay controller in-process.
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SimulationSettings,
    status: Mutex<LinkStatus>,
    subscribers: Subscribers,
    rng: Mutex<StdRng>,
    nodes: Mutex<Vec<MeshNode>>,
    generator: Mutex<Option<CancellationToken>>,
    started: Mutex<Option<Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedTransport {
    /// Create a simulated controller.
    pub fn new(settings: SimulationSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                status: Mutex::new(LinkStatus::Disconnected),
                subscribers: Subscribers::default(),
                rng: Mutex::new(rng),
                nodes: Mutex::new(Vec::new()),
                generator: Mutex::new(None),
                started: Mutex::new(None),
            }),
        }
    }

    /// Settings in use.
    pub fn settings(&self) -> &SimulationSettings {
        &self.inner.settings
    }

    /// Current synthetic node set.
    pub fn nodes(&self) -> Vec<MeshNode> {
        lock(&self.inner.nodes).clone()
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.inner.stop_generator();
    }
}

impl Inner {
    fn status(&self) -> LinkStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: LinkStatus) {
        let changed = {
            let mut current = lock(&self.status);
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            info!(%status, "simulated link status changed");
            self.subscribers.emit(&TransportEvent::StatusChanged(status));
        }
    }

    fn emit(&self, message: Inbound) {
        debug!(msg_type = message.message_type(), "simulated inbound");
        self.subscribers.emit(&TransportEvent::Message(message));
    }

    /// Generate the node set once, keeping ids stable across reconnects.
    fn ensure_nodes(&self) -> Vec<MeshNode> {
        let mut rng = lock(&self.rng);
        let mut nodes = lock(&self.nodes);
        if nodes.is_empty() {
            *nodes = (1..=self.settings.node_count)
                .map(|i| synthetic_node(&mut *rng, i, self.settings.relays_per_node))
                .collect();
        }
        nodes.clone()
    }

    fn publish_telemetry(&self) {
        let uptime = lock(&self.started)
            .map(|t| t.elapsed().as_secs())
            .unwrap_or_default();
        let (metrics, nodes) = {
            let mut rng = lock(&self.rng);
            let mut nodes = lock(&self.nodes);
            for node in nodes.iter_mut() {
                jitter(&mut *rng, node);
            }
            (synthetic_metrics(&mut *rng, uptime), nodes.clone())
        };
        self.emit(Inbound::SystemMetrics(metrics));
        self.emit(Inbound::MeshUpdate {
            node_id: None,
            update: MeshUpdate::Replace(nodes),
        });
    }

    fn start_generator(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.generator).replace(token.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(self);
        let period = self.settings.update_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.publish_telemetry(),
                }
            }
        });
    }

    fn stop_generator(&self) {
        if let Some(token) = lock(&self.generator).take() {
            token.cancel();
        }
    }

    fn roll_latency(&self) -> Option<Duration> {
        let (min, max) = self.settings.latency?;
        let (lo, hi) = (min.min(max), min.max(max));
        let millis = lock(&self.rng).gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        Some(Duration::from_millis(millis))
    }

    fn roll_fault(&self) -> Option<DeviceFault> {
        let mut rng = lock(&self.rng);
        if rng.gen::<f64>() < self.settings.failure_rate {
            Some(DeviceFault::ALL[rng.gen_range(0..DeviceFault::ALL.len())])
        } else {
            None
        }
    }

    /// The update a real controller would publish after executing `message`.
    fn effect(&self, message: Outbound) -> Option<Inbound> {
        let node_id = message.node_id;
        let relay = |patch: RelayPatch| Inbound::RelayUpdate {
            node_id: node_id.clone(),
            update: RelayUpdate::Merge(patch),
        };
        match message.command {
            Command::FireRelay { id, .. } => Some(relay(RelayPatch {
                last_fired_at: Some(now_millis()),
                ..RelayPatch::status(id, RelayStatus::Fired)
            })),
            Command::PrimeRelay { id } => Some(relay(RelayPatch::status(id, RelayStatus::Ready))),
            Command::StageRelay { id } => Some(relay(RelayPatch::status(id, RelayStatus::Staged))),
            Command::UpdateRelayConfig(config) => Some(relay(config_patch(&config))),
            Command::ResetRelayConfig { id } => {
                Some(relay(config_patch(&RelayConfig::factory(id))))
            }
            Command::UpdateNodeConfig { id, config } => Some(self.merge_node(id, config)),
            Command::ConnectNode { id } => Some(self.merge_node(
                id,
                NodePatch {
                    status: Some(NodeStatus::Active),
                    ..NodePatch::default()
                },
            )),
            Command::ScanNetwork => Some(Inbound::MeshUpdate {
                node_id: None,
                update: MeshUpdate::Replace(lock(&self.nodes).clone()),
            }),
            Command::UpdateNetworkConfig(_)
            | Command::UpdateMeshConfig(_)
            | Command::UpdateSecurityConfig(_)
            | Command::UpdateSystemConfig(_)
            | Command::RunSequence { .. }
            | Command::StopSequence
            | Command::Heartbeat => None,
        }
    }

    fn merge_node(&self, id: NodeId, patch: NodePatch) -> Inbound {
        if let Some(node) = lock(&self.nodes).iter_mut().find(|n| n.id == id) {
            node.apply(&patch);
        }
        Inbound::MeshUpdate {
            node_id: Some(id),
            update: MeshUpdate::Merge(patch),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.status() == LinkStatus::Connected {
            return Ok(());
        }
        *lock(&self.inner.started) = Some(Instant::now());
        self.inner.set_status(LinkStatus::Connected);

        for node in self.inner.ensure_nodes() {
            let channels = node
                .relays
                .iter()
                .map(|r| RelayChannel::new(node.id.clone(), *r))
                .collect();
            self.inner.emit(Inbound::RelayUpdate {
                node_id: Some(node.id.clone()),
                update: RelayUpdate::Replace(channels),
            });
        }
        self.inner.start_generator();
        Ok(())
    }

    async fn send(&self, message: Outbound) -> Result<(), TransportError> {
        if self.inner.status() != LinkStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(latency) = self.inner.roll_latency() {
            tokio::time::sleep(latency).await;
        }
        if let Some(fault) = self.inner.roll_fault() {
            warn!(
                msg_type = message.command.message_type(),
                %fault,
                "simulated device fault"
            );
            return Err(SimulatedDeviceError::new(fault).into());
        }
        debug!(
            msg_type = message.command.message_type(),
            target = %message.target(),
            "simulated command accepted"
        );
        if let Some(update) = self.inner.effect(message) {
            self.inner.emit(update);
        }
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        self.inner.subscribers.add(handler);
    }

    fn status(&self) -> LinkStatus {
        self.inner.status()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.stop_generator();
        self.inner.set_status(LinkStatus::Disconnected);
        Ok(())
    }
}

fn config_patch(config: &RelayConfig) -> RelayPatch {
    RelayPatch {
        id: config.id,
        name: Some(config.name.clone()),
        safety_delay_seconds: Some(config.safety_delay),
        max_temperature: Some(config.max_temperature),
        auto_reset: Some(config.auto_reset),
        voltage: Some(config.voltage),
        current_limit: Some(config.current_limit),
        ..RelayPatch::default()
    }
}

fn synthetic_node<R: Rng>(rng: &mut R, index: usize, relays: u32) -> MeshNode {
    let mac: [u8; 6] = rng.gen();
    MeshNode {
        id: NodeId::new(format!("node_{}", index)),
        name: format!("Node {}", index),
        rssi: rng.gen_range(-80.0..-50.0),
        status: if rng.gen_bool(0.9) {
            NodeStatus::Active
        } else {
            NodeStatus::Inactive
        },
        battery_level: rng.gen_range(60.0..100.0),
        signal_strength: rng.gen_range(70.0..100.0),
        position: Position {
            x: rng.gen_range(0.0..100.0),
            y: rng.gen_range(0.0..100.0),
        },
        role: if index == 1 {
            NodeRole::Root
        } else {
            NodeRole::Node
        },
        firmware_version: "1.2.0".to_string(),
        ip_address: format!("192.168.4.{}", index + 1),
        mac_address: mac
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
        relays: (1..=relays).map(RelayId::new).collect(),
        last_seen: Some(now_millis()),
    }
}

fn jitter<R: Rng>(rng: &mut R, node: &mut MeshNode) {
    node.rssi = (node.rssi + rng.gen_range(-2.0..=2.0)).clamp(-95.0, -40.0);
    node.signal_strength = (node.signal_strength + rng.gen_range(-1.0..=1.0)).clamp(0.0, 100.0);
    node.battery_level = (node.battery_level - rng.gen_range(0.0..0.05)).max(0.0);
    node.last_seen = Some(now_millis());
}

fn synthetic_metrics<R: Rng>(rng: &mut R, uptime_seconds: u64) -> SystemMetrics {
    SystemMetrics {
        cpu_usage: rng.gen_range(20.0..80.0),
        memory_usage: rng.gen_range(30.0..70.0),
        temperature: rng.gen_range(35.0..55.0),
        battery_level: rng.gen_range(70.0..100.0),
        signal_strength: rng.gen_range(60.0..100.0),
        uptime_seconds,
        network_load: rng.gen_range(10.0..60.0),
        mesh_quality: rng.gen_range(70.0..100.0),
        packet_loss: rng.gen_range(0.0..2.0),
        latency_ms: rng.gen_range(10.0..60.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn settings() -> SimulationSettings {
        SimulationSettings {
            latency: Some((Duration::from_millis(50), Duration::from_millis(150))),
            failure_rate: 0.0,
            update_interval: Duration::from_secs(3600),
            node_count: 3,
            relays_per_node: 2,
            seed: Some(7),
        }
    }

    fn collect(transport: &SimulatedTransport) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.on_event(Arc::new(move |event: &TransportEvent| {
            let _ = tx.send(event.clone());
        }));
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // ===========================================
    // Generator
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn connect_reports_connected_and_publishes_state() {
        let transport = SimulatedTransport::new(settings());
        let mut rx = collect(&transport);

        transport.connect().await.unwrap();
        assert_eq!(transport.status(), LinkStatus::Connected);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            TransportEvent::StatusChanged(LinkStatus::Connected)
        );
        let relay_sets = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    TransportEvent::Message(Inbound::RelayUpdate {
                        update: RelayUpdate::Replace(_),
                        ..
                    })
                )
            })
            .count();
        assert_eq!(relay_sets, 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Message(Inbound::SystemMetrics(_)))));
        let nodes = events.iter().find_map(|e| match e {
            TransportEvent::Message(Inbound::MeshUpdate {
                update: MeshUpdate::Replace(nodes),
                ..
            }) => Some(nodes.clone()),
            _ => None,
        });
        let nodes = nodes.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].id, NodeId::new("node_1"));
        assert_eq!(nodes[0].role, NodeRole::Root);
        assert_eq!(nodes[0].relays, vec![RelayId::new(1), RelayId::new(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_generator() {
        let mut s = settings();
        s.update_interval = Duration::from_secs(1);
        let transport = SimulatedTransport::new(s);
        let mut rx = collect(&transport);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.close().await.unwrap();
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(transport.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn same_seed_same_nodes() {
        let a = SimulatedTransport::new(settings());
        let b = SimulatedTransport::new(settings());
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let macs = |t: &SimulatedTransport| -> Vec<String> {
            t.nodes().into_iter().map(|n| n.mac_address).collect()
        };
        assert_eq!(macs(&a), macs(&b));
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    // ===========================================
    // Commands
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn send_requires_connection() {
        let transport = SimulatedTransport::new(settings());
        let result = transport.send(Outbound::local(Command::ScanNetwork)).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_answers_with_authoritative_update() {
        let transport = SimulatedTransport::new(settings());
        let mut rx = collect(&transport);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        let start = Instant::now();
        let node = NodeId::new("node_2");
        transport
            .send(Outbound::to_node(
                &node,
                Command::FireRelay {
                    id: RelayId::new(1),
                    delay: 0.0,
                },
            ))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));

        let events = drain(&mut rx);
        match &events[..] {
            [TransportEvent::Message(Inbound::RelayUpdate {
                node_id,
                update: RelayUpdate::Merge(patch),
            })] => {
                assert_eq!(node_id.as_ref(), Some(&node));
                assert_eq!(patch.id, RelayId::new(1));
                assert_eq!(patch.status, Some(RelayStatus::Fired));
                assert!(patch.last_fired_at.is_some());
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_rate_one_fails_every_send() {
        let mut s = settings();
        s.failure_rate = 1.0;
        let transport = SimulatedTransport::new(s);
        let mut rx = collect(&transport);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        for id in 1..=5u32 {
            let start = Instant::now();
            let result = transport
                .send(Outbound::local(Command::PrimeRelay {
                    id: RelayId::new(id),
                }))
                .await;
            assert!(start.elapsed() >= Duration::from_millis(50));
            assert!(matches!(result, Err(TransportError::SimulatedDevice(_))));
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_latency_answers_immediately() {
        let mut s = settings();
        s.latency = None;
        let transport = SimulatedTransport::new(s);
        transport.connect().await.unwrap();

        let start = Instant::now();
        transport
            .send(Outbound::local(Command::StageRelay {
                id: RelayId::new(2),
            }))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn node_config_merges_into_mesh() {
        let transport = SimulatedTransport::new(settings());
        let mut rx = collect(&transport);
        transport.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        let patch = NodePatch {
            name: Some("Barge".into()),
            ..NodePatch::default()
        };
        transport
            .send(Outbound::local(Command::UpdateNodeConfig {
                id: NodeId::new("node_3"),
                config: patch.clone(),
            }))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![TransportEvent::Message(Inbound::MeshUpdate {
                node_id: Some(NodeId::new("node_3")),
                update: MeshUpdate::Merge(patch),
            })]
        );
        assert_eq!(transport.nodes()[2].name, "Barge");
    }
}
