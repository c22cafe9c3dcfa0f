//! Stream live metrics and mesh health.

use anyhow::Result;
use mesh_client::TransportEvent;
use mesh_core::network_health;
use std::sync::Arc;
use std::time::Duration;

use super::AppContext;

/// Run the watch command until Ctrl-C or `seconds` have passed.
pub async fn run(ctx: &AppContext, seconds: Option<u64>) -> Result<()> {
    let session = ctx.open().await?;
    let client = &session.client;

    client.on_event(Arc::new(|event: &TransportEvent| match event {
        TransportEvent::StatusChanged(status) => println!("[link] {}", status),
        TransportEvent::ConnectionFailed { attempts, reason } => {
            println!("[link] gave up after {} attempts: {}", attempts, reason)
        }
        TransportEvent::Message(mesh_types::Inbound::Error(report)) => {
            println!("[controller] {}: {}", report.code, report.message)
        }
        TransportEvent::Message(_) => {}
    }));

    let mut metrics = client.store().subscribe_metrics();
    let mut nodes = client.store().subscribe_nodes();
    let stop = tokio::time::sleep(seconds.map_or(Duration::MAX, Duration::from_secs));
    tokio::pin!(stop);

    println!("Watching {} (Ctrl-C to stop)...", client.status());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut stop => break,
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
                let m = metrics.borrow_and_update().clone();
                println!(
                    "[metrics] cpu {:.0}%  mem {:.0}%  temp {:.1}°C  battery {:.0}%  loss {:.1}%  latency {:.0}ms",
                    m.cpu_usage, m.memory_usage, m.temperature, m.battery_level, m.packet_loss, m.latency_ms
                );
            }
            changed = nodes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot: Vec<_> = nodes.borrow_and_update().values().cloned().collect();
                let health = network_health(&snapshot);
                println!(
                    "[mesh] {} nodes  connectivity {}%  stability {}%  overall {}%",
                    snapshot.len(), health.connectivity, health.stability, health.overall
                );
            }
        }
    }

    session.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::relay::tests::simulated_ctx;
    use tempfile::tempdir;

    #[tokio::test]
    async fn watch_stops_after_deadline_and_saves() {
        let dir = tempdir().unwrap();
        let mut ctx = simulated_ctx(dir.path());
        ctx.config.simulation.update_interval_ms = 50;

        run(&ctx, Some(1)).await.unwrap();

        let state = ctx.load_state().await.unwrap();
        assert_eq!(state.nodes().len(), 3);
    }
}
