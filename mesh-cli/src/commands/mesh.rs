//! Mesh inspection and scanning.

use anyhow::{Context, Result};
use mesh_core::{find_route, mesh_links, network_health, rank_nodes};
use mesh_types::{MeshNode, NodeId};

use super::{AppContext, Session, MESH_WAIT};

/// Ask the controller to rescan and wait for the new node set.
async fn refresh(session: &Session) -> Result<Vec<MeshNode>> {
    let mut nodes = session.client.store().subscribe_nodes();
    nodes.borrow_and_update();
    session
        .client
        .scan_network()
        .await
        .context("Mesh scan failed")?;
    if tokio::time::timeout(MESH_WAIT, nodes.changed()).await.is_err() {
        tracing::warn!("no mesh update within {:?}, showing last known nodes", MESH_WAIT);
    }
    Ok(session.client.store().nodes())
}

/// Current nodes, either live or from the last saved state.
async fn snapshot(ctx: &AppContext, live: bool) -> Result<Vec<MeshNode>> {
    if !live {
        return Ok(ctx.load_state().await?.nodes());
    }
    let session = ctx.open().await?;
    let nodes = refresh(&session).await?;
    session.finish().await?;
    Ok(nodes)
}

/// Run the scan command.
pub async fn scan(ctx: &AppContext) -> Result<()> {
    let session = ctx.open().await?;
    let nodes = refresh(&session).await?;
    print_nodes(&nodes);
    session.finish().await
}

/// Run the route command.
pub async fn route(ctx: &AppContext, source: &str, target: &str, live: bool) -> Result<()> {
    let nodes = snapshot(ctx, live).await?;
    let path = find_route(&NodeId::new(source), &NodeId::new(target), &nodes);
    if path.is_empty() {
        println!("No route from {} to {}", source, target);
    } else {
        let hops: Vec<String> = path.iter().map(ToString::to_string).collect();
        println!("{}", hops.join(" -> "));
    }
    Ok(())
}

/// Run the health command.
pub async fn health(ctx: &AppContext, live: bool) -> Result<()> {
    let nodes = snapshot(ctx, live).await?;
    let health = network_health(&nodes);
    println!("Mesh health ({} nodes):", nodes.len());
    println!("  Connectivity: {}%", health.connectivity);
    println!("  Stability:    {}%", health.stability);
    println!("  Overall:      {}%", health.overall);
    Ok(())
}

/// Run the links command.
pub async fn links(ctx: &AppContext, live: bool) -> Result<()> {
    let nodes = snapshot(ctx, live).await?;
    let links = mesh_links(&nodes);
    println!("Links ({}):", links.len());
    for link in &links {
        println!(
            "  {} <-> {}  weight {:.3}  quality {}%",
            link.from, link.to, link.weight, link.quality
        );
    }
    println!("Anchors:");
    for ranked in rank_nodes(&nodes) {
        println!("  {}  score {:.1}", ranked.id, ranked.score);
    }
    Ok(())
}

fn print_nodes(nodes: &[MeshNode]) {
    println!("Nodes ({}):", nodes.len());
    for node in nodes {
        println!(
            "  {:<10} {:<8} {:?}  rssi {:.0} dBm  signal {:.0}%  battery {:.0}%  {}",
            node.id.to_string(),
            format!("{:?}", node.status).to_lowercase(),
            node.role,
            node.rssi,
            node.signal_strength,
            node.battery_level,
            node.ip_address
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::relay::tests::simulated_ctx;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scan_saves_the_mesh() {
        let dir = tempdir().unwrap();
        let ctx = simulated_ctx(dir.path());

        scan(&ctx).await.unwrap();

        let nodes = ctx.load_state().await.unwrap().nodes();
        assert_eq!(nodes.len(), 3);
    }

    #[tokio::test]
    async fn offline_queries_use_saved_mesh() {
        let dir = tempdir().unwrap();
        let ctx = simulated_ctx(dir.path());

        // Nothing saved yet
        assert!(snapshot(&ctx, false).await.unwrap().is_empty());
        health(&ctx, false).await.unwrap();

        scan(&ctx).await.unwrap();
        assert_eq!(snapshot(&ctx, false).await.unwrap().len(), 3);
        route(&ctx, "node_1", "node_2", false).await.unwrap();
        links(&ctx, false).await.unwrap();
    }

    #[tokio::test]
    async fn live_snapshot_scans_first() {
        let dir = tempdir().unwrap();
        let ctx = simulated_ctx(dir.path());

        assert_eq!(snapshot(&ctx, true).await.unwrap().len(), 3);
    }
}
