//! Show persisted state.

use anyhow::Result;
use mesh_client::TransportKind;
use mesh_types::now_millis;

use super::AppContext;

/// Run the status command.
pub async fn run(ctx: &AppContext) -> Result<()> {
    println!("=== relaymesh status ===");
    println!();

    let kind = TransportKind::of(&ctx.config);
    println!("Link:");
    match kind {
        TransportKind::Simulated => println!("  Transport: simulated"),
        TransportKind::WebSocket => {
            println!("  Transport: websocket");
            println!("  Endpoint:  {}", ctx.config.resolve_endpoint(None));
        }
    }
    println!("  Data dir:  {}", ctx.data_dir.display());
    println!();

    let persist = ctx.persist();
    let state = persist.get_persisted().await?;

    println!("Relays ({}):", state.relays.len());
    for relay in &state.relays {
        let fired = relay
            .last_fired_at
            .map(|t| format!("  fired {}", format_age(t)))
            .unwrap_or_default();
        let warning = if relay.temperature_warning() {
            "  TEMPERATURE WARNING"
        } else {
            ""
        };
        println!(
            "  {}/{:<3} {:<12} {:<8}{}{}",
            relay.node_id, relay.id, relay.name, relay.status, fired, warning
        );
    }
    println!();

    println!("Mesh: {} nodes", state.mesh_nodes.len());
    println!("Sequences ({}):", state.sequences.len());
    for sequence in &state.sequences {
        println!(
            "  {:<20} {} steps  {:?}",
            sequence.name,
            sequence.steps.len(),
            sequence.status
        );
    }
    println!();

    let metrics = &state.last_known_metrics;
    println!("Last metrics:");
    println!(
        "  Battery:     {:.0}% ({:?})",
        metrics.battery_level,
        metrics.battery_status()
    );
    println!(
        "  Temperature: {:.1}°C ({:?})",
        metrics.temperature,
        metrics.temperature_status()
    );
    println!("  Uptime:      {}s", metrics.uptime_seconds);
    println!();

    if state.has_recoverable_state() {
        println!("Saved state found; it is restored on the next connection.");
        println!("Remove {} to start fresh.", ctx.data_dir.display());
    } else {
        println!("No saved state (factory defaults).");
    }

    Ok(())
}

/// Format a unix-millis timestamp as a rough age.
fn format_age(ts: u64) -> String {
    let diff = now_millis().saturating_sub(ts) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
