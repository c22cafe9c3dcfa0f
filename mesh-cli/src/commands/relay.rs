//! Fire, prime and stage one relay channel.

use anyhow::{bail, Context, Result};
use mesh_client::ControllerEvent;
use mesh_types::{ChannelKey, NodeId};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use super::AppContext;

/// Channel addressed by the optional `--node` flag and a relay id.
pub fn channel(node: Option<String>, relay: u32) -> ChannelKey {
    ChannelKey::new(node.map(NodeId::new).unwrap_or_default(), relay)
}

/// Run the fire command: countdown, then dispatch.
pub async fn fire(ctx: &AppContext, key: &ChannelKey, delay: f64) -> Result<()> {
    let session = ctx.open().await?;
    let mut events = session.client.relays().subscribe();

    session.client.fire(key, delay)?;
    println!("Firing {} in {} ticks (Ctrl-C aborts)...", key, ctx.config.relay.countdown_ticks);

    let settings = session.client.relays().settings();
    let deadline = settings.tick_interval * settings.countdown_ticks + Duration::from_secs(10);
    let outcome: Result<()> = tokio::time::timeout(deadline, async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    session.client.cancel(key)?;
                    bail!("Fire aborted");
                }
                event = events.recv() => match event {
                    Ok(ControllerEvent::CountdownTick { key: k, remaining }) if &k == key => {
                        println!("  {}...", remaining);
                    }
                    Ok(ControllerEvent::Fired { key: k, delay }) if &k == key => {
                        println!("Fired {} (delay {}s)", key, delay);
                        return Ok(());
                    }
                    Ok(ControllerEvent::CommandFailed { key: k, error, .. }) if &k == key => {
                        bail!("Fire failed: {}", error);
                    }
                    Ok(ControllerEvent::CountdownCancelled { key: k }) if &k == key => {
                        bail!("Countdown cancelled by a controller update");
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => bail!("Relay controller stopped"),
                }
            }
        }
    })
    .await
    .context("Timed out waiting for the fire to complete")?;

    session.finish().await?;
    outcome
}

/// Run the prime command.
pub async fn prime(ctx: &AppContext, key: &ChannelKey) -> Result<()> {
    let session = ctx.open().await?;
    session.client.prime(key).await?;
    println!("Primed {}", key);
    session.finish().await
}

/// Run the stage command.
pub async fn stage(ctx: &AppContext, key: &ChannelKey) -> Result<()> {
    let session = ctx.open().await?;
    session.client.stage(key).await?;
    println!("Staged {}", key);
    session.finish().await
}
