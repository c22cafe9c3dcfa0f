//! Run or check a sequence file.
//!
//! A sequence file is JSON:
//!
//! ```json
//! { "name": "finale", "steps": [ { "relayId": 3, "nodeId": "node_2", "delay": 1.5 } ] }
//! ```

use anyhow::{bail, Context, Result};
use mesh_core::validate_sequence;
use mesh_types::{now_millis, Sequence, SequenceStatus, SequenceStep};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::AppContext;

/// Contents of a sequence file.
#[derive(Debug, Deserialize)]
pub struct SequenceFile {
    /// Display name.
    pub name: String,
    /// Steps in firing order.
    pub steps: Vec<SequenceStep>,
}

impl SequenceFile {
    /// Read and parse a sequence file.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents).context("Invalid sequence file")
    }

    fn total_delay(&self) -> Duration {
        let secs: f64 = self.steps.iter().map(|s| s.delay_seconds.max(0.0)).sum();
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}

/// Run the validate command.
pub async fn validate(ctx: &AppContext, path: &Path) -> Result<()> {
    let file = SequenceFile::load(path).await?;
    let mut sequence = Sequence::new(file.name, now_millis());
    sequence.steps = file.steps;
    validate_sequence(&sequence, ctx.config.relay.max_sequence_steps)?;

    println!("Sequence \"{}\" is valid:", sequence.name);
    for (i, step) in sequence.steps.iter().enumerate() {
        println!(
            "  [{}] {}/{} after {}s",
            i + 1,
            step.node_id,
            step.relay_id,
            step.delay_seconds
        );
    }
    Ok(())
}

/// Run the run command.
pub async fn run(ctx: &AppContext, path: &Path, on_device: bool) -> Result<()> {
    let file = SequenceFile::load(path).await?;
    let budget = file.total_delay() + Duration::from_secs(10);
    let session = ctx.open().await?;
    let sequence = session.client.sequencer().create(&file.name, file.steps)?;

    if on_device {
        session.client.run_on_device(&sequence.id).await?;
        println!("Sequence \"{}\" handed to the controller", sequence.name);
        return session.finish().await;
    }

    let mut updates = session.client.store().subscribe_sequences();
    session.client.run_sequence(&sequence.id)?;
    println!(
        "Running \"{}\" ({} steps, Ctrl-C stops)...",
        sequence.name,
        sequence.steps.len()
    );

    let outcome = tokio::time::timeout(budget, async {
        loop {
            let status = updates
                .borrow_and_update()
                .get(&sequence.id)
                .map(|s| s.status);
            match status {
                Some(SequenceStatus::Completed) => return Ok(()),
                Some(SequenceStatus::Error) => bail!("Sequence stopped: a step failed"),
                _ => {}
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    session.client.stop_sequence();
                    bail!("Sequence stopped");
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        bail!("State store closed");
                    }
                }
            }
        }
    })
    .await;

    let outcome = match outcome {
        Ok(result) => result,
        Err(_) => {
            session.client.stop_sequence();
            Err(anyhow::anyhow!("Timed out waiting for the sequence"))
        }
    };
    if outcome.is_ok() {
        println!("Sequence \"{}\" completed", sequence.name);
    }
    session.finish().await?;
    outcome
}
