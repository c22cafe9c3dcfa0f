//! Ordered, timed firing of sequence steps.
//!
//! A [`SequenceRunner`] drives at most one run at a time. The run walks the
//! steps strictly in order: wait the step delay, fire the step through the
//! [`RelayController`], advance. Stopping cancels the pending wait and
//! discards the remaining steps; steps already fired stay fired.

use crate::relay::RelayController;
use crate::store::{EntityPatch, StateStore};
use crate::ClientError;
use mesh_core::{
    validate_sequence, CommandRejected, RunAction, RunEvent, SequenceEdit, SequenceRun,
    DEFAULT_MAX_STEPS,
};
use mesh_types::{
    now_millis, ChannelKey, Sequence, SequenceId, SequencePatch, SequenceStatus, SequenceStep,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs and edits sequences held in the [`StateStore`].
#[derive(Clone)]
pub struct SequenceRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    store: StateStore,
    relays: RelayController,
    max_steps: usize,
    active: Mutex<ActiveRun>,
}

#[derive(Default)]
struct ActiveRun {
    run: SequenceRun,
    sequence: Option<SequenceId>,
    wait: Option<CancellationToken>,
}

impl SequenceRunner {
    /// Create a runner that fires through `relays`.
    pub fn new(store: StateStore, relays: RelayController) -> Self {
        Self::with_max_steps(store, relays, DEFAULT_MAX_STEPS)
    }

    /// Create a runner with a custom step limit.
    pub fn with_max_steps(store: StateStore, relays: RelayController, max_steps: usize) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                relays,
                max_steps,
                active: Mutex::new(ActiveRun::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActiveRun> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Step limit in use.
    pub fn max_steps(&self) -> usize {
        self.inner.max_steps
    }

    /// The sequence being run, if any.
    pub fn active(&self) -> Option<SequenceId> {
        self.lock().sequence.clone()
    }

    /// Index of the step being waited on.
    pub fn pointer(&self) -> Option<usize> {
        self.lock().run.pointer()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.lock().run.is_running()
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Start running sequence `id`.
    ///
    /// Fails if another run is active, the sequence is unknown, or its steps
    /// do not validate.
    pub fn run(&self, id: &SequenceId) -> Result<(), ClientError> {
        let sequence = self
            .inner
            .store
            .sequence(id)
            .ok_or_else(|| CommandRejected::UnknownSequence(id.clone()))?;
        validate_sequence(&sequence, self.inner.max_steps)?;

        let (actions, token) = {
            let mut active = self.lock();
            let (next, actions) = active.run.on_event(RunEvent::Start {
                len: sequence.steps.len(),
            })?;
            active.run = next;
            let token = next.is_running().then(|| {
                let token = CancellationToken::new();
                active.wait = Some(token.clone());
                active.sequence = Some(id.clone());
                token
            });
            (actions, token)
        };

        info!(sequence = %id, name = %sequence.name, steps = sequence.steps.len(), "sequence run started");
        self.apply(id, &actions);
        if let Some(token) = token {
            self.spawn_driver(id.clone(), sequence.steps, token);
        }
        Ok(())
    }

    /// Abort the active run. Returns whether one was active.
    pub fn stop(&self) -> bool {
        let (id, actions) = {
            let mut active = self.lock();
            let Some(id) = active.sequence.take() else {
                return false;
            };
            let (next, actions) = active.run.on_event(RunEvent::Stop).unwrap_or_default();
            active.run = next;
            if actions.contains(&RunAction::CancelWait) {
                if let Some(token) = active.wait.take() {
                    token.cancel();
                }
            }
            (id, actions)
        };
        info!(sequence = %id, "sequence run stopped");
        self.apply(&id, &actions);
        true
    }

    fn spawn_driver(&self, id: SequenceId, steps: Vec<SequenceStep>, token: CancellationToken) {
        let runner = self.clone();
        tokio::spawn(async move {
            for (index, step) in steps.into_iter().enumerate() {
                let wait = Duration::try_from_secs_f64(step.delay_seconds).unwrap_or_default();
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
                if token.is_cancelled() {
                    return;
                }

                let key = ChannelKey::new(step.node_id, step.relay_id);
                let event = match runner.inner.relays.fire_now(&key, 0.0).await {
                    Ok(()) => {
                        debug!(sequence = %id, step = index, relay = %key, "step fired");
                        RunEvent::StepFired
                    }
                    Err(e) => {
                        warn!(sequence = %id, step = index, relay = %key, error = %e, "step failed, abandoning run");
                        RunEvent::StepFailed
                    }
                };
                if !runner.advance(&id, &token, event) {
                    return;
                }
            }
        });
    }

    /// Feed a step result. Returns whether another step is awaited.
    fn advance(&self, id: &SequenceId, token: &CancellationToken, event: RunEvent) -> bool {
        let actions = {
            let mut active = self.lock();
            if token.is_cancelled() || active.sequence.as_ref() != Some(id) {
                return false;
            }
            let (next, actions) = active.run.on_event(event).unwrap_or_default();
            active.run = next;
            if !next.is_running() {
                active.sequence = None;
                active.wait = None;
            }
            actions
        };
        self.apply(id, &actions);
        actions
            .iter()
            .any(|a| matches!(a, RunAction::AwaitStep { .. }))
    }

    fn apply(&self, id: &SequenceId, actions: &[RunAction]) {
        // A sequence removed by a replace mid-run is not brought back
        if self.inner.store.sequence(id).is_none() {
            return;
        }
        for action in actions {
            match action {
                RunAction::SetStatus(status) => {
                    if *status == SequenceStatus::Completed {
                        info!(sequence = %id, "sequence run completed");
                    }
                    self.inner
                        .store
                        .merge_entity(EntityPatch::Sequence(SequencePatch::status(id.clone(), *status)));
                }
                RunAction::RecordLastRun => {
                    self.inner.store.merge_entity(EntityPatch::Sequence(SequencePatch {
                        id: id.clone(),
                        name: None,
                        steps: None,
                        status: None,
                        created: None,
                        last_run: Some(now_millis()),
                    }))
                }
                RunAction::AwaitStep { index } => debug!(sequence = %id, step = index, "awaiting step"),
                RunAction::CancelWait => {}
            }
        }
    }

    // ========================================================================
    // Library
    // ========================================================================

    /// Create and store a new sequence.
    pub fn create(&self, name: &str, steps: Vec<SequenceStep>) -> Result<Sequence, ClientError> {
        let mut sequence = Sequence::new(name, now_millis());
        sequence.steps = steps;
        validate_sequence(&sequence, self.inner.max_steps)?;
        self.inner.store.put_sequence(sequence.clone());
        info!(sequence = %sequence.id, name, "sequence created");
        Ok(sequence)
    }

    /// Remove a sequence. Refused while it runs.
    pub fn delete(&self, id: &SequenceId) -> Result<Sequence, ClientError> {
        self.check_idle(id)?;
        let removed = self
            .inner
            .store
            .remove_sequence(id)
            .ok_or_else(|| CommandRejected::UnknownSequence(id.clone()))?;
        Ok(removed)
    }

    /// Edit a stored sequence in place. Nothing is saved if `edit` fails.
    pub fn edit<R>(
        &self,
        id: &SequenceId,
        edit: impl FnOnce(&mut Sequence, usize) -> Result<R, CommandRejected>,
    ) -> Result<R, ClientError> {
        self.check_idle(id)?;
        let mut sequence = self
            .inner
            .store
            .sequence(id)
            .ok_or_else(|| CommandRejected::UnknownSequence(id.clone()))?;
        let result = edit(&mut sequence, self.inner.max_steps)?;
        self.inner.store.put_sequence(sequence);
        Ok(result)
    }

    /// Append a step.
    pub fn add_step(&self, id: &SequenceId, step: SequenceStep) -> Result<(), ClientError> {
        self.edit(id, |seq, max| seq.add_step(step, max))
    }

    /// Remove the step at `index`.
    pub fn remove_step(&self, id: &SequenceId, index: usize) -> Result<SequenceStep, ClientError> {
        self.edit(id, |seq, _| seq.remove_step(index))
    }

    /// Move the step at `from` to `to`.
    pub fn move_step(&self, id: &SequenceId, from: usize, to: usize) -> Result<(), ClientError> {
        self.edit(id, |seq, _| seq.move_step(from, to))
    }

    /// Change a step's delay.
    pub fn set_step_delay(&self, id: &SequenceId, index: usize, delay_seconds: f64) -> Result<(), ClientError> {
        self.edit(id, |seq, _| seq.set_step_delay(index, delay_seconds))
    }

    fn check_idle(&self, id: &SequenceId) -> Result<(), CommandRejected> {
        if self.lock().sequence.as_ref() == Some(id) {
            return Err(CommandRejected::SequenceRunning);
        }
        Ok(())
    }
}
