//! Sequence run state machine and step editing.
//!
//! A run walks the steps strictly in order: wait the step's delay, fire it,
//! advance. [`SequenceRun`] only tracks the pointer; the client owns the
//! timer and the actual firing.

use mesh_types::{Sequence, SequenceStatus, SequenceStep};

use crate::CommandRejected;

/// Step limit used when none is configured.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Inputs to a [`SequenceRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Begin a run of a sequence with `len` steps.
    Start {
        /// Number of steps.
        len: usize,
    },
    /// The step at the pointer fired.
    StepFired,
    /// The step at the pointer was rejected or failed to dispatch.
    StepFailed,
    /// Abort the run.
    Stop,
}

/// Instructions produced by a [`SequenceRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    /// Write this status to the sequence.
    SetStatus(SequenceStatus),
    /// Wait the delay of step `index`, then fire it.
    AwaitStep {
        /// Step index.
        index: usize,
    },
    /// Cancel the pending step wait.
    CancelWait,
    /// Stamp `lastRun` with the current time.
    RecordLastRun,
}

/// Progress of the single active run - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceRun {
    /// No run active.
    #[default]
    Idle,
    /// Executing.
    Running {
        /// Index of the next step to fire.
        pointer: usize,
        /// Number of steps.
        len: usize,
    },
}

impl SequenceRun {
    /// Index of the step being waited on, or `None` when not running.
    pub fn pointer(&self) -> Option<usize> {
        match self {
            SequenceRun::Idle => None,
            SequenceRun::Running { pointer, .. } => Some(*pointer),
        }
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        matches!(self, SequenceRun::Running { .. })
    }

    /// Process an event and return the new run state plus actions to execute.
    pub fn on_event(self, event: RunEvent) -> Result<(Self, Vec<RunAction>), CommandRejected> {
        match (self, event) {
            (SequenceRun::Running { .. }, RunEvent::Start { .. }) => {
                Err(CommandRejected::SequenceRunning)
            }

            (SequenceRun::Idle, RunEvent::Start { len: 0 }) => Ok((
                SequenceRun::Idle,
                vec![
                    RunAction::SetStatus(SequenceStatus::Running),
                    RunAction::SetStatus(SequenceStatus::Completed),
                    RunAction::RecordLastRun,
                ],
            )),
            (SequenceRun::Idle, RunEvent::Start { len }) => Ok((
                SequenceRun::Running { pointer: 0, len },
                vec![
                    RunAction::SetStatus(SequenceStatus::Running),
                    RunAction::AwaitStep { index: 0 },
                ],
            )),

            (SequenceRun::Running { pointer, len }, RunEvent::StepFired) => {
                let next = pointer + 1;
                if next >= len {
                    Ok((
                        SequenceRun::Idle,
                        vec![
                            RunAction::SetStatus(SequenceStatus::Completed),
                            RunAction::RecordLastRun,
                        ],
                    ))
                } else {
                    Ok((
                        SequenceRun::Running { pointer: next, len },
                        vec![RunAction::AwaitStep { index: next }],
                    ))
                }
            }

            (SequenceRun::Running { .. }, RunEvent::StepFailed) => Ok((
                SequenceRun::Idle,
                vec![RunAction::SetStatus(SequenceStatus::Error)],
            )),

            (SequenceRun::Running { .. }, RunEvent::Stop) => Ok((
                SequenceRun::Idle,
                vec![
                    RunAction::CancelWait,
                    RunAction::SetStatus(SequenceStatus::Ready),
                ],
            )),

            // Stop when idle and late step results are no-ops
            (SequenceRun::Idle, _) => Ok((SequenceRun::Idle, vec![])),
        }
    }
}

/// Step editing, refused while the sequence is running.
pub trait SequenceEdit {
    /// Append a step.
    fn add_step(&mut self, step: SequenceStep, max_steps: usize) -> Result<(), CommandRejected>;

    /// Remove and return the step at `index`.
    fn remove_step(&mut self, index: usize) -> Result<SequenceStep, CommandRejected>;

    /// Move the step at `from` so it ends up at `to`.
    fn move_step(&mut self, from: usize, to: usize) -> Result<(), CommandRejected>;

    /// Change the delay of the step at `index`.
    fn set_step_delay(&mut self, index: usize, delay_seconds: f64) -> Result<(), CommandRejected>;
}

impl SequenceEdit for Sequence {
    fn add_step(&mut self, step: SequenceStep, max_steps: usize) -> Result<(), CommandRejected> {
        self.check_editable()?;
        check_delay(step.delay_seconds)?;
        if self.steps.len() >= max_steps {
            return Err(CommandRejected::TooManySteps { max: max_steps });
        }
        self.steps.push(step);
        Ok(())
    }

    fn remove_step(&mut self, index: usize) -> Result<SequenceStep, CommandRejected> {
        self.check_editable()?;
        self.check_index(index)?;
        Ok(self.steps.remove(index))
    }

    fn move_step(&mut self, from: usize, to: usize) -> Result<(), CommandRejected> {
        self.check_editable()?;
        self.check_index(from)?;
        self.check_index(to)?;
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    fn set_step_delay(&mut self, index: usize, delay_seconds: f64) -> Result<(), CommandRejected> {
        self.check_editable()?;
        self.check_index(index)?;
        check_delay(delay_seconds)?;
        self.steps[index].delay_seconds = delay_seconds;
        Ok(())
    }
}

trait EditGuards {
    fn check_editable(&self) -> Result<(), CommandRejected>;
    fn check_index(&self, index: usize) -> Result<(), CommandRejected>;
}

impl EditGuards for Sequence {
    fn check_editable(&self) -> Result<(), CommandRejected> {
        if self.is_running() {
            return Err(CommandRejected::SequenceRunning);
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), CommandRejected> {
        if index >= self.steps.len() {
            return Err(CommandRejected::StepOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }
}

fn check_delay(delay: f64) -> Result<(), CommandRejected> {
    if !delay.is_finite() || delay < 0.0 {
        return Err(CommandRejected::InvalidDelay { delay });
    }
    Ok(())
}
