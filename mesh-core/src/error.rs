//! Rejection and validation errors.
//!
//! Both are reported synchronously to the caller and never retried. A
//! rejected command or an invalid payload leaves all state untouched.

use mesh_types::{RelayStatus, SequenceId};
use std::fmt;
use thiserror::Error;

/// A command refused by a safety interlock or lifecycle rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejected {
    /// Fire requested on a channel that is fired or firing.
    #[error("relay has already fired ({status}); prime it first")]
    AlreadyFired {
        /// Status at the time of the request.
        status: RelayStatus,
    },

    /// Fire requested while a confirmation countdown is pending.
    #[error("a fire countdown is already pending on this relay")]
    CountdownPending,

    /// The device has taken the channel out of service.
    #[error("relay is unavailable ({status})")]
    Unavailable {
        /// Status at the time of the request.
        status: RelayStatus,
    },

    /// Prime requested on a channel that has not fired.
    #[error("relay is {status}, only a fired relay can be primed")]
    NotFired {
        /// Status at the time of the request.
        status: RelayStatus,
    },

    /// Stage requested on a channel that is not ready.
    #[error("relay is {status}, only a ready relay can be staged")]
    NotReady {
        /// Status at the time of the request.
        status: RelayStatus,
    },

    /// Fire requested with no channel selected.
    #[error("no relay selected")]
    NoChannelSelected,

    /// The addressed channel is not in the store.
    #[error("unknown relay {0}")]
    UnknownChannel(String),

    /// A sequence run is already active, or the sequence is locked for editing.
    #[error("a sequence is already running")]
    SequenceRunning,

    /// The addressed sequence is not in the store.
    #[error("unknown sequence {0}")]
    UnknownSequence(SequenceId),

    /// Adding a step would exceed the configured maximum.
    #[error("sequence already has the maximum of {max} steps")]
    TooManySteps {
        /// Configured maximum.
        max: usize,
    },

    /// A step index outside the sequence.
    #[error("step {index} out of range (sequence has {len} steps)")]
    StepOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of steps.
        len: usize,
    },

    /// A step delay that is negative or not a number.
    #[error("invalid step delay {delay}")]
    InvalidDelay {
        /// Requested delay (s).
        delay: f64,
    },
}

/// One offending field in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Wire name of the field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A malformed configuration or command payload, reported per field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payload: {}", join(.errors))]
pub struct ValidationError {
    /// Every offending field, in declaration order.
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Whether a particular field was flagged.
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages() {
        let err = CommandRejected::AlreadyFired {
            status: RelayStatus::Fired,
        };
        assert_eq!(err.to_string(), "relay has already fired (fired); prime it first");
        assert_eq!(
            CommandRejected::TooManySteps { max: 50 }.to_string(),
            "sequence already has the maximum of 50 steps"
        );
    }

    #[test]
    fn validation_error_lists_every_field() {
        let err = ValidationError {
            errors: vec![
                FieldError {
                    field: "ssid",
                    message: "must be 1-32 characters".into(),
                },
                FieldError {
                    field: "channel",
                    message: "must be between 1 and 13".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "invalid payload: ssid: must be 1-32 characters; channel: must be between 1 and 13"
        );
        assert!(err.has_field("channel"));
        assert!(!err.has_field("txPower"));
    }
}
