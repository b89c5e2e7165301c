//! Error taxonomy for test selection and evaluation.
//!
//! Library seams return [`SelectionError`]. Failures of a single program call
//! during a trial are [`ExecutionError`]s; they never abort a batch and are
//! counted as detections by the evaluator.

use thiserror::Error;

/// Errors raised while building domains, sampling or loading configuration.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The request cannot be satisfied as stated (e.g. sample larger than the domain).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed or missing partition / relation / strategy configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A relation could not produce follow-up test cases.
    #[error("relation {relation} failed: {message}")]
    Relation { relation: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SelectionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Failure of one program-under-test invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The program reported a fault (e.g. it did not terminate within its iteration cap).
    #[error("program fault: {0}")]
    Fault(String),

    /// The program panicked.
    #[error("program panicked: {0}")]
    Panicked(String),

    /// The call exceeded the per-call wall-clock budget.
    #[error("program call exceeded {0} ms")]
    Timeout(u64),
}

/// Error returned by a relation's follow-up generation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct RelationError(pub String);
