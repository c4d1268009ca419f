//! Execution context errors.

use std::path::PathBuf;

use worker_core::TimelineRecordState;
use worker_services::ServiceError;

/// Error type for execution context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors that can occur while tracking a job.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A required argument is missing or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A value is outside its allowed range
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Argument name
        name: &'static str,
        /// Supplied value
        value: i64,
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
    },

    /// Lifecycle transition not allowed from the current state
    #[error("cannot move record from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state
        from: TimelineRecordState,
        /// Requested state
        to: TimelineRecordState,
    },

    /// File does not exist
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A timeout was requested outside a tokio runtime
    #[error("a tokio runtime is required to arm a timeout")]
    NoRuntime,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collaborator failure
    #[error(transparent)]
    Service(#[from] ServiceError),
}
