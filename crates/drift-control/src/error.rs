//! Control-plane error types.

use thiserror::Error;

/// Result type alias for control-plane calls.
pub type ControlResult<T> = Result<T, ControlError>;

/// Failures reported by the external control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The migration could not be started. Never tracked.
    #[error("migration submission failed: {0}")]
    Submission(String),

    /// A stop request was rejected or could not be delivered.
    #[error("stop request failed: {0}")]
    Stop(String),

    /// A read query failed. Transient during polling.
    #[error("query failed: {0}")]
    Query(String),
}
