use thiserror::Error;

use drift_core::GuestId;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("guest {0} already has a migration in progress")]
    AlreadyTracking(GuestId),

    #[error("no active migration for guest {0}")]
    NotTracking(GuestId),

    #[error("migration submission failed: {0}")]
    Submission(String),

    #[error("stop request failed: {0}")]
    Stop(String),
}
