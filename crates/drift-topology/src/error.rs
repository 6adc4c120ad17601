use thiserror::Error;

use drift_core::GuestId;

pub type TopologyResult<T> = Result<T, TopologyError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("guest {0} is not in the topology")]
    UnknownGuest(GuestId),

    /// The referential invariant between nodes and guests is broken.
    #[error("inconsistent topology: {0}")]
    Inconsistent(String),
}
