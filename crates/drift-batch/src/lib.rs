//! drift-batch — sequential execution of migration requests.
//!
//! Concurrent relocations compete for shared storage and network
//! bandwidth, so a batch submits request N+1 only after request N has
//! reached a terminal state.

pub mod coordinator;
pub mod report;

pub use coordinator::BatchCoordinator;
pub use report::{BatchCounts, BatchEntry, BatchOutcome, BatchReport};
