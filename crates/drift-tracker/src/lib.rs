//! drift-tracker — lifecycle of long-running relocation jobs.
//!
//! The [`OperationTracker`] owns the table of known operations, keyed by
//! guest id. Every tracked operation gets its own poll worker task that
//! queries the control plane on a fixed interval and reports back to the
//! tracker over a channel; the tracker applies the resulting state change
//! and broadcasts the matching [`TrackerEvent`] under the same lock, so
//! no subscriber can observe a state without its event having been queued.

pub mod classify;
pub mod error;
pub mod event;
pub mod operation;
pub mod tracker;
mod worker;

pub use classify::{Exit, classify_exit, is_cancel_exit};
pub use error::{TrackerError, TrackerResult};
pub use event::TrackerEvent;
pub use operation::{MigrationOperation, OperationState};
pub use tracker::OperationTracker;
