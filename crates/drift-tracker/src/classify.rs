//! Exit classification for a migration that stopped reporting "migrating".
//!
//! The control plane has no single success flag. A finished migration is
//! recognised from two signals: the task's exit status, and a fresh
//! lookup of where the guest now runs. This module covers the first
//! half; the worker performs the lookup when [`Exit::NeedsLocation`] is
//! returned.

use drift_control::TaskStatus;

/// Exit texts that mean the migration was stopped rather than finished.
const CANCEL_MARKERS: [&str; 2] = ["unexpected status", "aborted"];

/// Exit status reported by a task that finished cleanly.
pub const EXIT_OK: &str = "OK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Not finished yet; poll again.
    StillRunning,
    Cancelled { exit_status: String },
    /// Finished; success depends on the location lookup.
    NeedsLocation { exit_status: String },
}

pub fn is_cancel_exit(exit_status: &str) -> bool {
    let lower = exit_status.to_ascii_lowercase();
    CANCEL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Classify one tick's observations.
///
/// `migrating` is the guest's migrating flag; `task` the task status read
/// in the same tick. After an accepted stop request any non-`OK` exit
/// counts as a cancellation.
pub fn classify_exit(migrating: bool, task: &TaskStatus, cancel_requested: bool) -> Exit {
    if migrating || task.is_running() {
        return Exit::StillRunning;
    }
    let exit_status = task.exit_status.clone().unwrap_or_default();
    if is_cancel_exit(&exit_status) || (cancel_requested && exit_status != EXIT_OK) {
        Exit::Cancelled { exit_status }
    } else {
        Exit::NeedsLocation { exit_status }
    }
}
