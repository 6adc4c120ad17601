//! Events broadcast by the tracker.

use serde::Serialize;

use drift_core::{GuestId, GuestLocation};

use crate::operation::MigrationOperation;

/// Change notification carrying the operation as it was after the change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    Started {
        operation: MigrationOperation,
    },
    ProgressUpdated {
        operation: MigrationOperation,
    },
    Completed {
        operation: MigrationOperation,
        /// Location confirmed by the post-completion lookup.
        location: GuestLocation,
    },
    Cancelled {
        operation: MigrationOperation,
    },
    Failed {
        operation: MigrationOperation,
    },
    TimedOut {
        operation: MigrationOperation,
    },
}

impl TrackerEvent {
    pub fn operation(&self) -> &MigrationOperation {
        match self {
            TrackerEvent::Started { operation }
            | TrackerEvent::ProgressUpdated { operation }
            | TrackerEvent::Completed { operation, .. }
            | TrackerEvent::Cancelled { operation }
            | TrackerEvent::Failed { operation }
            | TrackerEvent::TimedOut { operation } => operation,
        }
    }

    pub fn guest_id(&self) -> GuestId {
        self.operation().guest.id
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TrackerEvent::Started { .. } | TrackerEvent::ProgressUpdated { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackerEvent::Started { .. } => "started",
            TrackerEvent::ProgressUpdated { .. } => "progress_updated",
            TrackerEvent::Completed { .. } => "completed",
            TrackerEvent::Cancelled { .. } => "cancelled",
            TrackerEvent::Failed { .. } => "failed",
            TrackerEvent::TimedOut { .. } => "timed_out",
        }
    }
}
