//! The tracked-operation record and its state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use drift_core::{GuestRef, NodeName, Progress, TaskHandle, epoch_secs};

/// Lifecycle state of a migration operation.
///
/// `Pending → Running → {Succeeded | Cancelled | Failed}`, with
/// `TimedOut` reachable from any non-terminal state. Terminal states
/// never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Running,
    Succeeded,
    Cancelled,
    Failed,
    /// Local tracking gave up; the external outcome is unknown.
    TimedOut,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OperationState::Pending | OperationState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Succeeded => "succeeded",
            OperationState::Cancelled => "cancelled",
            OperationState::Failed => "failed",
            OperationState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relocation job as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOperation {
    pub guest: GuestRef,
    pub source_node: NodeName,
    pub target_node: NodeName,
    pub task: TaskHandle,
    pub state: OperationState,
    /// Unix epoch seconds.
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// A stop request was accepted by the control plane.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Node reported by the post-completion location lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_node: Option<NodeName>,
}

impl MigrationOperation {
    pub fn new(guest: GuestRef, source_node: &str, target_node: &str, task: TaskHandle) -> Self {
        Self {
            guest,
            source_node: source_node.to_string(),
            target_node: target_node.to_string(),
            task,
            state: OperationState::Pending,
            started_at: epoch_secs(),
            finished_at: None,
            progress: None,
            last_error: None,
            cancel_requested: false,
            observed_node: None,
        }
    }

    /// Seconds the operation ran, up to `finished_at` or now.
    pub fn duration_secs(&self) -> u64 {
        self.finished_at
            .unwrap_or_else(epoch_secs)
            .saturating_sub(self.started_at)
    }
}
