//! The `ControlPlane` trait and the values it exchanges.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use drift_core::{GuestId, GuestLocation, MigrationRequest, NodeName, Progress, TaskHandle};

use crate::error::ControlResult;

/// Boxed future returned by every control-plane call.
pub type ControlFuture<'a, T> = Pin<Box<dyn Future<Output = ControlResult<T>> + Send + 'a>>;

/// Reply to a successful migration submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedMigration {
    pub task: TaskHandle,
    pub source_node: NodeName,
    pub target_node: NodeName,
}

/// Reply to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOutcome {
    pub success: bool,
}

/// Coarse task state as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Stopped,
}

/// Status of one control-plane task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Exit status text, present once the task has stopped (`"OK"` on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

impl TaskStatus {
    pub fn running(progress: Option<Progress>) -> Self {
        Self {
            state: TaskState::Running,
            exit_status: None,
            progress,
        }
    }

    pub fn stopped(exit_status: &str) -> Self {
        Self {
            state: TaskState::Stopped,
            exit_status: Some(exit_status.to_string()),
            progress: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// Authoritative cluster-wide placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLocations {
    pub guests: BTreeMap<GuestId, GuestLocation>,
    /// Guest ids hosted by each node. Nodes without guests are still listed.
    pub nodes: BTreeMap<NodeName, Vec<GuestId>>,
    /// Lower-cased tags of guests that carry any.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<GuestId, Vec<String>>,
}

impl ClusterLocations {
    /// Add a guest to both indexes.
    pub fn insert(&mut self, guest: GuestId, node: &str, status: &str) {
        self.guests.insert(
            guest,
            GuestLocation {
                node: node.to_string(),
                status: status.to_string(),
            },
        );
        self.nodes.entry(node.to_string()).or_default().push(guest);
    }

    pub fn set_tags<I, S>(&mut self, guest: GuestId, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: Vec<String> = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            self.tags.remove(&guest);
        } else {
            self.tags.insert(guest, tags);
        }
    }
}

/// Operations offered by the external hypervisor control plane.
///
/// Implementations must be safe to call concurrently from many poll
/// workers. Errors are values; no call panics on a remote failure.
pub trait ControlPlane: Send + Sync {
    /// Start a migration task. Fails with `ControlError::Submission`.
    fn submit_migration<'a>(
        &'a self,
        request: &'a MigrationRequest,
    ) -> ControlFuture<'a, SubmittedMigration>;

    /// Ask the node running `task` to stop it.
    fn stop_task<'a>(&'a self, node: &'a str, task: &'a TaskHandle)
    -> ControlFuture<'a, StopOutcome>;

    /// Whether the guest is still flagged as migrating.
    fn query_migrating_state(&self, guest: GuestId) -> ControlFuture<'_, bool>;

    fn query_task_status<'a>(
        &'a self,
        node: &'a str,
        task: &'a TaskHandle,
    ) -> ControlFuture<'a, TaskStatus>;

    /// Current placement of one guest.
    fn query_guest_location(&self, guest: GuestId) -> ControlFuture<'_, GuestLocation>;

    /// Placement of every guest in the cluster.
    fn query_all_guest_locations(&self) -> ControlFuture<'_, ClusterLocations>;
}
