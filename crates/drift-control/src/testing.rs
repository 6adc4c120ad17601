//! In-memory control plane with scripted replies.
//!
//! Each per-guest script is a queue. Replies are taken from the front;
//! the last entry sticks and is repeated for every later call.
//! Unscripted guests report "not migrating", a task that stopped with
//! `"OK"`, and a location on the target of their latest submission.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use drift_core::{GuestId, GuestLocation, MigrationRequest, TaskHandle};

use crate::error::{ControlError, ControlResult};
use crate::port::{
    ClusterLocations, ControlFuture, ControlPlane, StopOutcome, SubmittedMigration, TaskStatus,
};

#[derive(Default)]
struct Script {
    migrating: HashMap<GuestId, VecDeque<ControlResult<bool>>>,
    tasks: HashMap<GuestId, VecDeque<ControlResult<TaskStatus>>>,
    locations: HashMap<GuestId, VecDeque<ControlResult<GuestLocation>>>,
    all_locations: Option<ControlResult<ClusterLocations>>,
    submit_failures: HashMap<GuestId, String>,
    submit_delay: Option<Duration>,
    stop_result: Option<ControlResult<StopOutcome>>,

    handles: HashMap<TaskHandle, GuestId>,
    submitted: Vec<MigrationRequest>,
    stops: Vec<(String, TaskHandle)>,
    migrating_calls: HashMap<GuestId, usize>,
    location_calls: HashMap<GuestId, usize>,
    all_location_calls: usize,
    in_flight: HashSet<GuestId>,
    max_in_flight: usize,
}

fn next<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Scripted [`ControlPlane`] for tests.
#[derive(Default)]
pub struct ScriptedControlPlane {
    script: Mutex<Script>,
    seq: AtomicU64,
}

impl ScriptedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    // ── Scripting ─────────────────────────────────────────────────

    /// Successive migrating-flag replies for `guest`.
    pub fn script_migrating(&self, guest: GuestId, flags: impl IntoIterator<Item = bool>) {
        let replies = flags.into_iter().map(Ok).collect();
        self.with(|s| s.migrating.insert(guest, replies));
    }

    pub fn script_migrating_results(&self, guest: GuestId, replies: Vec<ControlResult<bool>>) {
        self.with(|s| s.migrating.insert(guest, replies.into()));
    }

    /// Successive task-status replies for the task migrating `guest`.
    pub fn script_task(&self, guest: GuestId, statuses: impl IntoIterator<Item = TaskStatus>) {
        let replies = statuses.into_iter().map(Ok).collect();
        self.with(|s| s.tasks.insert(guest, replies));
    }

    pub fn script_task_results(&self, guest: GuestId, replies: Vec<ControlResult<TaskStatus>>) {
        self.with(|s| s.tasks.insert(guest, replies.into()));
    }

    /// Successive location replies for `guest`.
    pub fn script_location(&self, guest: GuestId, replies: Vec<ControlResult<GuestLocation>>) {
        self.with(|s| s.locations.insert(guest, replies.into()));
    }

    pub fn set_all_locations(&self, locations: ClusterLocations) {
        self.with(|s| s.all_locations = Some(Ok(locations)));
    }

    pub fn fail_all_locations(&self, message: &str) {
        self.with(|s| s.all_locations = Some(Err(ControlError::Query(message.to_string()))));
    }

    /// Make every submission for `guest` fail.
    pub fn fail_submission(&self, guest: GuestId, message: &str) {
        self.with(|s| s.submit_failures.insert(guest, message.to_string()));
    }

    /// Make every submission wait `delay` before it is answered.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.with(|s| s.submit_delay = Some(delay));
    }

    pub fn set_stop_result(&self, result: ControlResult<StopOutcome>) {
        self.with(|s| s.stop_result = Some(result));
    }

    // ── Inspection ────────────────────────────────────────────────

    /// Submissions in the order they were received.
    pub fn submitted(&self) -> Vec<MigrationRequest> {
        self.with(|s| s.submitted.clone())
    }

    pub fn stop_requests(&self) -> Vec<(String, TaskHandle)> {
        self.with(|s| s.stops.clone())
    }

    pub fn migrating_calls(&self, guest: GuestId) -> usize {
        self.with(|s| s.migrating_calls.get(&guest).copied().unwrap_or(0))
    }

    pub fn location_calls(&self, guest: GuestId) -> usize {
        self.with(|s| s.location_calls.get(&guest).copied().unwrap_or(0))
    }

    pub fn all_location_calls(&self) -> usize {
        self.with(|s| s.all_location_calls)
    }

    /// Highest number of submitted migrations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.with(|s| s.max_in_flight)
    }
}

impl ControlPlane for ScriptedControlPlane {
    fn submit_migration<'a>(
        &'a self,
        request: &'a MigrationRequest,
    ) -> ControlFuture<'a, SubmittedMigration> {
        Box::pin(async move {
            if let Some(delay) = self.with(|s| s.submit_delay) {
                tokio::time::sleep(delay).await;
            }
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            self.with(|s| {
                s.submitted.push(request.clone());
                if let Some(message) = s.submit_failures.get(&request.guest.id) {
                    return Err(ControlError::Submission(message.clone()));
                }
                let task = TaskHandle::new(format!(
                    "UPID:{}:{}:{seq:04}",
                    request.source_node, request.guest.id
                ));
                s.handles.insert(task.clone(), request.guest.id);
                s.in_flight.insert(request.guest.id);
                s.max_in_flight = s.max_in_flight.max(s.in_flight.len());
                Ok(SubmittedMigration {
                    task,
                    source_node: request.source_node.clone(),
                    target_node: request.target_node.clone(),
                })
            })
        })
    }

    fn stop_task<'a>(
        &'a self,
        node: &'a str,
        task: &'a TaskHandle,
    ) -> ControlFuture<'a, StopOutcome> {
        Box::pin(async move {
            self.with(|s| {
                s.stops.push((node.to_string(), task.clone()));
                s.stop_result
                    .clone()
                    .unwrap_or(Ok(StopOutcome { success: true }))
            })
        })
    }

    fn query_migrating_state(&self, guest: GuestId) -> ControlFuture<'_, bool> {
        Box::pin(async move {
            self.with(|s| {
                *s.migrating_calls.entry(guest).or_default() += 1;
                let reply = next(s.migrating.get_mut(&guest)).unwrap_or(Ok(false));
                if matches!(reply, Ok(false)) {
                    s.in_flight.remove(&guest);
                }
                reply
            })
        })
    }

    fn query_task_status<'a>(
        &'a self,
        _node: &'a str,
        task: &'a TaskHandle,
    ) -> ControlFuture<'a, TaskStatus> {
        Box::pin(async move {
            self.with(|s| {
                let guest = s.handles.get(task).copied();
                guest
                    .and_then(|g| next(s.tasks.get_mut(&g)))
                    .unwrap_or_else(|| Ok(TaskStatus::stopped("OK")))
            })
        })
    }

    fn query_guest_location(&self, guest: GuestId) -> ControlFuture<'_, GuestLocation> {
        Box::pin(async move {
            self.with(|s| {
                *s.location_calls.entry(guest).or_default() += 1;
                if let Some(reply) = next(s.locations.get_mut(&guest)) {
                    return reply;
                }
                s.submitted
                    .iter()
                    .rev()
                    .find(|r| r.guest.id == guest)
                    .map(|r| GuestLocation {
                        node: r.target_node.clone(),
                        status: "running".to_string(),
                    })
                    .ok_or_else(|| ControlError::Query(format!("guest {guest} not found")))
            })
        })
    }

    fn query_all_guest_locations(&self) -> ControlFuture<'_, ClusterLocations> {
        Box::pin(async move {
            self.with(|s| {
                s.all_location_calls += 1;
                s.all_locations
                    .clone()
                    .unwrap_or_else(|| Ok(ClusterLocations::default()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::GuestRef;

    #[tokio::test]
    async fn test_last_reply_sticks() {
        let control = ScriptedControlPlane::new();
        control.script_migrating(101, [true, false]);

        assert!(control.query_migrating_state(101).await.unwrap());
        assert!(!control.query_migrating_state(101).await.unwrap());
        assert!(!control.query_migrating_state(101).await.unwrap());
        assert_eq!(control.migrating_calls(101), 3);
    }

    #[tokio::test]
    async fn test_unscripted_defaults_follow_submission() {
        let control = ScriptedControlPlane::new();
        let request = MigrationRequest::new(GuestRef::vm(7), "node-a", "node-b");
        let submitted = control.submit_migration(&request).await.unwrap();

        let status = control
            .query_task_status("node-a", &submitted.task)
            .await
            .unwrap();
        assert_eq!(status.exit_status.as_deref(), Some("OK"));
        assert_eq!(control.query_guest_location(7).await.unwrap().node, "node-b");
        assert!(control.query_guest_location(8).await.is_err());
    }

    #[tokio::test]
    async fn test_in_flight_high_water_mark() {
        let control = ScriptedControlPlane::new();
        let a = MigrationRequest::new(GuestRef::vm(1), "n1", "n2");
        let b = MigrationRequest::new(GuestRef::vm(2), "n1", "n2");

        control.submit_migration(&a).await.unwrap();
        control.submit_migration(&b).await.unwrap();
        assert_eq!(control.max_in_flight(), 2);

        control.query_migrating_state(1).await.unwrap();
        control.query_migrating_state(2).await.unwrap();
        control.submit_migration(&a).await.unwrap();
        assert_eq!(control.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let control = ScriptedControlPlane::new();
        control.fail_submission(5, "node offline");
        let request = MigrationRequest::new(GuestRef::vm(5), "n1", "n2");
        let err = control.submit_migration(&request).await.unwrap_err();
        assert_eq!(err, ControlError::Submission("node offline".to_string()));
        assert_eq!(control.submitted().len(), 1);
    }
}
