//! OperationTracker — the active-operations table and its poll workers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use drift_control::ControlPlane;
use drift_core::config::TrackerConfig;
use drift_core::{GuestId, GuestRef, MigrationRequest, TaskHandle, epoch_secs};

use crate::error::{TrackerError, TrackerResult};
use crate::event::TrackerEvent;
use crate::operation::{MigrationOperation, OperationState};
use crate::worker::{Outcome, PollWorker, ReportKind, WorkerReport, WorkerTiming};

const EVENT_CAPACITY: usize = 256;

/// Poll worker handle kept alongside its operation.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    cancel_requested: Arc<AtomicBool>,
}

struct Entry {
    id: u64,
    operation: MigrationOperation,
    worker: Option<WorkerSlot>,
}

#[derive(Default)]
struct Table {
    operations: BTreeMap<GuestId, Entry>,
    history: VecDeque<MigrationOperation>,
    /// Guests whose submission is awaiting the control plane.
    submitting: BTreeSet<GuestId>,
    next_id: u64,
}

impl Table {
    /// Whether `guest` has an active operation or a submission in flight.
    fn is_claimed(&self, guest: GuestId) -> bool {
        self.submitting.contains(&guest)
            || self
                .operations
                .get(&guest)
                .is_some_and(|e| e.operation.state.is_active())
    }

    fn archive(&mut self, operation: MigrationOperation, limit: usize) {
        self.history.push_back(operation);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

struct Inner {
    control: Arc<dyn ControlPlane>,
    config: TrackerConfig,
    table: RwLock<Table>,
    events: broadcast::Sender<TrackerEvent>,
    reports: mpsc::UnboundedSender<WorkerReport>,
}

/// Tracks in-flight migrations until they reach a terminal state.
///
/// Cloning is cheap; all clones share one table.
#[derive(Clone)]
pub struct OperationTracker {
    inner: Arc<Inner>,
}

impl OperationTracker {
    /// Create a tracker and start its report loop. Must be called inside a
    /// tokio runtime.
    pub fn new(control: Arc<dyn ControlPlane>, config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (reports, report_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            control,
            config,
            table: RwLock::new(Table::default()),
            events,
            reports,
        });
        tokio::spawn(run_report_loop(Arc::downgrade(&inner), report_rx));
        Self { inner }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn control(&self) -> Arc<dyn ControlPlane> {
        self.inner.control.clone()
    }

    /// Start tracking a migration the control plane already accepted.
    pub async fn begin(
        &self,
        guest: GuestRef,
        source_node: &str,
        target_node: &str,
        task: TaskHandle,
    ) -> TrackerResult<MigrationOperation> {
        let mut table = self.inner.table.write().await;
        if table.is_claimed(guest.id) {
            return Err(TrackerError::AlreadyTracking(guest.id));
        }
        Ok(self.start_locked(&mut table, guest, source_node, target_node, task))
    }

    /// Submit a migration to the control plane and track it.
    ///
    /// The guest is reserved before the control plane is called, so a
    /// concurrent submit for the same guest is rejected instead of
    /// starting a second external migration. Nothing is tracked when the
    /// submission fails.
    pub async fn submit(&self, request: &MigrationRequest) -> TrackerResult<MigrationOperation> {
        let guest = request.guest;
        {
            let mut table = self.inner.table.write().await;
            if table.is_claimed(guest.id) {
                return Err(TrackerError::AlreadyTracking(guest.id));
            }
            table.submitting.insert(guest.id);
        }

        let mut reservation = Reservation {
            inner: Some(self.inner.clone()),
            guest: guest.id,
        };
        let result = self.inner.control.submit_migration(request).await;

        let mut table = self.inner.table.write().await;
        table.submitting.remove(&guest.id);
        reservation.inner = None;
        let submitted = result.map_err(|e| {
            warn!(guest = guest.id, error = %e, "migration submission failed");
            TrackerError::Submission(e.to_string())
        })?;
        Ok(self.start_locked(
            &mut table,
            guest,
            &submitted.source_node,
            &submitted.target_node,
            submitted.task,
        ))
    }

    /// Insert a new operation and spawn its poll worker. The caller holds
    /// the write lock and has checked that `guest` is free.
    fn start_locked(
        &self,
        table: &mut Table,
        guest: GuestRef,
        source_node: &str,
        target_node: &str,
        task: TaskHandle,
    ) -> MigrationOperation {
        // A terminal operation still in its grace period is archived now.
        if let Some(previous) = table.operations.remove(&guest.id) {
            table.archive(previous.operation, self.inner.config.history_limit);
        }

        table.next_id += 1;
        let id = table.next_id;
        let operation = MigrationOperation::new(guest, source_node, target_node, task.clone());

        let cancel_requested = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = PollWorker {
            id,
            guest,
            source_node: source_node.to_string(),
            task: task.clone(),
            control: self.inner.control.clone(),
            timing: WorkerTiming {
                poll_interval: self.inner.config.poll_interval,
                timeout: self.inner.config.timeout,
                location_retries: self.inner.config.location_retries,
            },
            cancel_requested: cancel_requested.clone(),
            reports: self.inner.reports.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        table.operations.insert(
            guest.id,
            Entry {
                id,
                operation: operation.clone(),
                worker: Some(WorkerSlot {
                    handle,
                    shutdown_tx,
                    cancel_requested,
                }),
            },
        );
        let _ = self.inner.events.send(TrackerEvent::Started {
            operation: operation.clone(),
        });

        info!(guest = guest.id, source = %source_node, target = %target_node, %task, "tracking migration");
        operation
    }

    /// Ask the control plane to stop a tracked migration.
    ///
    /// Returns once the stop request is accepted; the operation turns
    /// `Cancelled` when a later poll tick observes the stopped task.
    pub async fn cancel(&self, guest: GuestId) -> TrackerResult<()> {
        let (id, source_node, task) = {
            let table = self.inner.table.read().await;
            let entry = table
                .operations
                .get(&guest)
                .filter(|e| e.operation.state.is_active())
                .ok_or(TrackerError::NotTracking(guest))?;
            if entry.operation.cancel_requested {
                return Ok(());
            }
            (
                entry.id,
                entry.operation.source_node.clone(),
                entry.operation.task.clone(),
            )
        };

        let outcome = self
            .inner
            .control
            .stop_task(&source_node, &task)
            .await
            .map_err(|e| {
                warn!(guest, %task, error = %e, "stop request failed");
                TrackerError::Stop(e.to_string())
            })?;
        if !outcome.success {
            warn!(guest, %task, "control plane refused to stop task");
            return Err(TrackerError::Stop(format!(
                "control plane refused to stop task {task}"
            )));
        }

        let mut table = self.inner.table.write().await;
        if let Some(entry) = table.operations.get_mut(&guest) {
            if entry.id == id && entry.operation.state.is_active() {
                entry.operation.cancel_requested = true;
                if let Some(worker) = &entry.worker {
                    worker.cancel_requested.store(true, Ordering::Release);
                }
                info!(guest, %task, "stop requested");
            }
        }
        Ok(())
    }

    /// All operations currently in the table, active or in their grace period.
    pub async fn snapshot(&self) -> BTreeMap<GuestId, MigrationOperation> {
        let table = self.inner.table.read().await;
        table
            .operations
            .iter()
            .map(|(guest, entry)| (*guest, entry.operation.clone()))
            .collect()
    }

    pub async fn get(&self, guest: GuestId) -> Option<MigrationOperation> {
        let table = self.inner.table.read().await;
        table.operations.get(&guest).map(|e| e.operation.clone())
    }

    /// Archived terminal operations, oldest first.
    pub async fn history(&self) -> Vec<MigrationOperation> {
        let table = self.inner.table.read().await;
        table.history.iter().cloned().collect()
    }

    /// Whether `guest` has a Pending or Running operation, or a
    /// submission still awaiting the control plane.
    pub async fn is_tracking(&self, guest: GuestId) -> bool {
        self.inner.table.read().await.is_claimed(guest)
    }

    pub async fn active_count(&self) -> usize {
        let table = self.inner.table.read().await;
        table
            .operations
            .values()
            .filter(|e| e.operation.state.is_active())
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Stop every poll worker. External migrations keep running.
    pub async fn shutdown(&self) {
        let mut table = self.inner.table.write().await;
        for (guest, entry) in table.operations.iter_mut() {
            if let Some(worker) = entry.worker.take() {
                let _ = worker.shutdown_tx.send(true);
                worker.handle.abort();
                debug!(guest = *guest, "poll worker stopped");
            }
        }
        info!("operation tracker stopped");
    }
}

/// Releases a submit reservation if the submitting future is dropped
/// while the control plane call is pending.
struct Reservation {
    inner: Option<Arc<Inner>>,
    guest: GuestId,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Some(inner) = self.inner.take() {
            let guest = self.guest;
            runtime.spawn(async move {
                inner.table.write().await.submitting.remove(&guest);
                debug!(guest, "abandoned submission released");
            });
        }
    }
}

async fn run_report_loop(inner: Weak<Inner>, mut reports: mpsc::UnboundedReceiver<WorkerReport>) {
    while let Some(report) = reports.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply(report, Arc::downgrade(&inner)).await;
    }
}

impl Inner {
    /// Apply one worker report. The state change and its event happen
    /// under the same write lock.
    async fn apply(&self, report: WorkerReport, this: Weak<Inner>) {
        let mut table = self.table.write().await;
        let Some(entry) = table.operations.get_mut(&report.guest) else {
            return;
        };
        if entry.id != report.id || entry.operation.state.is_terminal() {
            debug!(guest = report.guest, "dropping stale worker report");
            return;
        }
        let op = &mut entry.operation;

        let event = match report.kind {
            ReportKind::Tick { running, progress } => {
                let mut changed = false;
                if running && op.state == OperationState::Pending {
                    op.state = OperationState::Running;
                    changed = true;
                    info!(guest = op.guest.id, task = %op.task, "migration running");
                }
                if progress.is_some() && progress != op.progress {
                    op.progress = progress;
                    changed = true;
                }
                if !changed {
                    return;
                }
                TrackerEvent::ProgressUpdated {
                    operation: op.clone(),
                }
            }
            ReportKind::Finished(outcome) => {
                op.finished_at = Some(epoch_secs());
                match outcome {
                    Outcome::Succeeded { location } => {
                        op.state = OperationState::Succeeded;
                        op.observed_node = Some(location.node.clone());
                        if location.node != op.target_node {
                            warn!(guest = op.guest.id, expected = %op.target_node, observed = %location.node, "guest landed on an unexpected node");
                        }
                        info!(guest = op.guest.id, node = %location.node, "migration succeeded");
                        TrackerEvent::Completed {
                            operation: op.clone(),
                            location,
                        }
                    }
                    Outcome::Cancelled { exit_status } => {
                        op.state = OperationState::Cancelled;
                        info!(guest = op.guest.id, %exit_status, "migration cancelled");
                        TrackerEvent::Cancelled {
                            operation: op.clone(),
                        }
                    }
                    Outcome::Failed { error } => {
                        op.state = OperationState::Failed;
                        warn!(guest = op.guest.id, %error, "migration failed");
                        op.last_error = Some(error);
                        TrackerEvent::Failed {
                            operation: op.clone(),
                        }
                    }
                }
            }
            ReportKind::Expired => {
                op.finished_at = Some(epoch_secs());
                op.state = OperationState::TimedOut;
                op.last_error = Some(format!(
                    "no terminal status after {}s; outcome unknown",
                    self.config.timeout.as_secs()
                ));
                warn!(guest = op.guest.id, task = %op.task, "migration tracking timed out");
                TrackerEvent::TimedOut {
                    operation: op.clone(),
                }
            }
        };

        if event.is_terminal() {
            entry.worker = None;
            let (guest, id, grace) = (report.guest, report.id, self.config.grace_period);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Some(inner) = this.upgrade() {
                    inner.retire(guest, id).await;
                }
            });
        }
        let _ = self.events.send(event);
    }

    /// Move a terminal operation from the table into history.
    async fn retire(&self, guest: GuestId, id: u64) {
        let mut table = self.table.write().await;
        let retire = table
            .operations
            .get(&guest)
            .is_some_and(|e| e.id == id && e.operation.state.is_terminal());
        if retire {
            if let Some(entry) = table.operations.remove(&guest) {
                debug!(guest, state = %entry.operation.state, "operation archived");
                table.archive(entry.operation, self.config.history_limit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use drift_control::testing::ScriptedControlPlane;
    use drift_control::{ControlError, StopOutcome, TaskStatus};
    use drift_core::{GuestLocation, Progress};

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    fn setup(config: TrackerConfig) -> (Arc<ScriptedControlPlane>, OperationTracker) {
        let control = Arc::new(ScriptedControlPlane::new());
        let tracker = OperationTracker::new(control.clone(), config);
        (control, tracker)
    }

    fn request(guest: GuestId) -> MigrationRequest {
        MigrationRequest::new(GuestRef::vm(guest), "node-a", "node-b")
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.is_terminal() {
                return event;
            }
        }
    }

    fn location(node: &str) -> GuestLocation {
        GuestLocation {
            node: node.to_string(),
            status: "running".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_migrating_clears() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true, true, true, false]);
        control.script_task(
            101,
            [
                TaskStatus::running(Some(Progress::from_bytes(10, 100, 5.0))),
                TaskStatus::running(Some(Progress::from_bytes(50, 100, 5.0))),
                TaskStatus::running(Some(Progress::from_bytes(90, 100, 5.0))),
                TaskStatus::stopped("OK"),
            ],
        );
        control.script_location(101, vec![Ok(location("node-b"))]);
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), TrackerEvent::Started { .. }));

        match next_terminal(&mut rx).await {
            TrackerEvent::Completed { operation, location } => {
                assert_eq!(operation.state, OperationState::Succeeded);
                assert_eq!(location.node, "node-b");
                assert_eq!(operation.observed_node.as_deref(), Some("node-b"));
            }
            other => panic!("expected completed, got {other:?}"),
        }
        assert_eq!(control.migrating_calls(101), 4);
        assert_eq!(
            tracker.get(101).await.unwrap().state,
            OperationState::Succeeded
        );
        assert!(!tracker.is_tracking(101).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_marks_running() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true]);
        control.script_task(
            101,
            [TaskStatus::running(Some(Progress::from_bytes(25, 100, 1.0)))],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            TrackerEvent::ProgressUpdated { operation } => {
                assert_eq!(operation.state, OperationState::Running);
                assert_eq!(operation.progress.unwrap().percent, 25.0);
            }
            other => panic!("expected progress, got {other:?}"),
        }
        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_exit_is_cancelled() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true, true, true, false]);
        control.script_task(
            101,
            [
                TaskStatus::running(None),
                TaskStatus::running(None),
                TaskStatus::running(None),
                TaskStatus::stopped("migration aborted"),
            ],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        let event = next_terminal(&mut rx).await;
        assert!(matches!(event, TrackerEvent::Cancelled { .. }));
        assert_eq!(event.operation().state, OperationState::Cancelled);
        assert_eq!(control.location_calls(101), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_begin_rejected() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true]);

        tracker
            .begin(GuestRef::vm(101), "node-a", "node-b", TaskHandle::new("UPID:1"))
            .await
            .unwrap();
        let err = tracker
            .begin(GuestRef::vm(101), "node-a", "node-c", TaskHandle::new("UPID:2"))
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::AlreadyTracking(101));

        let err = tracker.submit(&request(101)).await.unwrap_err();
        assert_eq!(err, TrackerError::AlreadyTracking(101));
        assert!(control.submitted().is_empty());
        assert_eq!(tracker.snapshot().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_terminal_signal() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true]);
        control.script_task(101, [TaskStatus::running(None)]);
        let mut rx = tracker.subscribe();
        let start = tokio::time::Instant::now();

        tracker.submit(&request(101)).await.unwrap();
        let event = next_terminal(&mut rx).await;

        assert!(matches!(event, TrackerEvent::TimedOut { .. }));
        assert!(start.elapsed() >= Duration::from_secs(300));
        assert!(start.elapsed() < Duration::from_secs(303));
        let op = tracker.get(101).await.unwrap();
        assert_eq!(op.state, OperationState::TimedOut);
        assert!(op.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_location_lookup() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [false]);
        control.script_location(
            101,
            vec![Err(ControlError::Query("gateway down".to_string()))],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        let event = next_terminal(&mut rx).await;
        assert!(matches!(event, TrackerEvent::Failed { .. }));
        let error = event.operation().last_error.clone().unwrap();
        assert!(error.contains("gateway down"));
        assert_eq!(control.location_calls(101), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_retries() {
        let mut cfg = config();
        cfg.location_retries = 1;
        let (control, tracker) = setup(cfg);
        control.script_migrating(101, [false]);
        control.script_location(
            101,
            vec![
                Err(ControlError::Query("stale".to_string())),
                Ok(location("node-b")),
            ],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        assert!(matches!(
            next_terminal(&mut rx).await,
            TrackerEvent::Completed { .. }
        ));
        assert_eq!(control.location_calls(101), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_do_not_stop_polling() {
        let (control, tracker) = setup(config());
        control.script_migrating_results(
            101,
            vec![
                Err(ControlError::Query("timeout".to_string())),
                Err(ControlError::Query("timeout".to_string())),
                Ok(false),
            ],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        assert!(matches!(
            next_terminal(&mut rx).await,
            TrackerEvent::Completed { .. }
        ));
        assert_eq!(control.migrating_calls(101), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_task_blocks_classification() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [false]);
        control.script_task(
            101,
            [
                TaskStatus::running(None),
                TaskStatus::running(None),
                TaskStatus::stopped("OK"),
            ],
        );
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        next_terminal(&mut rx).await;
        assert_eq!(control.migrating_calls(101), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_stopped_task() {
        let (control, tracker) = setup(config());
        control.script_migrating(101, [true]);
        control.script_task(101, [TaskStatus::running(None)]);
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        tracker.cancel(101).await.unwrap();
        assert!(tracker.get(101).await.unwrap().cancel_requested);
        let stops = control.stop_requests();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].0, "node-a");

        // A second cancel is a no-op.
        tracker.cancel(101).await.unwrap();
        assert_eq!(control.stop_requests().len(), 1);

        control.script_migrating(101, [false]);
        control.script_task(101, [TaskStatus::stopped("interrupted by user")]);
        let event = next_terminal(&mut rx).await;
        assert!(matches!(event, TrackerEvent::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_errors() {
        let (control, tracker) = setup(config());
        assert_eq!(
            tracker.cancel(7).await.unwrap_err(),
            TrackerError::NotTracking(7)
        );

        control.script_migrating(101, [true]);
        control.script_task(101, [TaskStatus::running(None)]);
        tracker.submit(&request(101)).await.unwrap();

        control.set_stop_result(Ok(StopOutcome { success: false }));
        assert!(matches!(
            tracker.cancel(101).await,
            Err(TrackerError::Stop(_))
        ));
        control.set_stop_result(Err(ControlError::Stop("node unreachable".to_string())));
        assert!(matches!(
            tracker.cancel(101).await,
            Err(TrackerError::Stop(_))
        ));

        let op = tracker.get(101).await.unwrap();
        assert!(op.state.is_active());
        assert!(!op.cancel_requested);
        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_tracks_nothing() {
        let (control, tracker) = setup(config());
        control.fail_submission(101, "guest locked");

        let err = tracker.submit(&request(101)).await.unwrap_err();
        assert!(matches!(err, TrackerError::Submission(ref m) if m.contains("guest locked")));
        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_reach_control_plane_once() {
        let (control, tracker) = setup(config());
        control.set_submit_delay(Duration::from_millis(50));
        control.script_migrating(101, [true]);
        control.script_task(101, [TaskStatus::running(None)]);
        let req = request(101);

        let (first, second) = tokio::join!(tracker.submit(&req), tracker.submit(&req));

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| r.as_ref().err() == Some(&TrackerError::AlreadyTracking(101)))
        );
        assert_eq!(control.submitted().len(), 1);
        assert_eq!(tracker.snapshot().await.len(), 1);
        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_released_after_failed_submission() {
        let (control, tracker) = setup(config());
        control.set_submit_delay(Duration::from_millis(50));
        control.fail_submission(101, "guest locked");
        let req = request(101);

        let (first, second) = tokio::join!(tracker.submit(&req), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let reserved = tracker.is_tracking(101).await;
            (reserved, tracker.submit(&req).await)
        });
        assert!(matches!(first, Err(TrackerError::Submission(_))));
        let (reserved, second) = second;
        assert!(reserved);
        assert_eq!(second.unwrap_err(), TrackerError::AlreadyTracking(101));

        assert!(!tracker.is_tracking(101).await);
        assert!(matches!(
            tracker.submit(&req).await,
            Err(TrackerError::Submission(_))
        ));
        assert_eq!(control.submitted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_releases_guest() {
        let (control, tracker) = setup(config());
        control.set_submit_delay(Duration::from_secs(60));
        let req = request(101);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), tracker.submit(&req)).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!tracker.is_tracking(101).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_then_history() {
        let mut cfg = config();
        cfg.history_limit = 1;
        let (_control, tracker) = setup(cfg);
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        next_terminal(&mut rx).await;
        assert_eq!(tracker.snapshot().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(tracker.snapshot().await.is_empty());
        assert_eq!(tracker.history().await.len(), 1);

        tracker.submit(&request(102)).await.unwrap();
        next_terminal(&mut rx).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        let history = tracker.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].guest.id, 102);
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_replaces_operation_in_grace_period() {
        let (_control, tracker) = setup(config());
        let mut rx = tracker.subscribe();

        tracker.submit(&request(101)).await.unwrap();
        next_terminal(&mut rx).await;

        let op = tracker.submit(&request(101)).await.unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(tracker.history().await.len(), 1);
        assert_eq!(tracker.snapshot().await.len(), 1);
    }
}
