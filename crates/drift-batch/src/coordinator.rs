//! BatchCoordinator — feeds requests through the tracker one at a time.

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use drift_core::config::BatchConfig;
use drift_core::{GuestId, MigrationRequest, TaskHandle, epoch_secs};
use drift_tracker::{MigrationOperation, OperationTracker, TrackerError, TrackerEvent};

use crate::report::{ABORTED_REASON, BatchEntry, BatchOutcome, BatchReport};

#[derive(Clone)]
pub struct BatchCoordinator {
    tracker: OperationTracker,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(tracker: OperationTracker, config: BatchConfig) -> Self {
        Self { tracker, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `requests` in order. Each is submitted only after the previous
    /// one reached a terminal state.
    pub async fn run(&self, requests: Vec<MigrationRequest>) -> BatchReport {
        let started_at = epoch_secs();
        let total = requests.len();
        let mut entries = Vec::with_capacity(total);
        let mut aborted = false;

        info!(total, dry_run = self.config.dry_run, "batch started");

        for (index, request) in requests.into_iter().enumerate() {
            if aborted {
                entries.push(BatchEntry {
                    request,
                    outcome: BatchOutcome::Skipped {
                        reason: ABORTED_REASON.to_string(),
                    },
                    operation: None,
                });
                continue;
            }

            if self.config.dry_run {
                info!(guest = request.guest.id, source = %request.source_node, target = %request.target_node, "dry run, not submitting");
                entries.push(BatchEntry {
                    request,
                    outcome: BatchOutcome::DryRun,
                    operation: None,
                });
                continue;
            }

            let (outcome, operation) = self.execute(&request).await;
            info!(
                guest = request.guest.id,
                position = index + 1,
                total,
                outcome = ?outcome,
                "batch entry finished"
            );

            if outcome.is_failure() && self.config.abort_on_failure {
                error!(guest = request.guest.id, "migration failed, aborting remaining batch");
                aborted = true;
            }
            entries.push(BatchEntry {
                request,
                outcome,
                operation,
            });
        }

        let report = BatchReport::finish(entries, aborted, started_at);
        info!(
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            skipped = report.counts.skipped,
            aborted,
            "batch finished"
        );
        report
    }

    async fn execute(
        &self,
        request: &MigrationRequest,
    ) -> (BatchOutcome, Option<MigrationOperation>) {
        // Subscribe before submitting so the terminal event cannot be missed.
        let mut events = self.tracker.subscribe();

        let operation = match self.tracker.submit(request).await {
            Ok(op) => op,
            Err(TrackerError::AlreadyTracking(_)) => {
                return (
                    BatchOutcome::Skipped {
                        reason: "migration already in progress".to_string(),
                    },
                    None,
                );
            }
            Err(e) => {
                return (
                    BatchOutcome::SubmissionFailed {
                        error: e.to_string(),
                    },
                    None,
                );
            }
        };

        match self
            .wait_terminal(&mut events, operation.guest.id, &operation.task)
            .await
        {
            Some(done) => (BatchOutcome::from_operation(&done), Some(done)),
            None => (BatchOutcome::TimedOut, Some(operation)),
        }
    }

    async fn wait_terminal(
        &self,
        events: &mut broadcast::Receiver<TrackerEvent>,
        guest: GuestId,
        task: &TaskHandle,
    ) -> Option<MigrationOperation> {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let op = event.operation();
                    if event.is_terminal() && op.guest.id == guest && op.task == *task {
                        return Some(op.clone());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, guest, "batch lagged behind tracker events");
                    if let Some(op) = self.settled(guest, task).await {
                        return Some(op);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Terminal operation for `task`, whether it is still in the table or
    /// was already archived. The table entry may belong to a newer task.
    async fn settled(&self, guest: GuestId, task: &TaskHandle) -> Option<MigrationOperation> {
        if let Some(op) = self.tracker.get(guest).await {
            if op.task == *task {
                return op.state.is_terminal().then_some(op);
            }
        }
        self.tracker
            .history()
            .await
            .into_iter()
            .rev()
            .find(|op| op.guest.id == guest && op.task == *task)
    }
}
