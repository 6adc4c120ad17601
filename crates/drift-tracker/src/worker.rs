//! Per-operation poll worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use drift_control::ControlPlane;
use drift_core::{GuestId, GuestLocation, GuestRef, NodeName, Progress, TaskHandle};

use crate::classify::{Exit, classify_exit};

/// How a finished operation ended, as decided by its worker.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Succeeded { location: GuestLocation },
    Cancelled { exit_status: String },
    Failed { error: String },
}

/// Message from a worker to the tracker's report loop.
#[derive(Debug)]
pub(crate) struct WorkerReport {
    /// Identifies the operation instance; stale reports are dropped.
    pub id: u64,
    pub guest: GuestId,
    pub kind: ReportKind,
}

#[derive(Debug)]
pub(crate) enum ReportKind {
    /// Non-terminal tick.
    Tick {
        running: bool,
        progress: Option<Progress>,
    },
    Finished(Outcome),
    /// The tracking timeout elapsed without a terminal signal.
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerTiming {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub location_retries: u32,
}

pub(crate) struct PollWorker {
    pub id: u64,
    pub guest: GuestRef,
    pub source_node: NodeName,
    pub task: TaskHandle,
    pub control: Arc<dyn ControlPlane>,
    pub timing: WorkerTiming,
    pub cancel_requested: Arc<AtomicBool>,
    pub reports: mpsc::UnboundedSender<WorkerReport>,
}

impl PollWorker {
    /// Poll until a terminal outcome, the timeout, or shutdown.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        let deadline = tokio::time::sleep_until(start + self.timing.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval_at(
            start + self.timing.poll_interval,
            self.timing.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(guest = self.guest.id, task = %self.task, "poll worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!(guest = self.guest.id, "poll worker shutting down");
                    break;
                }
                _ = &mut deadline => {
                    let _ = self.reports.send(self.report(ReportKind::Expired));
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    let finished = matches!(report.kind, ReportKind::Finished(_));
                    if self.reports.send(report).is_err() || finished {
                        break;
                    }
                }
            }
        }
    }

    /// One poll: both reads, then classification when the guest settled.
    async fn tick(&self) -> WorkerReport {
        let migrating = match self.control.query_migrating_state(self.guest.id).await {
            Ok(flag) => Some(flag),
            Err(e) => {
                warn!(guest = self.guest.id, error = %e, "migrating-state query failed, retrying next tick");
                None
            }
        };
        let status = match self
            .control
            .query_task_status(&self.source_node, &self.task)
            .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(guest = self.guest.id, task = %self.task, error = %e, "task status query failed, retrying next tick");
                None
            }
        };

        let progress = status.as_ref().and_then(|s| s.progress.clone());
        let running = migrating == Some(true) || status.as_ref().is_some_and(|s| s.is_running());

        let (Some(migrating), Some(status)) = (migrating, status) else {
            return self.still_running(running, progress);
        };

        let cancel_requested = self.cancel_requested.load(Ordering::Acquire);
        match classify_exit(migrating, &status, cancel_requested) {
            Exit::StillRunning => self.still_running(running, progress),
            Exit::Cancelled { exit_status } => self.finished(Outcome::Cancelled { exit_status }),
            Exit::NeedsLocation { exit_status } => {
                debug!(guest = self.guest.id, %exit_status, "task finished, confirming location");
                match self.locate().await {
                    Ok(location) => self.finished(Outcome::Succeeded { location }),
                    Err(error) => self.finished(Outcome::Failed { error }),
                }
            }
        }
    }

    async fn locate(&self) -> Result<GuestLocation, String> {
        let mut attempt = 0;
        loop {
            match self.control.query_guest_location(self.guest.id).await {
                Ok(location) => return Ok(location),
                Err(e) if attempt < self.timing.location_retries => {
                    attempt += 1;
                    warn!(guest = self.guest.id, attempt, error = %e, "location lookup failed, retrying");
                }
                Err(e) => return Err(format!("location lookup failed: {e}")),
            }
        }
    }

    fn still_running(&self, running: bool, progress: Option<Progress>) -> WorkerReport {
        self.report(ReportKind::Tick { running, progress })
    }

    fn finished(&self, outcome: Outcome) -> WorkerReport {
        self.report(ReportKind::Finished(outcome))
    }

    fn report(&self, kind: ReportKind) -> WorkerReport {
        WorkerReport {
            id: self.id,
            guest: self.guest.id,
            kind,
        }
    }
}
