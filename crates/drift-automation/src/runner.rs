//! AutomationRunner — one gated, filtered, sequential relocation run.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use drift_batch::{BatchCoordinator, BatchEntry, BatchOutcome, BatchReport};
use drift_core::config::{AutomationConfig, BatchConfig};
use drift_schedule::DecisionReason;
use drift_state::{
    ActivityEntry, AutomationState, Initiator, MigrationRecord, RecordStatus, StateStore,
};
use drift_tracker::OperationTracker;

use crate::notify::{Notifier, NotifyEvent};
use crate::recommendation::{Recommendation, RecommendationSource};
use crate::rules::{self, GroupPlacement, Verdict};

/// What a run ended up doing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Disabled,
    OutsideWindow { reason: String },
    /// Every concurrent-migration slot is taken.
    AtCapacity { active: usize },
    NoCandidates,
    Executed { report: BatchReport },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Disabled => "disabled",
            RunOutcome::OutsideWindow { .. } => "outside_window",
            RunOutcome::AtCapacity { .. } => "at_capacity",
            RunOutcome::NoCandidates => "no_candidates",
            RunOutcome::Executed { .. } => "executed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub recommended: usize,
    pub eligible: usize,
    pub skipped: usize,
}

pub struct AutomationRunner {
    store: StateStore,
    tracker: OperationTracker,
    source: Arc<dyn RecommendationSource>,
    config: AutomationConfig,
    batch: BatchConfig,
    notifier: Notifier,
}

impl AutomationRunner {
    pub fn new(
        store: StateStore,
        tracker: OperationTracker,
        source: Arc<dyn RecommendationSource>,
        config: AutomationConfig,
        batch: BatchConfig,
    ) -> Self {
        let notifier = Notifier::new(&config.notifications);
        Self {
            store,
            tracker,
            source,
            config,
            batch,
            notifier,
        }
    }

    /// Perform one run as of `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<RunSummary> {
        let mut state = self.store.read_automation_state()?;
        state.last_run = Some(epoch(now));

        if !self.config.enabled {
            info!("automated migrations disabled");
            return self.finish(state, now, RunOutcome::Disabled, 0, 0, 0);
        }

        let schedule = self.store.read_schedule()?;
        let decision = drift_schedule::evaluate(now, &schedule);
        if !decision.permitted {
            info!(reason = %decision.reason, "outside migration window");
            state.current_window = None;
            let outcome = RunOutcome::OutsideWindow {
                reason: decision.reason.to_string(),
            };
            return self.finish(state, now, outcome, 0, 0, 0);
        }
        let window = match &decision.reason {
            DecisionReason::InWindow { window } => Some(window.clone()),
            _ => None,
        };
        state.current_window = window.clone();

        let max_concurrent = self.config.rules.max_concurrent_migrations;
        let active = self.tracker.active_count().await;
        let slots = max_concurrent.saturating_sub(active);
        if slots == 0 {
            info!(active, max_concurrent, "maximum concurrent migrations already running");
            return self.finish(state, now, RunOutcome::AtCapacity { active }, 0, 0, 0);
        }
        let limit = self.config.rules.max_migrations_per_run.min(slots);

        let recommendations = match self
            .source
            .recommendations(&self.config.maintenance_nodes)
            .await
        {
            Ok(recs) => recs,
            Err(e) => {
                self.notifier
                    .send(NotifyEvent::Failure, json!({ "reason": e.to_string() }))
                    .await;
                return Err(e).context("failed to fetch recommendations");
            }
        };
        let recommended = recommendations.len();
        info!(recommended, "recommendations received");

        let mut placement: Option<Result<GroupPlacement, String>> = None;
        let mut candidates = Vec::new();
        let mut skipped = 0;
        for rec in recommendations {
            let mut verdict = if self.tracker.is_tracking(rec.vmid).await {
                Verdict::Skip("Migration already in progress".to_string())
            } else {
                let last = self
                    .store
                    .last_migration_for(rec.vmid)?
                    .map(|r| r.timestamp);
                rules::evaluate(
                    &rec,
                    &self.config.rules,
                    &self.config.maintenance_nodes,
                    last,
                    epoch(now),
                )
            };
            let grouped = rec.tags.exclude_groups().next().is_some();
            if matches!(verdict, Verdict::Eligible { maintenance: false })
                && grouped
                && self.config.rules.respect_exclude_affinity
            {
                if placement.is_none() {
                    placement = Some(self.load_placement().await);
                }
                let check = match &placement {
                    Some(Ok(groups)) => rules::check_exclude_affinity(&rec, groups),
                    Some(Err(e)) => Err(format!("Could not verify exclude group placement: {e}")),
                    None => Ok(()),
                };
                if let Err(reason) = check {
                    verdict = Verdict::Skip(reason);
                }
            }
            match verdict {
                Verdict::Eligible { maintenance } => {
                    if maintenance {
                        info!(guest = rec.vmid, source = %rec.source_node, "maintenance evacuation, bypassing tag rules");
                    }
                    if candidates.len() < limit {
                        if let Some(Ok(groups)) = &mut placement {
                            groups.record_move(&rec);
                        }
                    }
                    candidates.push(rec);
                }
                Verdict::Skip(reason) => {
                    info!(guest = rec.vmid, %reason, "recommendation skipped");
                    skipped += 1;
                    state.push_activity(ActivityEntry::new(
                        Some(rec.vmid),
                        rec.name.clone(),
                        "skipped",
                        &reason,
                    ));
                }
            }
        }

        let eligible = candidates.len();
        if candidates.is_empty() {
            info!("no eligible migrations after filtering");
            return self.finish(state, now, RunOutcome::NoCandidates, recommended, 0, skipped);
        }

        candidates.truncate(limit);
        info!(planned = candidates.len(), dry_run = self.config.dry_run, max_concurrent, slots, "planning migrations");
        self.notifier
            .send(
                NotifyEvent::Start,
                json!({
                    "migration_count": candidates.len(),
                    "dry_run": self.config.dry_run,
                    "window": window,
                }),
            )
            .await;
        let requests = candidates.iter().map(Recommendation::to_request).collect();
        let coordinator = BatchCoordinator::new(
            self.tracker.clone(),
            BatchConfig {
                abort_on_failure: self.batch.abort_on_failure,
                dry_run: self.config.dry_run,
            },
        );
        let report = coordinator.run(requests).await;

        for entry in &report.entries {
            let record = history_record(entry, Initiator::Automated, window.clone());
            self.store.append_history(&record)?;
            state.push_activity(ActivityEntry::new(
                Some(entry.request.guest.id),
                entry.request.name.clone(),
                activity_action(&entry.outcome),
                &activity_reason(entry),
            ));
        }

        info!(
            executed = report.entries.len(),
            succeeded = report.counts.succeeded,
            dry_run = self.config.dry_run,
            "automated run finished"
        );
        let settled = report.counts.succeeded + report.counts.dry_run;
        self.notifier
            .send(
                NotifyEvent::Complete,
                json!({
                    "total": report.entries.len(),
                    "successful": settled,
                    "failed": report.entries.len() - settled,
                    "dry_run": self.config.dry_run,
                }),
            )
            .await;
        self.finish(
            state,
            now,
            RunOutcome::Executed { report },
            recommended,
            eligible,
            skipped,
        )
    }

    /// Exclude-group membership per node, from the bulk location query.
    async fn load_placement(&self) -> Result<GroupPlacement, String> {
        match self.tracker.control().query_all_guest_locations().await {
            Ok(locations) => Ok(GroupPlacement::from_locations(&locations)),
            Err(e) => {
                warn!(error = %e, "cluster placement unavailable for affinity checks");
                Err(e.to_string())
            }
        }
    }

    /// Run on the configured interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.config.interval, enabled = self.config.enabled, "automation runner started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(summary) => info!(outcome = summary.outcome.as_str(), "automation run complete"),
                        Err(e) => error!(error = %e, "automation run failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("automation runner stopped");
    }

    fn finish(
        &self,
        mut state: AutomationState,
        now: DateTime<Utc>,
        outcome: RunOutcome,
        recommended: usize,
        eligible: usize,
        skipped: usize,
    ) -> anyhow::Result<RunSummary> {
        state.last_outcome = Some(outcome.as_str().to_string());
        self.store.write_automation_state(&state)?;
        Ok(RunSummary {
            at: now,
            outcome,
            recommended,
            eligible,
            skipped,
        })
    }
}

/// History record for one executed batch entry.
pub fn history_record(
    entry: &BatchEntry,
    initiator: Initiator,
    window: Option<String>,
) -> MigrationRecord {
    let mut record = MigrationRecord::new(&entry.request, record_status(&entry.outcome), initiator);
    record.window = window;
    if let Some(op) = &entry.operation {
        record.task = Some(op.task.clone());
        record.duration_secs = Some(op.duration_secs());
    }
    record.error = match &entry.outcome {
        BatchOutcome::Failed { error } | BatchOutcome::SubmissionFailed { error } => {
            Some(error.clone())
        }
        _ => None,
    };
    record
}

fn epoch(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or_default()
}

fn record_status(outcome: &BatchOutcome) -> RecordStatus {
    match outcome {
        BatchOutcome::Succeeded => RecordStatus::Completed,
        BatchOutcome::Cancelled => RecordStatus::Cancelled,
        BatchOutcome::Failed { .. } | BatchOutcome::SubmissionFailed { .. } => {
            RecordStatus::Failed
        }
        BatchOutcome::TimedOut => RecordStatus::Timeout,
        BatchOutcome::Skipped { .. } => RecordStatus::Skipped,
        BatchOutcome::DryRun => RecordStatus::DryRun,
    }
}

fn activity_action(outcome: &BatchOutcome) -> &'static str {
    match outcome {
        BatchOutcome::Succeeded => "migrated",
        BatchOutcome::Cancelled => "cancelled",
        BatchOutcome::Failed { .. } | BatchOutcome::SubmissionFailed { .. } => "failed",
        BatchOutcome::TimedOut => "timeout",
        BatchOutcome::Skipped { .. } => "skipped",
        BatchOutcome::DryRun => "dry_run",
    }
}

fn activity_reason(entry: &BatchEntry) -> String {
    match &entry.outcome {
        BatchOutcome::Failed { error } | BatchOutcome::SubmissionFailed { error } => error.clone(),
        BatchOutcome::Skipped { reason } => reason.clone(),
        _ => entry.request.reason.clone().unwrap_or_default(),
    }
}
