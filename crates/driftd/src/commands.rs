//! One-shot commands that run without the daemon.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use drift_automation::history_record;
use drift_batch::BatchCoordinator;
use drift_control::HttpControlPlane;
use drift_core::config::BatchConfig;
use drift_core::{DriftConfig, GuestId, GuestKind, GuestRef, MigrationRequest, ScheduleConfig};
use drift_state::{Initiator, StateStore};
use drift_tracker::OperationTracker;

/// Schedule in effect: the persisted one when a database exists, else
/// the configured seed, else permit-all.
fn effective_schedule(config: &DriftConfig) -> anyhow::Result<ScheduleConfig> {
    let db_path = config.db_path();
    if db_path.exists() {
        let store = StateStore::open(&db_path)?;
        if store.has_schedule()? {
            return Ok(store.read_schedule()?);
        }
    }
    Ok(config.schedule.clone().unwrap_or_default())
}

pub fn check_window(config: &DriftConfig, at: Option<&str>) -> anyhow::Result<()> {
    let at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid --at '{raw}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let schedule = effective_schedule(config)?;
    let decision = drift_schedule::evaluate(at, &schedule);
    info!(permitted = decision.permitted, reason = %decision.reason, "window evaluated");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "at": at, "decision": decision }))?
    );
    Ok(())
}

pub async fn migrate(
    config: &DriftConfig,
    guest: GuestId,
    kind: GuestKind,
    source: &str,
    target: &str,
) -> anyhow::Result<()> {
    anyhow::ensure!(source != target, "source and target node are both '{source}'");

    let gateway = Arc::new(HttpControlPlane::from_config(&config.control));
    let tracker = OperationTracker::new(gateway, config.tracker.clone());
    let coordinator = BatchCoordinator::new(
        tracker.clone(),
        BatchConfig {
            abort_on_failure: true,
            dry_run: config.batch.dry_run,
        },
    );

    let request = MigrationRequest::new(GuestRef { id: guest, kind }, source, target);
    info!(guest, %kind, source, target, "submitting migration");
    let report = coordinator.run(vec![request]).await;
    tracker.shutdown().await;

    std::fs::create_dir_all(&config.data_dir)?;
    match StateStore::open(&config.db_path()) {
        Ok(store) => {
            for entry in &report.entries {
                store.append_history(&history_record(entry, Initiator::Manual, None))?;
            }
        }
        Err(e) => warn!(error = %e, "state store unavailable, migration not recorded"),
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    let settled = report.counts.succeeded + report.counts.dry_run;
    anyhow::ensure!(
        settled == report.entries.len(),
        "migration of guest {guest} did not succeed"
    );
    Ok(())
}
