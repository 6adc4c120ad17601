//! Serve mode — wires every subsystem into one process.
//!
//! In this mode, the daemon:
//! 1. Opens the state store and seeds the schedule on first start
//! 2. Connects the gateway client and builds the operation tracker
//! 3. Loads the cluster topology and follows tracker events
//! 4. Runs the automation loop
//! 5. Serves the REST API until Ctrl-C

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use drift_api::{ApiState, build_router};
use drift_automation::AutomationRunner;
use drift_control::HttpControlPlane;
use drift_core::DriftConfig;
use drift_state::StateStore;
use drift_topology::{SharedTopology, TopologyReconciler};
use drift_tracker::OperationTracker;

/// Write the configured schedule unless one is already persisted.
pub fn seed_schedule(store: &StateStore, config: &DriftConfig) -> anyhow::Result<bool> {
    let Some(schedule) = &config.schedule else {
        return Ok(false);
    };
    if store.has_schedule()? {
        return Ok(false);
    }
    store.write_schedule(schedule)?;
    info!(windows = schedule.windows.len(), "schedule seeded from configuration");
    Ok(true)
}

pub async fn run(config: DriftConfig) -> anyhow::Result<()> {
    info!("Drift daemon starting");

    // ── State store ────────────────────────────────────────────
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    seed_schedule(&store, &config)?;

    // ── Gateway + tracker ──────────────────────────────────────
    let gateway = Arc::new(HttpControlPlane::from_config(&config.control));
    info!(endpoint = %gateway.endpoint(), "cluster gateway configured");
    let tracker = OperationTracker::new(gateway.clone(), config.tracker.clone());

    // ── Topology ───────────────────────────────────────────────
    let topology = SharedTopology::default();
    let reconciler = TopologyReconciler::new(topology.clone(), gateway.clone());
    if let Err(e) = reconciler.resync().await {
        warn!(error = %e, "initial topology load failed, starting empty");
    }

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────
    let reconciler_handle = tokio::spawn(reconciler.run(tracker.subscribe(), shutdown_rx.clone()));

    let runner = AutomationRunner::new(
        store.clone(),
        tracker.clone(),
        gateway,
        config.automation.clone(),
        config.batch.clone(),
    );
    let automation_handle = tokio::spawn(runner.run(shutdown_rx));

    // ── API server ─────────────────────────────────────────────
    let api_state = ApiState::new(
        store,
        tracker.clone(),
        topology,
        config.batch.clone(),
        config.automation.clone(),
    );
    let router = build_router(api_state);
    let listener = tokio::net::TcpListener::bind(config.api.listen.as_str()).await?;
    info!(addr = %config.api.listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Local tracking only; in-flight gateway tasks keep running.
    tracker.shutdown().await;
    let _ = reconciler_handle.await;
    let _ = automation_handle.await;

    info!("Drift daemon stopped");
    Ok(())
}
