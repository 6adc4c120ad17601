//! drift-api — REST API for Drift.
//!
//! Presentation layers read the tracker and topology snapshots here and
//! mutate core state only through submit/cancel and batch requests.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/operations` | Active and recently finished operations |
//! | GET | `/api/v1/operations/history` | Archived terminal operations |
//! | POST | `/api/v1/migrations` | Submit a migration |
//! | POST | `/api/v1/migrations/{guest}/cancel` | Cancel a migration |
//! | GET | `/api/v1/migrations/batch` | Batch status and last report |
//! | POST | `/api/v1/migrations/batch` | Start a sequential batch |
//! | GET | `/api/v1/topology` | Cluster topology snapshot |
//! | GET | `/api/v1/schedule` | Schedule configuration |
//! | PUT | `/api/v1/schedule` | Replace the schedule configuration |
//! | GET | `/api/v1/schedule/evaluate` | Window decision for now or `?at=` |
//! | GET | `/api/v1/automation` | Automation settings, state and history |

pub mod handlers;
pub mod schedule_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::sync::RwLock;

use drift_batch::BatchReport;
use drift_core::config::{AutomationConfig, BatchConfig};
use drift_state::StateStore;
use drift_topology::SharedTopology;
use drift_tracker::OperationTracker;

/// Progress of the batch started through the API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatus {
    pub running: bool,
    pub last_report: Option<BatchReport>,
}

pub type BatchSlot = Arc<RwLock<BatchStatus>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub tracker: OperationTracker,
    pub topology: SharedTopology,
    pub batch: BatchSlot,
    pub batch_config: BatchConfig,
    pub automation: AutomationConfig,
}

impl ApiState {
    pub fn new(
        store: StateStore,
        tracker: OperationTracker,
        topology: SharedTopology,
        batch_config: BatchConfig,
        automation: AutomationConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            topology,
            batch: BatchSlot::default(),
            batch_config,
            automation,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/operations", get(handlers::list_operations))
        .route("/operations/history", get(handlers::operation_history))
        .route("/migrations", post(handlers::submit_migration))
        .route("/migrations/{guest}/cancel", post(handlers::cancel_migration))
        .route(
            "/migrations/batch",
            get(handlers::batch_status).post(handlers::start_batch),
        )
        .route("/topology", get(handlers::get_topology))
        .route(
            "/schedule",
            get(schedule_handlers::get_schedule).put(schedule_handlers::put_schedule),
        )
        .route("/schedule/evaluate", get(schedule_handlers::evaluate_schedule))
        .route("/automation", get(schedule_handlers::automation_status))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
