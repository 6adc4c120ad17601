//! REST API handlers for operations, migrations and topology.
//!
//! Each handler goes through the tracker or the store and returns JSON
//! inside the `{success, data?, error?}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use drift_automation::history_record;
use drift_batch::{BatchCoordinator, BatchReport};
use drift_core::config::BatchConfig;
use drift_core::{GuestId, GuestKind, GuestRef, MigrationRequest, NodeName};
use drift_state::Initiator;
use drift_tracker::TrackerError;

use crate::{ApiState, BatchSlot};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse + use<> {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn tracker_error(e: &TrackerError) -> impl IntoResponse {
    let status = match e {
        TrackerError::AlreadyTracking(_) => StatusCode::CONFLICT,
        TrackerError::NotTracking(_) => StatusCode::NOT_FOUND,
        TrackerError::Submission(_) | TrackerError::Stop(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(&e.to_string(), status)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(json!({ "status": "ok" }))
}

// ── Operations ─────────────────────────────────────────────────

/// GET /api/v1/operations
pub async fn list_operations(State(state): State<ApiState>) -> impl IntoResponse {
    let operations: Vec<_> = state.tracker.snapshot().await.into_values().collect();
    ApiResponse::ok(operations)
}

/// GET /api/v1/operations/history
pub async fn operation_history(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.tracker.history().await)
}

// ── Migrations ─────────────────────────────────────────────────

fn default_kind() -> GuestKind {
    GuestKind::Vm
}

/// One requested migration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationBody {
    pub guest: GuestId,
    #[serde(default = "default_kind")]
    pub kind: GuestKind,
    pub source_node: NodeName,
    pub target_node: NodeName,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl MigrationBody {
    fn validate(&self) -> Result<(), String> {
        if self.source_node.trim().is_empty() || self.target_node.trim().is_empty() {
            return Err(format!("guest {}: source and target node are required", self.guest));
        }
        if self.source_node == self.target_node {
            return Err(format!(
                "guest {}: source and target node are both '{}'",
                self.guest, self.source_node
            ));
        }
        Ok(())
    }

    fn to_request(&self) -> MigrationRequest {
        let guest = GuestRef {
            id: self.guest,
            kind: self.kind,
        };
        let mut request = MigrationRequest::new(guest, &self.source_node, &self.target_node);
        request.name = self.name.clone();
        request.reason = self.reason.clone();
        request
    }
}

/// POST /api/v1/migrations
pub async fn submit_migration(
    State(state): State<ApiState>,
    Json(body): Json<MigrationBody>,
) -> impl IntoResponse {
    if let Err(msg) = body.validate() {
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }
    match state.tracker.submit(&body.to_request()).await {
        Ok(operation) => (StatusCode::ACCEPTED, ApiResponse::ok(operation)).into_response(),
        Err(e) => tracker_error(&e).into_response(),
    }
}

/// POST /api/v1/migrations/:guest/cancel
pub async fn cancel_migration(
    State(state): State<ApiState>,
    Path(guest): Path<GuestId>,
) -> impl IntoResponse {
    match state.tracker.cancel(guest).await {
        Ok(()) => ApiResponse::ok(json!({ "guest": guest, "status": "cancel_requested" }))
            .into_response(),
        Err(e) => tracker_error(&e).into_response(),
    }
}

// ── Batch ──────────────────────────────────────────────────────

/// Batch request body. Unset flags fall back to the daemon's batch config.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchBody {
    pub requests: Vec<MigrationBody>,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub abort_on_failure: Option<bool>,
}

/// POST /api/v1/migrations/batch
pub async fn start_batch(
    State(state): State<ApiState>,
    Json(body): Json<BatchBody>,
) -> impl IntoResponse {
    if body.requests.is_empty() {
        return error_response("batch has no requests", StatusCode::BAD_REQUEST).into_response();
    }
    if let Some(msg) = body.requests.iter().find_map(|r| r.validate().err()) {
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }

    let config = BatchConfig {
        abort_on_failure: body
            .abort_on_failure
            .unwrap_or(state.batch_config.abort_on_failure),
        dry_run: body.dry_run.unwrap_or(state.batch_config.dry_run),
    };
    let requests: Vec<MigrationRequest> = body.requests.iter().map(|r| r.to_request()).collect();
    let total = requests.len();

    {
        let mut status = state.batch.write().await;
        if status.running {
            return error_response("a batch is already running", StatusCode::CONFLICT)
                .into_response();
        }
        status.running = true;
    }

    info!(total, dry_run = config.dry_run, "batch accepted");
    let coordinator = BatchCoordinator::new(state.tracker.clone(), config.clone());
    let slot = state.batch.clone();
    let store = state.store.clone();
    spawn_batch(slot, async move {
        let report = coordinator.run(requests).await;
        for entry in &report.entries {
            let record = history_record(entry, Initiator::Manual, None);
            if let Err(e) = store.append_history(&record) {
                warn!(guest = entry.request.guest.id, error = %e, "failed to record migration");
            }
        }
        report
    });

    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(json!({
            "accepted": total,
            "dry_run": config.dry_run,
            "abort_on_failure": config.abort_on_failure,
        })),
    )
        .into_response()
}

/// Run `work` in the background and clear the running flag when it ends,
/// including when it panics.
fn spawn_batch<F>(slot: BatchSlot, work: F)
where
    F: Future<Output = BatchReport> + Send + 'static,
{
    let handle = tokio::spawn(work);
    tokio::spawn(async move {
        let result = handle.await;
        let mut status = slot.write().await;
        status.running = false;
        match result {
            Ok(report) => status.last_report = Some(report),
            Err(e) => error!(error = %e, "batch task aborted"),
        }
    });
}

/// GET /api/v1/migrations/batch
pub async fn batch_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.batch.read().await.clone();
    ApiResponse::ok(status)
}

// ── Topology ───────────────────────────────────────────────────

/// GET /api/v1/topology
pub async fn get_topology(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.topology.snapshot().await)
}
