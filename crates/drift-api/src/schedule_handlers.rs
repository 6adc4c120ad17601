//! REST API handlers for the schedule and automation status.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use drift_core::ScheduleConfig;
use drift_state::StateError;

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response};

/// History entries returned with the automation status.
const AUTOMATION_HISTORY: usize = 20;

/// GET /api/v1/schedule
pub async fn get_schedule(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.read_schedule() {
        Ok(schedule) => ApiResponse::ok(schedule).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /api/v1/schedule
pub async fn put_schedule(
    State(state): State<ApiState>,
    Json(schedule): Json<ScheduleConfig>,
) -> impl IntoResponse {
    match state.store.write_schedule(&schedule) {
        Ok(()) => {
            info!(windows = schedule.windows.len(), "schedule updated");
            ApiResponse::ok(schedule).into_response()
        }
        Err(StateError::Invalid(msg)) => {
            error_response(&msg, StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EvaluateQuery {
    /// RFC 3339 instant; defaults to now.
    pub at: Option<String>,
}

/// GET /api/v1/schedule/evaluate
pub async fn evaluate_schedule(
    State(state): State<ApiState>,
    Query(query): Query<EvaluateQuery>,
) -> impl IntoResponse {
    let at = match query.at.as_deref() {
        None => Utc::now(),
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                return error_response(
                    &format!("invalid 'at' timestamp '{raw}': {e}"),
                    StatusCode::BAD_REQUEST,
                )
                .into_response();
            }
        },
    };

    match state.store.read_schedule() {
        Ok(schedule) => {
            let decision = drift_schedule::evaluate(at, &schedule);
            ApiResponse::ok(json!({ "at": at, "decision": decision })).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/automation
pub async fn automation_status(State(state): State<ApiState>) -> impl IntoResponse {
    let run_state = match state.store.read_automation_state() {
        Ok(s) => s,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    match state.store.recent_history(AUTOMATION_HISTORY) {
        Ok(history) => ApiResponse::ok(json!({
            "config": state.automation,
            "state": run_state,
            "recent_history": history,
        }))
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use drift_core::{DayOfWeek, TimeWindow, WindowMode};

    use crate::handlers::tests::{body_json, test_state};

    fn weekend_only() -> ScheduleConfig {
        ScheduleConfig::new(vec![TimeWindow::new(
            "weekend",
            WindowMode::Allow,
            [DayOfWeek::Saturday, DayOfWeek::Sunday],
            "00:00".parse().unwrap(),
            "23:59".parse().unwrap(),
        )])
    }

    #[tokio::test]
    async fn schedule_defaults_to_empty() {
        let (state, _) = test_state();
        let resp = get_schedule(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["windows"], json!([]));
    }

    #[tokio::test]
    async fn put_then_get_schedule() {
        let (state, _) = test_state();
        let resp = put_schedule(State(state.clone()), Json(weekend_only()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(state.store.read_schedule().unwrap(), weekend_only());
    }

    #[tokio::test]
    async fn put_invalid_schedule_is_bad_request() {
        let (state, _) = test_state();
        let t = "08:00".parse().unwrap();
        let broken = ScheduleConfig::new(vec![TimeWindow::new(
            "",
            WindowMode::Deny,
            [DayOfWeek::Monday],
            t,
            t,
        )]);
        let resp = put_schedule(State(state.clone()), Json(broken))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(!state.store.has_schedule().unwrap());
    }

    #[tokio::test]
    async fn evaluate_at_instant() {
        let (state, _) = test_state();
        state.store.write_schedule(&weekend_only()).unwrap();

        // 2024-01-06 is a Saturday.
        let query = EvaluateQuery {
            at: Some("2024-01-06T10:00:00Z".to_string()),
        };
        let resp = evaluate_schedule(State(state.clone()), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["decision"]["permitted"], true);

        let query = EvaluateQuery {
            at: Some("2024-01-08T10:00:00Z".to_string()),
        };
        let resp = evaluate_schedule(State(state), Query(query))
            .await
            .into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"]["decision"]["permitted"], false);
    }

    #[tokio::test]
    async fn evaluate_rejects_bad_timestamp() {
        let (state, _) = test_state();
        let query = EvaluateQuery {
            at: Some("yesterday".to_string()),
        };
        let resp = evaluate_schedule(State(state), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn automation_status_reports_config() {
        let (state, _) = test_state();
        let resp = automation_status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["config"]["enabled"], false);
        assert_eq!(json["data"]["recent_history"], json!([]));
    }
}
