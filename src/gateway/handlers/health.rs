//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};
use crate::process::{HealthSnapshot, ManagerStatus};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub managers: Vec<HealthSnapshot>,
}

/// Health check endpoint
///
/// GET /api/v1/health
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, managers}}
/// - A manager halted on store failure: 503 + {code: 5001, msg: "unavailable"}
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let managers = vec![state.transfers.health(), state.negotiations.health()];
    let halted: Vec<&'static str> = managers
        .iter()
        .filter(|m| m.status == ManagerStatus::Halted)
        .map(|m| m.kind)
        .collect();

    let data = HealthResponse {
        timestamp_ms: Utc::now().timestamp_millis(),
        managers,
    };

    if halted.is_empty() {
        (StatusCode::OK, Json(ApiResponse::success(data)))
    } else {
        tracing::error!(halted = ?halted, "[HEALTH] Process manager halted");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                data: Some(data),
            }),
        )
    }
}
