//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: error half of every handler result
//! - `ProcessView`: read model of any process kind

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::process::{ProcessEntity, ProcessError, ProcessId, ProcessRole, ProcessState};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_codes::PROCESS_NOT_FOUND, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match status {
            StatusCode::BAD_REQUEST => error_codes::INVALID_PARAMETER,
            StatusCode::NOT_FOUND => error_codes::PROCESS_NOT_FOUND,
            StatusCode::CONFLICT => error_codes::CONFLICT,
            StatusCode::SERVICE_UNAVAILABLE => error_codes::SERVICE_UNAVAILABLE,
            _ => error_codes::INTERNAL_ERROR,
        };
        Self::new(status, code, format!("{}: {}", e.code(), e))
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Read model shared by transfers and negotiations
#[derive(Debug, Serialize)]
pub struct ProcessView {
    pub id: ProcessId,
    pub role: ProcessRole,
    pub state: &'static str,
    pub state_code: i32,
    pub state_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: ProcessState, P> From<&ProcessEntity<S, P>> for ProcessView {
    fn from(p: &ProcessEntity<S, P>) -> Self {
        Self {
            id: *p.id(),
            role: p.role(),
            state: p.state().as_str(),
            state_code: p.state().code(),
            state_count: p.state_count(),
            correlation_id: p.correlation_id().map(str::to_string),
            error_detail: p.error_detail().map(str::to_string),
            retry_count: p.retry_count(),
            created_at: p.created_at(),
            updated_at: p.updated_at(),
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Resource errors (4xxx)
    pub const PROCESS_NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StoreError;

    #[test]
    fn test_process_error_mapping() {
        let e: ApiError = ProcessError::NotFound("x".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, error_codes::PROCESS_NOT_FOUND);

        let e: ApiError = ProcessError::LeaseContention(ProcessId::new()).into();
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert!(e.msg.starts_with("LEASE_CONTENTION"));

        let e: ApiError = ProcessError::Store(StoreError::Unavailable("down".into())).into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.code, error_codes::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_body_has_no_data() {
        let body = serde_json::to_value(ApiResponse::<()>::error(4001, "missing")).unwrap();
        assert_eq!(body["code"], 4001);
        assert!(body.get("data").is_none());
    }
}
