//! Transfer process handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ProcessView, ok};
use super::parse_process_id;
use crate::transfer::{DataRequest, TransferInitiateResult, TransferProcess};

#[derive(Debug, Serialize)]
pub struct TransferView {
    #[serde(flatten)]
    pub process: ProcessView,
    pub data_request: DataRequest,
    pub provisioned: usize,
    pub deprovisioned: usize,
}

impl From<&TransferProcess> for TransferView {
    fn from(p: &TransferProcess) -> Self {
        Self {
            process: ProcessView::from(p),
            data_request: p.payload().data_request.clone(),
            provisioned: p.payload().provisioned.len(),
            deprovisioned: p.payload().deprovisioned.len(),
        }
    }
}

/// GET /api/v1/transfers/{id}
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TransferView> {
    let id = parse_process_id(&id)?;
    let process = state
        .transfers
        .find(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Transfer not found: {id}")))?;
    ok(TransferView::from(&process))
}

/// POST /api/v1/transfers
///
/// Starts a consumer transfer. `sync: true` runs it inline and returns the
/// peer's data in the result.
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DataRequest>,
) -> ApiResult<TransferInitiateResult> {
    tracing::info!(
        request_id = %request.id,
        asset_id = %request.asset_id,
        sync = request.sync,
        "Transfer requested"
    );
    let result = state.transfers.initiate_consumer_request(request).await?;
    ok(result)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::app;
    use super::*;
    use crate::dispatch::mock::MOCK_PROTOCOL;
    use crate::transfer::{DataAddress, ResponseStatus};
    use axum::http::StatusCode;

    fn request() -> DataRequest {
        DataRequest::new("asset-1", "http://provider", DataAddress::new("sink"))
            .with_protocol(MOCK_PROTOCOL)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let app = app();
        let Json(created) = create_transfer(State(app.state.clone()), Json(request()))
            .await
            .unwrap();
        let result = created.data.unwrap();
        assert_eq!(result.status, ResponseStatus::Ok);

        let id = result.process_id.unwrap().to_string();
        let Json(found) = get_transfer(State(app.state.clone()), Path(id))
            .await
            .unwrap();
        let view = found.data.unwrap();
        assert_eq!(view.process.state, "INITIAL");
        assert_eq!(view.data_request.asset_id, "asset-1");
    }

    #[tokio::test]
    async fn test_sync_create_returns_data() {
        let app = app();
        let Json(created) =
            create_transfer(State(app.state.clone()), Json(request().with_sync(true)))
                .await
                .unwrap();
        let result = created.data.unwrap();
        assert_eq!(result.data.unwrap()["ack"], true);
        assert_eq!(app.dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_get_errors() {
        let app = app();
        let err = get_transfer(State(app.state.clone()), Path("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let missing = crate::process::ProcessId::new().to_string();
        let err = get_transfer(State(app.state.clone()), Path(missing))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_request_id_is_bad_request() {
        let app = app();
        let mut blank = request();
        blank.id = String::new();
        let err = create_transfer(State(app.state.clone()), Json(blank))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
