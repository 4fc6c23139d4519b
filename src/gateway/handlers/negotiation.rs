//! Contract negotiation handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ProcessView, ok};
use super::parse_process_id;
use crate::negotiation::{ContractAgreement, ContractNegotiation, ContractOffer};

#[derive(Debug, Serialize)]
pub struct NegotiationView {
    #[serde(flatten)]
    pub process: ProcessView,
    pub offer: ContractOffer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement: Option<ContractAgreement>,
}

impl From<&ContractNegotiation> for NegotiationView {
    fn from(p: &ContractNegotiation) -> Self {
        Self {
            process: ProcessView::from(p),
            offer: p.payload().offer.clone(),
            agreement: p.payload().agreement.clone(),
        }
    }
}

/// GET /api/v1/negotiations/{id}
pub async fn get_negotiation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<NegotiationView> {
    let id = parse_process_id(&id)?;
    let process = state
        .negotiations
        .find(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Negotiation not found: {id}")))?;
    ok(NegotiationView::from(&process))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::app;
    use super::*;
    use crate::negotiation::NegotiationRequest;
    use axum::Json;

    #[tokio::test]
    async fn test_get_negotiation() {
        let app = app();
        let created = app
            .state
            .negotiations
            .initiate(NegotiationRequest::new(
                ContractOffer::new("asset-1", "provider-1"),
                "http://provider",
            ))
            .await
            .unwrap();

        let Json(body) = get_negotiation(State(app.state.clone()), Path(created.id().to_string()))
            .await
            .unwrap();
        let view = body.data.unwrap();
        assert_eq!(view.process.state, "INITIAL");
        assert_eq!(view.process.state_code, 50);
        assert_eq!(view.offer.asset_id, "asset-1");
        assert!(view.agreement.is_none());
    }
}
