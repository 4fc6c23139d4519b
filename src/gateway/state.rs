use std::sync::Arc;

use crate::negotiation::ContractNegotiationManager;
use crate::transfer::DelegatingTransferManager;

/// Shared state of the admin API
#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<DelegatingTransferManager>,
    pub negotiations: Arc<ContractNegotiationManager>,
}

impl AppState {
    pub fn new(
        transfers: Arc<DelegatingTransferManager>,
        negotiations: Arc<ContractNegotiationManager>,
    ) -> Self {
        Self {
            transfers,
            negotiations,
        }
    }
}
