//! Routes initiate calls to the async manager or the synchronous delegate.

use std::sync::Arc;

use super::manager::TransferProcessManager;
use super::sync_manager::SyncTransferManager;
use super::types::{DataRequest, TransferInitiateResult, TransferProcess};
use crate::process::{HealthSnapshot, ProcessError, ProcessId};
use crate::provision::ProvisionedResource;

pub struct DelegatingTransferManager {
    async_manager: Arc<TransferProcessManager>,
    sync_manager: Arc<SyncTransferManager>,
}

impl DelegatingTransferManager {
    pub fn new(
        async_manager: Arc<TransferProcessManager>,
        sync_manager: Arc<SyncTransferManager>,
    ) -> Self {
        Self {
            async_manager,
            sync_manager,
        }
    }

    pub fn async_manager(&self) -> &Arc<TransferProcessManager> {
        &self.async_manager
    }

    pub async fn initiate_consumer_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        if request.sync {
            self.sync_manager.initiate_consumer_request(request).await
        } else {
            self.async_manager.initiate_consumer_request(request).await
        }
    }

    pub async fn initiate_provider_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        if request.sync {
            self.sync_manager.initiate_provider_request(request).await
        } else {
            self.async_manager.initiate_provider_request(request).await
        }
    }

    pub fn start(&self) {
        self.async_manager.start();
    }

    pub async fn stop(&self) {
        self.async_manager.stop().await;
    }

    pub fn health(&self) -> HealthSnapshot {
        self.async_manager.health()
    }

    pub async fn find(&self, id: &ProcessId) -> Result<Option<TransferProcess>, ProcessError> {
        self.async_manager.find(id).await
    }

    pub async fn transition_request_ack(
        &self,
        id: &ProcessId,
    ) -> Result<TransferProcess, ProcessError> {
        self.async_manager.transition_request_ack(id).await
    }

    pub async fn transition_provisioned(
        &self,
        id: &ProcessId,
        resources: Vec<ProvisionedResource>,
    ) -> Result<TransferProcess, ProcessError> {
        self.async_manager.transition_provisioned(id, resources).await
    }

    pub async fn transition_completed(
        &self,
        id: &ProcessId,
    ) -> Result<TransferProcess, ProcessError> {
        self.async_manager.transition_completed(id).await
    }

    pub async fn transition_error(
        &self,
        id: &ProcessId,
        detail: impl Into<String>,
    ) -> Result<TransferProcess, ProcessError> {
        self.async_manager.transition_error(id, detail).await
    }

    pub async fn deprovision(&self, id: &ProcessId) -> Result<TransferProcess, ProcessError> {
        self.async_manager.deprovision(id).await
    }
}
