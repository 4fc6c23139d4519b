//! Synchronous Transfer Delegate
//!
//! Runs a whole exchange inside one request/response. The process is stored
//! as COMPLETED up front, the peer is called inline, and the answer is built
//! from the process as re-read after the call: an inbound rejection that
//! landed meanwhile wins over the optimistic write.
//!
//! While the call is open the payload carries `sync_pending_since`, which
//! keeps the poll loop from unwinding the process underneath the caller.

use std::sync::Arc;

use tracing::{info, warn};

use super::proxy::DataProxyManager;
use super::state::TransferProcessState;
use super::types::{
    DataRequest, ResponseStatus, TransferInitiateResult, TransferPayload, TransferProcess,
};
use crate::dispatch::{DispatcherRegistry, MessageType, Outbound};
use crate::process::lease::{LeasePolicy, mutate_with_lease};
use crate::process::{Clock, ProcessError, ProcessId, ProcessRole, ProcessStore, SystemClock};

pub struct SyncTransferManager {
    store: Arc<dyn ProcessStore<TransferProcessState, TransferPayload>>,
    dispatchers: Arc<DispatcherRegistry>,
    proxies: Arc<DataProxyManager>,
    lease_policy: LeasePolicy,
    instance_id: String,
    clock: Arc<dyn Clock>,
}

impl SyncTransferManager {
    pub fn new(
        store: Arc<dyn ProcessStore<TransferProcessState, TransferPayload>>,
        dispatchers: Arc<DispatcherRegistry>,
        proxies: Arc<DataProxyManager>,
        lease_policy: LeasePolicy,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatchers,
            proxies,
            lease_policy,
            instance_id: instance_id.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn holder(&self) -> String {
        format!("{}-sync-{}", self.instance_id, ulid::Ulid::new())
    }

    /// Answer a repeated request from the process it already created
    async fn existing(
        &self,
        role: ProcessRole,
        request: &DataRequest,
    ) -> Result<Option<TransferInitiateResult>, ProcessError> {
        let Some(existing) = self.store.find_by_correlation_id(role, &request.id).await? else {
            return Ok(None);
        };
        let id = *existing.id();
        info!(
            process_id = %id,
            request_id = %request.id,
            "Synchronous transfer already exists for request (idempotent)"
        );
        if existing.state() == TransferProcessState::Error {
            let detail = existing.error_detail().unwrap_or("transfer failed");
            return Ok(Some(TransferInitiateResult::error(
                Some(id),
                request.id.clone(),
                ResponseStatus::FatalError,
                detail,
            )));
        }
        Ok(Some(TransferInitiateResult::ok(id, request.id.clone())))
    }

    /// Store a COMPLETED process for `request`, walking every step in memory
    async fn create_completed(
        &self,
        role: ProcessRole,
        request: &DataRequest,
    ) -> Result<TransferProcess, ProcessError> {
        let mut payload = TransferPayload::new(request.clone());
        payload.sync_pending_since = Some(self.clock.now());
        let mut process =
            TransferProcess::new(role, payload).with_correlation_id(request.id.clone());
        process.transition_through(TransferProcessState::Completed)?;
        self.store.create(&process).await?;
        Ok(process)
    }

    /// Hand the process back to the poll loop and return it as stored
    async fn finish(&self, id: &ProcessId) -> Result<TransferProcess, ProcessError> {
        let result = mutate_with_lease(
            self.store.as_ref(),
            &self.holder(),
            &self.lease_policy,
            id,
            |process| {
                process.payload_mut().sync_pending_since = None;
                Ok(())
            },
        )
        .await;

        match result {
            Ok(process) => Ok(process),
            // the loop takes over once the marker goes stale
            Err(e) if e.is_retryable() => {
                warn!(process_id = %id, error = %e, "Could not clear synchronous marker");
                self.store
                    .find(id)
                    .await?
                    .ok_or_else(|| ProcessError::NotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Best effort: the process may already have been moved on
    async fn mark_error(&self, id: &ProcessId, detail: &str) {
        let result = mutate_with_lease(
            self.store.as_ref(),
            &self.holder(),
            &self.lease_policy,
            id,
            |process| {
                process.payload_mut().sync_pending_since = None;
                process.transition_error(detail)
            },
        )
        .await;
        if let Err(e) = result {
            warn!(process_id = %id, error = %e, "Could not mark synchronous transfer as failed");
        }
    }

    pub async fn initiate_consumer_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        if request.id.trim().is_empty() {
            return Err(ProcessError::InvalidRequest("request id is empty".into()));
        }
        if let Some(result) = self.existing(ProcessRole::Consumer, &request).await? {
            return Ok(result);
        }
        let process = self.create_completed(ProcessRole::Consumer, &request).await?;
        let id = *process.id();

        let outbound = Outbound {
            protocol: request.protocol.clone(),
            message_type: MessageType::TransferRequest,
            recipient: request.connector_address.clone(),
            payload: serde_json::to_value(&request)
                .map_err(|e| ProcessError::InvalidRequest(e.to_string()))?,
        };
        // the peer reports back against this process, not the request
        let result = self.dispatchers.send(outbound, || id.to_string()).await;

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                self.mark_error(&id, &e.to_string()).await;
                let status = if e.is_retryable() {
                    ResponseStatus::ErrorRetry
                } else {
                    ResponseStatus::FatalError
                };
                return Ok(TransferInitiateResult::error(
                    Some(id),
                    request.id,
                    status,
                    e.to_string(),
                ));
            }
        };

        // reload: an inbound rejection may have landed during the call
        let reloaded = self.finish(&id).await?;

        if reloaded.state() == TransferProcessState::Error {
            let detail = reloaded.error_detail().unwrap_or("transfer failed").to_string();
            info!(process_id = %id, detail = %detail, "Synchronous transfer rejected during dispatch");
            return Ok(TransferInitiateResult::error(
                Some(id),
                request.id,
                ResponseStatus::FatalError,
                detail,
            ));
        }

        Ok(TransferInitiateResult::ok(id, request.id).with_data(data))
    }

    pub async fn initiate_provider_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        if request.id.trim().is_empty() {
            return Err(ProcessError::InvalidRequest("request id is empty".into()));
        }
        if let Some(result) = self.existing(ProcessRole::Provider, &request).await? {
            return Ok(result);
        }
        let process = self.create_completed(ProcessRole::Provider, &request).await?;
        let id = *process.id();

        let Some(proxy) = self.proxies.get_proxy(&request) else {
            let detail = format!(
                "no data proxy for destination type {}",
                request.destination.address_type
            );
            self.mark_error(&id, &detail).await;
            return Ok(TransferInitiateResult::error(
                Some(id),
                request.id,
                ResponseStatus::FatalError,
                detail,
            ));
        };

        match proxy.get_data(&request).await {
            Ok(entry) => {
                self.finish(&id).await?;
                let data = serde_json::to_value(entry)
                    .map_err(|e| ProcessError::InvalidRequest(e.to_string()))?;
                Ok(TransferInitiateResult::ok(id, request.id).with_data(data))
            }
            Err(e) => {
                self.mark_error(&id, &e.to_string()).await;
                Ok(TransferInitiateResult::error(
                    Some(id),
                    request.id,
                    ResponseStatus::FatalError,
                    e.to_string(),
                ))
            }
        }
    }
}
