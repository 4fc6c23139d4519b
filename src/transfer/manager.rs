//! Transfer Process Manager
//!
//! Drives transfer processes through provisioning, the consumer request, the
//! data flow and the unwind. The per-state logic lives in [`TransferHandler`];
//! [`TransferProcessManager`] wraps the generic poll loop and exposes the
//! entry points other components call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::state::TransferProcessState;
use super::types::{DataRequest, TransferInitiateResult, TransferPayload, TransferProcess};
use crate::config::ManagerConfig;
use crate::dispatch::{DispatcherRegistry, MessageType, Outbound};
use crate::process::{
    Clock, HealthSnapshot, LeaseSession, ProcessError, ProcessId, ProcessManager, ProcessRole,
    ProcessStore, StateHandler, StepOutcome, StoreError, SystemClock,
};
use crate::provision::{ProvisionedResource, ProvisionerRegistry};

type Outcome = Result<StepOutcome<TransferProcessState, TransferPayload>, ProcessError>;

const ACTIONABLE: &[TransferProcessState] = &[
    TransferProcessState::Initial,
    TransferProcessState::Provisioning,
    TransferProcessState::Provisioned,
    TransferProcessState::Requested,
    TransferProcessState::RequestedAck,
    TransferProcessState::Completed,
    TransferProcessState::Deprovisioning,
    TransferProcessState::Deprovisioned,
];

/// Release every live resource of `payload`, best effort
///
/// Failures are logged and the resource stays live in the payload.
pub(crate) async fn release_resources(
    provisioners: &ProvisionerRegistry,
    process_id: &ProcessId,
    payload: &mut TransferPayload,
) -> usize {
    let mut failed = 0;
    for resource in payload.live_resources() {
        match provisioners.deprovision(&resource).await {
            Ok(()) => payload.mark_deprovisioned(&resource.id),
            Err(e) => {
                failed += 1;
                warn!(
                    process_id = %process_id,
                    resource_id = %resource.id,
                    error = %e,
                    "Failed to deprovision resource"
                );
            }
        }
    }
    failed
}

fn waited_at_least(now: DateTime<Utc>, since: DateTime<Utc>, wait: Duration) -> bool {
    (now - since).to_std().map(|w| w >= wait).unwrap_or(false)
}

pub struct TransferHandler {
    dispatchers: Arc<DispatcherRegistry>,
    provisioners: Arc<ProvisionerRegistry>,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl TransferHandler {
    pub fn new(
        dispatchers: Arc<DispatcherRegistry>,
        provisioners: Arc<ProvisionerRegistry>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            dispatchers,
            provisioners,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            request_timeout: config.request_timeout(),
        }
    }

    fn budget_spent(&self, process: &TransferProcess) -> bool {
        process.retry_count() >= self.max_retries
    }

    /// Move to ERROR after releasing whatever was provisioned
    async fn fail(&self, mut process: TransferProcess, detail: String) -> Outcome {
        let id = *process.id();
        release_resources(&self.provisioners, &id, process.payload_mut()).await;
        error!(process_id = %id, state = %process.state(), detail = %detail, "Transfer failed");
        process.transition_error(detail)?;
        Ok(StepOutcome::Persist(process))
    }

    /// Stay in the current state for another attempt, or fail once the
    /// budget is spent
    async fn retry_in_place(&self, mut process: TransferProcess, detail: String) -> Outcome {
        if self.budget_spent(&process) {
            let detail = format!("retry budget exhausted: {detail}");
            return self.fail(process, detail).await;
        }
        process.record_retry();
        warn!(
            process_id = %process.id(),
            state = %process.state(),
            retry_count = process.retry_count(),
            detail = %detail,
            "Retryable failure, will retry"
        );
        Ok(StepOutcome::Persist(process))
    }

    async fn on_initial(&self, mut process: TransferProcess) -> Outcome {
        let manifest = process.payload().data_request.resource_manifest();
        let empty = manifest.is_empty();
        process.payload_mut().manifest = manifest;

        if empty {
            // recorded as INITIAL -> PROVISIONING -> PROVISIONED
            process.transition_through(TransferProcessState::Provisioned)?;
        } else {
            process.transition_to(TransferProcessState::Provisioning)?;
        }
        Ok(StepOutcome::Persist(process))
    }

    async fn on_provisioning(
        &self,
        mut process: TransferProcess,
        session: &LeaseSession<TransferProcessState, TransferPayload>,
    ) -> Outcome {
        if !process.backoff_elapsed(session.now(), self.retry_delay) {
            return Ok(StepOutcome::Skip);
        }

        for definition in process.payload().pending_definitions() {
            match self.provisioners.provision(&definition).await {
                Ok(resource) => process.payload_mut().add_provisioned([resource]),
                Err(e) if e.is_retryable() => {
                    return self.retry_in_place(process, e.to_string()).await;
                }
                Err(e) => return self.fail(process, e.to_string()).await,
            }
        }

        process.transition_to(TransferProcessState::Provisioned)?;
        Ok(StepOutcome::Persist(process))
    }

    /// Consumer: persist REQUESTED, release, dispatch, reclaim
    async fn send_request(
        &self,
        mut process: TransferProcess,
        session: &LeaseSession<TransferProcessState, TransferPayload>,
    ) -> Outcome {
        if !process.backoff_elapsed(session.now(), self.retry_delay) {
            return Ok(StepOutcome::Skip);
        }

        let id = *process.id();
        let request = process.payload().data_request.clone();
        process.reattempt(TransferProcessState::Requested)?;
        session.checkpoint(&process).await?;

        let outbound = Outbound {
            protocol: request.protocol.clone(),
            message_type: MessageType::TransferRequest,
            recipient: request.connector_address.clone(),
            payload: serde_json::to_value(&request)
                .map_err(|e| ProcessError::InvalidRequest(e.to_string()))?,
        };
        let result = self.dispatchers.send(outbound, || request.id.clone()).await;

        let Some(mut current) = session.reclaim(&id).await? else {
            return Ok(StepOutcome::Skip);
        };
        if current.state() != TransferProcessState::Requested {
            info!(
                process_id = %id,
                state = %current.state(),
                "Process moved during dispatch, keeping stored state"
            );
            return Ok(StepOutcome::Skip);
        }

        match result {
            Ok(_) => {
                current.transition_to(TransferProcessState::RequestedAck)?;
                Ok(StepOutcome::Persist(current))
            }
            Err(e) if e.is_retryable() => {
                if self.budget_spent(&current) {
                    let detail = format!("retry budget exhausted: {e}");
                    return self.fail(current, detail).await;
                }
                current.roll_back_to(TransferProcessState::Provisioned)?;
                warn!(
                    process_id = %id,
                    retry_count = current.retry_count(),
                    error = %e,
                    "Request dispatch failed, rolled back for retry"
                );
                Ok(StepOutcome::Persist(current))
            }
            Err(e) => self.fail(current, e.to_string()).await,
        }
    }

    /// Consumer: re-send a request nobody acknowledged
    async fn on_requested(
        &self,
        mut process: TransferProcess,
        session: &LeaseSession<TransferProcessState, TransferPayload>,
    ) -> Outcome {
        if !waited_at_least(session.now(), process.state_timestamp(), self.request_timeout) {
            return Ok(StepOutcome::Skip);
        }
        if self.budget_spent(&process) {
            return self
                .fail(process, "request never acknowledged".to_string())
                .await;
        }
        warn!(process_id = %process.id(), "Request not acknowledged in time, re-sending");
        process.roll_back_to(TransferProcessState::Provisioned)?;
        Ok(StepOutcome::Persist(process))
    }

    async fn on_deprovisioning(
        &self,
        mut process: TransferProcess,
        session: &LeaseSession<TransferProcessState, TransferPayload>,
    ) -> Outcome {
        if !process.backoff_elapsed(session.now(), self.retry_delay) {
            return Ok(StepOutcome::Skip);
        }

        let id = *process.id();
        for resource in process.payload().live_resources() {
            match self.provisioners.deprovision(&resource).await {
                Ok(()) => process.payload_mut().mark_deprovisioned(&resource.id),
                Err(e) if e.is_retryable() => {
                    return self.retry_in_place(process, e.to_string()).await;
                }
                Err(e) => {
                    error!(process_id = %id, resource_id = %resource.id, error = %e, "Deprovisioning failed");
                    process.transition_error(e.to_string())?;
                    return Ok(StepOutcome::Persist(process));
                }
            }
        }

        process.transition_to(TransferProcessState::Deprovisioned)?;
        Ok(StepOutcome::Persist(process))
    }
}

#[async_trait]
impl StateHandler<TransferProcessState, TransferPayload> for TransferHandler {
    fn kind(&self) -> &'static str {
        "transfer"
    }

    fn actionable_states(&self) -> &'static [TransferProcessState] {
        ACTIONABLE
    }

    async fn handle(
        &self,
        mut process: TransferProcess,
        session: &LeaseSession<TransferProcessState, TransferPayload>,
    ) -> Outcome {
        use TransferProcessState::*;
        let role = process.role();

        match process.state() {
            Initial => self.on_initial(process).await,
            Provisioning => self.on_provisioning(process, session).await,
            Provisioned if role == ProcessRole::Consumer => {
                self.send_request(process, session).await
            }
            Provisioned => {
                info!(process_id = %process.id(), "Starting data flow");
                process.transition_to(InProgress)?;
                Ok(StepOutcome::Persist(process))
            }
            Requested => self.on_requested(process, session).await,
            RequestedAck => {
                info!(process_id = %process.id(), "Starting data flow");
                process.transition_to(InProgress)?;
                Ok(StepOutcome::Persist(process))
            }
            Completed => {
                if let Some(since) = process.payload().sync_pending_since {
                    if !waited_at_least(session.now(), since, self.request_timeout) {
                        return Ok(StepOutcome::Skip);
                    }
                    warn!(process_id = %process.id(), "Synchronous caller never returned, unwinding");
                    process.payload_mut().sync_pending_since = None;
                }
                process.transition_to(Deprovisioning)?;
                Ok(StepOutcome::Persist(process))
            }
            Deprovisioning => self.on_deprovisioning(process, session).await,
            Deprovisioned => {
                process.transition_to(Ended)?;
                Ok(StepOutcome::Persist(process))
            }
            InProgress | Ended | Error => Ok(StepOutcome::Skip),
        }
    }
}

/// Asynchronous transfer manager
pub struct TransferProcessManager {
    manager: Arc<ProcessManager<TransferProcessState, TransferPayload>>,
    provisioners: Arc<ProvisionerRegistry>,
}

impl TransferProcessManager {
    pub fn new(
        store: Arc<dyn ProcessStore<TransferProcessState, TransferPayload>>,
        dispatchers: Arc<DispatcherRegistry>,
        provisioners: Arc<ProvisionerRegistry>,
        config: ManagerConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        Self::with_clock(
            store,
            dispatchers,
            provisioners,
            config,
            instance_id,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        store: Arc<dyn ProcessStore<TransferProcessState, TransferPayload>>,
        dispatchers: Arc<DispatcherRegistry>,
        provisioners: Arc<ProvisionerRegistry>,
        config: ManagerConfig,
        instance_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handler = Arc::new(TransferHandler::new(
            dispatchers,
            provisioners.clone(),
            &config,
        ));
        let manager = ProcessManager::new(store, handler, config, instance_id).with_clock(clock);
        Self {
            manager: Arc::new(manager),
            provisioners,
        }
    }

    pub fn start(&self) {
        self.manager.start();
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    /// Run one poll pass; returns the number of processes advanced
    pub async fn run_pass(&self) -> Result<usize, StoreError> {
        self.manager.run_pass().await
    }

    pub fn health(&self) -> HealthSnapshot {
        self.manager.health().snapshot()
    }

    pub fn is_healthy(&self) -> bool {
        self.manager.health().is_healthy()
    }

    pub async fn find(&self, id: &ProcessId) -> Result<Option<TransferProcess>, ProcessError> {
        self.manager.find(id).await
    }

    pub async fn find_by_request_id(
        &self,
        role: ProcessRole,
        request_id: &str,
    ) -> Result<Option<TransferProcess>, ProcessError> {
        self.manager.find_by_correlation_id(role, request_id).await
    }

    pub async fn initiate_consumer_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        self.initiate(ProcessRole::Consumer, request).await
    }

    /// Create the provider side of a transfer a consumer asked for
    ///
    /// A repeated request with the same id returns the existing process.
    pub async fn initiate_provider_request(
        &self,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        self.initiate(ProcessRole::Provider, request).await
    }

    async fn initiate(
        &self,
        role: ProcessRole,
        request: DataRequest,
    ) -> Result<TransferInitiateResult, ProcessError> {
        if request.id.trim().is_empty() {
            return Err(ProcessError::InvalidRequest("request id is empty".into()));
        }

        if let Some(existing) = self.manager.find_by_correlation_id(role, &request.id).await? {
            info!(
                process_id = %existing.id(),
                request_id = %request.id,
                "Transfer already exists for request (idempotent)"
            );
            return Ok(TransferInitiateResult::ok(*existing.id(), request.id));
        }

        let request_id = request.id.clone();
        let process = TransferProcess::new(role, TransferPayload::new(request))
            .with_correlation_id(request_id.clone());
        self.manager.create(&process).await?;
        Ok(TransferInitiateResult::ok(*process.id(), request_id))
    }

    /// Peer acknowledged the request out of band
    pub async fn transition_request_ack(&self, id: &ProcessId) -> Result<TransferProcess, ProcessError> {
        self.manager
            .mutate(id, |process| match process.state() {
                TransferProcessState::Requested => {
                    process.transition_to(TransferProcessState::RequestedAck)
                }
                // duplicate acknowledgement
                TransferProcessState::RequestedAck | TransferProcessState::InProgress => Ok(()),
                _ => process.transition_to(TransferProcessState::RequestedAck),
            })
            .await
    }

    /// Resources were provisioned asynchronously
    pub async fn transition_provisioned(
        &self,
        id: &ProcessId,
        resources: Vec<ProvisionedResource>,
    ) -> Result<TransferProcess, ProcessError> {
        self.manager
            .mutate(id, move |process| {
                match process.state() {
                    TransferProcessState::Provisioning => {}
                    // duplicate report
                    TransferProcessState::Provisioned => return Ok(()),
                    _ => return process.transition_to(TransferProcessState::Provisioned),
                }
                process.payload_mut().add_provisioned(resources);
                if process.payload().pending_definitions().is_empty() {
                    process.transition_to(TransferProcessState::Provisioned)?;
                }
                Ok(())
            })
            .await
    }

    /// The data flow reported completion
    pub async fn transition_completed(&self, id: &ProcessId) -> Result<TransferProcess, ProcessError> {
        self.manager
            .mutate(id, |process| match process.state() {
                TransferProcessState::InProgress | TransferProcessState::RequestedAck => {
                    process.transition_through(TransferProcessState::Completed)
                }
                _ => process.transition_to(TransferProcessState::Completed),
            })
            .await
    }

    /// Move to ERROR, then release any live resources
    pub async fn transition_error(
        &self,
        id: &ProcessId,
        detail: impl Into<String>,
    ) -> Result<TransferProcess, ProcessError> {
        let detail = detail.into();
        let failed = self
            .manager
            .mutate(id, |process| process.transition_error(detail))
            .await?;

        if failed.payload().live_resources().is_empty() {
            return Ok(failed);
        }
        // terminal now, so nobody else writes the payload
        let mut payload = failed.payload().clone();
        release_resources(&self.provisioners, id, &mut payload).await;
        self.manager
            .mutate(id, move |process| {
                *process.payload_mut() = payload;
                Ok(())
            })
            .await
    }

    /// Start the unwind of a completed transfer now
    pub async fn deprovision(&self, id: &ProcessId) -> Result<TransferProcess, ProcessError> {
        self.manager
            .mutate(id, |process| {
                if process.payload().sync_pending_since.is_some() {
                    return Err(ProcessError::InvalidRequest(
                        "synchronous call still in flight".into(),
                    ));
                }
                process.transition_to(TransferProcessState::Deprovisioning)
            })
            .await
    }
}
