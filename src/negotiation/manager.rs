//! Contract Negotiation Manager
//!
//! Consumer side: INITIAL → REQUESTING → REQUESTED, then whatever the
//! provider decides arrives inbound. Provider side: a request arrives in
//! REQUESTED, an operator approves or declines, and the loop sends the
//! decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::state::NegotiationState;
use super::types::{
    ClaimToken, ContractAgreement, ContractNegotiation, ContractRequestMessage,
    NegotiationPayload, NegotiationRequest,
};
use crate::config::ManagerConfig;
use crate::dispatch::{DispatcherRegistry, MessageType, Outbound};
use crate::process::{
    Clock, HealthSnapshot, LeaseSession, ProcessError, ProcessId, ProcessManager, ProcessRole,
    ProcessStore, StateHandler, StepOutcome, StoreError, SystemClock,
};

type Outcome = Result<StepOutcome<NegotiationState, NegotiationPayload>, ProcessError>;
type Session = LeaseSession<NegotiationState, NegotiationPayload>;

const ACTIONABLE: &[NegotiationState] = &[
    NegotiationState::Initial,
    NegotiationState::Requesting,
    NegotiationState::Confirming,
    NegotiationState::Declining,
];

fn waited_at_least(now: DateTime<Utc>, since: DateTime<Utc>, timeout: Duration) -> bool {
    (now - since).to_std().map(|w| w >= timeout).unwrap_or(false)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ProcessError> {
    serde_json::to_value(value).map_err(|e| ProcessError::InvalidRequest(e.to_string()))
}

pub struct NegotiationHandler {
    dispatchers: Arc<DispatcherRegistry>,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl NegotiationHandler {
    pub fn new(dispatchers: Arc<DispatcherRegistry>, config: &ManagerConfig) -> Self {
        Self {
            dispatchers,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            request_timeout: config.request_timeout(),
        }
    }

    fn budget_spent(&self, process: &ContractNegotiation) -> bool {
        process.retry_count() >= self.max_retries
    }

    fn fail(&self, mut process: ContractNegotiation, detail: String) -> Outcome {
        error!(process_id = %process.id(), state = %process.state(), detail = %detail, "Negotiation failed");
        process.transition_error(detail)?;
        Ok(StepOutcome::Persist(process))
    }

    /// Consumer: persist REQUESTING, release, send the offer, reclaim
    async fn send_request(&self, mut process: ContractNegotiation, session: &Session) -> Outcome {
        if !process.backoff_elapsed(session.now(), self.retry_delay) {
            return Ok(StepOutcome::Skip);
        }

        let id = *process.id();
        let correlation_id = process.correlation_id().unwrap_or_default().to_string();
        let payload = process.payload();
        let message = ContractRequestMessage {
            correlation_id: correlation_id.clone(),
            offer: payload.offer.clone(),
            callback_address: payload.callback_address.clone(),
            protocol: payload.protocol.clone(),
        };
        let outbound = Outbound {
            protocol: payload.protocol.clone(),
            message_type: MessageType::ContractRequest,
            recipient: payload.counter_party_address.clone(),
            payload: encode(&message)?,
        };

        process.reattempt(NegotiationState::Requesting)?;
        session.checkpoint(&process).await?;

        let result = self.dispatchers.send(outbound, || correlation_id).await;

        let Some(mut current) = session.reclaim(&id).await? else {
            return Ok(StepOutcome::Skip);
        };
        if current.state() != NegotiationState::Requesting {
            // the provider's answer beat our own dispatch result
            info!(process_id = %id, state = %current.state(), "Negotiation moved during dispatch");
            return Ok(StepOutcome::Skip);
        }

        match result {
            Ok(_) => {
                current.transition_to(NegotiationState::Requested)?;
                Ok(StepOutcome::Persist(current))
            }
            Err(e) if e.is_retryable() => {
                if self.budget_spent(&current) {
                    return self.fail(current, format!("retry budget exhausted: {e}"));
                }
                current.roll_back_to(NegotiationState::Initial)?;
                warn!(
                    process_id = %id,
                    retry_count = current.retry_count(),
                    error = %e,
                    "Contract request dispatch failed, rolled back for retry"
                );
                Ok(StepOutcome::Persist(current))
            }
            Err(e) => self.fail(current, e.to_string()),
        }
    }

    /// Consumer: a REQUESTING process nobody came back for
    async fn on_requesting(&self, mut process: ContractNegotiation, session: &Session) -> Outcome {
        if !waited_at_least(session.now(), process.state_timestamp(), self.request_timeout) {
            return Ok(StepOutcome::Skip);
        }
        if self.budget_spent(&process) {
            return self.fail(process, "contract request never answered".to_string());
        }
        warn!(process_id = %process.id(), "Contract request not answered in time, re-sending");
        process.roll_back_to(NegotiationState::Initial)?;
        Ok(StepOutcome::Persist(process))
    }

    /// Provider: send the agreement or the rejection
    ///
    /// `pending_since` marks the dispatch as in flight while the lease is
    /// released, so other instances leave the process alone until the
    /// request timeout.
    async fn send_decision(&self, mut process: ContractNegotiation, session: &Session) -> Outcome {
        let id = *process.id();
        let from = process.state();
        let now = session.now();

        if let Some(since) = process.payload().pending_since {
            if !waited_at_least(now, since, self.request_timeout) {
                return Ok(StepOutcome::Skip);
            }
            if self.budget_spent(&process) {
                return self.fail(process, "decision never delivered".to_string());
            }
            process.record_retry();
        } else if !process.backoff_elapsed(now, self.retry_delay) {
            return Ok(StepOutcome::Skip);
        }

        let correlation_id = process.correlation_id().unwrap_or_default().to_string();
        let payload = process.payload();
        let (message_type, body) = if from == NegotiationState::Confirming {
            let agreement = payload
                .agreement
                .as_ref()
                .ok_or_else(|| ProcessError::InvalidRequest("no agreement to send".into()))?;
            (
                MessageType::ContractAgreement,
                serde_json::json!({ "correlation_id": correlation_id, "agreement": encode(agreement)? }),
            )
        } else {
            (
                MessageType::ContractRejection,
                serde_json::json!({ "correlation_id": correlation_id, "reason": payload.decline_reason }),
            )
        };
        let outbound = Outbound {
            protocol: payload.protocol.clone(),
            message_type,
            recipient: payload.counter_party_address.clone(),
            payload: body,
        };

        process.payload_mut().pending_since = Some(now);
        session.checkpoint(&process).await?;

        let result = self.dispatchers.send(outbound, || correlation_id).await;

        let Some(mut current) = session.reclaim(&id).await? else {
            return Ok(StepOutcome::Skip);
        };
        if current.state() != from {
            return Ok(StepOutcome::Skip);
        }
        current.payload_mut().pending_since = None;

        match result {
            Ok(_) if from == NegotiationState::Confirming => {
                current.transition_to(NegotiationState::Confirmed)?;
                Ok(StepOutcome::Persist(current))
            }
            Ok(_) => {
                let reason = current
                    .payload()
                    .decline_reason
                    .clone()
                    .unwrap_or_else(|| "declined by provider".to_string());
                current.fail_to(NegotiationState::Declined, reason)?;
                Ok(StepOutcome::Persist(current))
            }
            Err(e) if e.is_retryable() => {
                if self.budget_spent(&current) {
                    return self.fail(current, format!("retry budget exhausted: {e}"));
                }
                current.record_retry();
                warn!(
                    process_id = %id,
                    state = %from,
                    retry_count = current.retry_count(),
                    error = %e,
                    "Decision dispatch failed, will retry"
                );
                Ok(StepOutcome::Persist(current))
            }
            Err(e) => self.fail(current, e.to_string()),
        }
    }
}

#[async_trait]
impl StateHandler<NegotiationState, NegotiationPayload> for NegotiationHandler {
    fn kind(&self) -> &'static str {
        "negotiation"
    }

    fn actionable_states(&self) -> &'static [NegotiationState] {
        ACTIONABLE
    }

    async fn handle(&self, process: ContractNegotiation, session: &Session) -> Outcome {
        use NegotiationState::*;
        match (process.state(), process.role()) {
            (Initial, ProcessRole::Consumer) => self.send_request(process, session).await,
            (Requesting, _) => self.on_requesting(process, session).await,
            (Confirming, _) | (Declining, _) => self.send_decision(process, session).await,
            _ => Ok(StepOutcome::Skip),
        }
    }
}

pub struct ContractNegotiationManager {
    manager: Arc<ProcessManager<NegotiationState, NegotiationPayload>>,
}

impl ContractNegotiationManager {
    pub fn new(
        store: Arc<dyn ProcessStore<NegotiationState, NegotiationPayload>>,
        dispatchers: Arc<DispatcherRegistry>,
        config: ManagerConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        Self::with_clock(store, dispatchers, config, instance_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ProcessStore<NegotiationState, NegotiationPayload>>,
        dispatchers: Arc<DispatcherRegistry>,
        config: ManagerConfig,
        instance_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handler = Arc::new(NegotiationHandler::new(dispatchers, &config));
        let manager = ProcessManager::new(store, handler, config, instance_id).with_clock(clock);
        Self {
            manager: Arc::new(manager),
        }
    }

    pub fn start(&self) {
        self.manager.start();
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    pub async fn run_pass(&self) -> Result<usize, StoreError> {
        self.manager.run_pass().await
    }

    pub fn health(&self) -> HealthSnapshot {
        self.manager.health().snapshot()
    }

    pub fn is_healthy(&self) -> bool {
        self.manager.health().is_healthy()
    }

    pub async fn find(&self, id: &ProcessId) -> Result<Option<ContractNegotiation>, ProcessError> {
        self.manager.find(id).await
    }

    pub async fn find_by_correlation_id(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<Option<ContractNegotiation>, ProcessError> {
        self.manager.find_by_correlation_id(role, correlation_id).await
    }

    async fn find_for_role(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<ContractNegotiation, ProcessError> {
        self.manager
            .find_by_correlation_id(role, correlation_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(correlation_id.to_string()))
    }

    /// Consumer: start negotiating for `request.offer`
    pub async fn initiate(
        &self,
        request: NegotiationRequest,
    ) -> Result<ContractNegotiation, ProcessError> {
        if request.connector_address.trim().is_empty() {
            return Err(ProcessError::InvalidRequest(
                "connector address is empty".into(),
            ));
        }
        let process = ContractNegotiation::new(
            ProcessRole::Consumer,
            NegotiationPayload::for_consumer(request),
        )
        .with_correlation_id(ulid::Ulid::new().to_string());
        self.manager.create(&process).await?;
        Ok(process)
    }

    /// Provider: a consumer sent a contract request
    ///
    /// A repeated request with the same correlation id returns the existing
    /// negotiation.
    pub async fn requested(
        &self,
        claim: &ClaimToken,
        message: ContractRequestMessage,
    ) -> Result<ContractNegotiation, ProcessError> {
        if message.correlation_id.trim().is_empty() {
            return Err(ProcessError::InvalidRequest("correlation id is empty".into()));
        }
        if let Some(existing) = self
            .manager
            .find_by_correlation_id(ProcessRole::Provider, &message.correlation_id)
            .await?
        {
            info!(
                process_id = %existing.id(),
                correlation_id = %message.correlation_id,
                "Contract request already known (idempotent)"
            );
            return Ok(existing);
        }

        let correlation_id = message.correlation_id.clone();
        let mut process = ContractNegotiation::new(
            ProcessRole::Provider,
            NegotiationPayload::for_provider(claim, message),
        )
        .with_correlation_id(correlation_id);
        process.transition_through(NegotiationState::Requested)?;
        self.manager.create(&process).await?;
        Ok(process)
    }

    /// Provider: accept the request; the loop sends the agreement
    pub async fn approve(&self, id: &ProcessId) -> Result<ContractNegotiation, ProcessError> {
        let signed_at = self.manager.clock().now();
        self.manager
            .mutate(id, move |process| {
                process.transition_to(NegotiationState::Confirming)?;
                let payload = process.payload_mut();
                let consumer_id = payload.counter_party_id.clone().unwrap_or_default();
                payload.agreement = Some(ContractAgreement::from_offer(
                    &payload.offer,
                    &consumer_id,
                    signed_at,
                ));
                Ok(())
            })
            .await
    }

    /// Provider: refuse the request; the loop sends the rejection
    pub async fn decline(
        &self,
        id: &ProcessId,
        reason: impl Into<String>,
    ) -> Result<ContractNegotiation, ProcessError> {
        let reason = reason.into();
        self.manager
            .mutate(id, move |process| {
                process.transition_to(NegotiationState::Declining)?;
                process.payload_mut().decline_reason = Some(reason);
                Ok(())
            })
            .await
    }

    /// Consumer: the provider sent its agreement
    pub async fn confirmed(
        &self,
        claim: &ClaimToken,
        correlation_id: &str,
        agreement: ContractAgreement,
    ) -> Result<ContractNegotiation, ProcessError> {
        let process = self.find_for_role(ProcessRole::Consumer, correlation_id).await?;
        info!(
            process_id = %process.id(),
            caller = ?claim.subject(),
            agreement_id = %agreement.id,
            "Contract agreement received"
        );
        self.manager
            .mutate(process.id(), move |process| match process.state() {
                // duplicate delivery
                NegotiationState::Confirmed => Ok(()),
                NegotiationState::Requesting | NegotiationState::Requested => {
                    process.transition_through(NegotiationState::Confirmed)?;
                    process.payload_mut().agreement = Some(agreement);
                    Ok(())
                }
                _ => process.transition_to(NegotiationState::Confirmed),
            })
            .await
    }

    /// Consumer: the provider refused
    pub async fn declined(
        &self,
        claim: &ClaimToken,
        correlation_id: &str,
        reason: impl Into<String>,
    ) -> Result<ContractNegotiation, ProcessError> {
        let reason = reason.into();
        let process = self.find_for_role(ProcessRole::Consumer, correlation_id).await?;
        info!(
            process_id = %process.id(),
            caller = ?claim.subject(),
            reason = %reason,
            "Contract rejection received"
        );
        self.manager
            .mutate(process.id(), move |process| match process.state() {
                NegotiationState::Declined => Ok(()),
                NegotiationState::Requesting => {
                    process.transition_to(NegotiationState::Requested)?;
                    process.fail_to(NegotiationState::Declined, reason)
                }
                _ => process.fail_to(NegotiationState::Declined, reason),
            })
            .await
    }
}
