//! Process Manager
//!
//! The state-machine driver. One manager per process kind per connector
//! instance runs poll → lease → advance → persist → release. Instances never
//! talk to each other; the store lease is the only coordination.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ProcessError, StoreError};
use super::health::{ManagerHealth, ManagerStatus};
use super::lease::{LeasePolicy, LeaseSession, mutate_with_lease};
use super::state::ProcessState;
use super::store::ProcessStore;
use super::types::{ProcessEntity, ProcessId, ProcessPayload, ProcessRole};
use super::wait::{ExponentialWaitStrategy, WaitStrategy};
use crate::config::ManagerConfig;

/// What a handler decided for the process it was given
#[derive(Debug)]
pub enum StepOutcome<S, P> {
    /// Write this entity and release the lease
    Persist(ProcessEntity<S, P>),
    /// Nothing to write; release the lease if still held
    Skip,
}

/// Per-kind handler table keyed by state
#[async_trait]
pub trait StateHandler<S: ProcessState, P: ProcessPayload>: Send + Sync {
    /// Short name used in logs and health output
    fn kind(&self) -> &'static str;

    /// States the poll loop fetches work for
    fn actionable_states(&self) -> &'static [S];

    /// Advance one leased process by one step
    ///
    /// Must not hold the lease across remote I/O; use
    /// [`LeaseSession::checkpoint`] and [`LeaseSession::reclaim`] around it.
    async fn handle(
        &self,
        process: ProcessEntity<S, P>,
        session: &LeaseSession<S, P>,
    ) -> Result<StepOutcome<S, P>, ProcessError>;
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ProcessManager<S, P> {
    store: Arc<dyn ProcessStore<S, P>>,
    handler: Arc<dyn StateHandler<S, P>>,
    config: ManagerConfig,
    instance_id: String,
    clock: Arc<dyn Clock>,
    health: Arc<ManagerHealth>,
    workers: Arc<Semaphore>,
    running: Mutex<Option<RunningLoop>>,
}

impl<S: ProcessState, P: ProcessPayload> ProcessManager<S, P> {
    pub fn new(
        store: Arc<dyn ProcessStore<S, P>>,
        handler: Arc<dyn StateHandler<S, P>>,
        config: ManagerConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        let health = Arc::new(ManagerHealth::new(handler.kind()));
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            store,
            handler,
            config,
            instance_id: instance_id.into(),
            clock: Arc::new(SystemClock),
            health,
            workers,
            running: Mutex::new(None),
        }
    }

    /// Use `clock` for lease decisions (the store should share it)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ProcessStore<S, P>> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn health(&self) -> Arc<ManagerHealth> {
        self.health.clone()
    }

    fn lease_policy(&self) -> LeasePolicy {
        self.config.lease_policy()
    }

    /// Spawn the poll loop. Calling it on a running manager is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let loop_token = token.clone();
        self.health.set_status(ManagerStatus::Running);
        let handle = tokio::spawn(async move { this.run_loop(loop_token).await });
        *running = Some(RunningLoop { token, handle });
    }

    /// Cancel the loop and wait for it to exit
    ///
    /// A pass still running is dropped along with its handlers; the leases
    /// they held are left to expire.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(running) = running {
            running.token.cancel();
            if let Err(e) = running.handle.await {
                error!(kind = self.handler.kind(), error = %e, "Manager loop panicked");
            }
        }
        if self.health.status() != ManagerStatus::Halted {
            self.health.set_status(ManagerStatus::Stopped);
        }
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let kind = self.handler.kind();
        let mut wait = ExponentialWaitStrategy::from_config(&self.config.wait);
        info!(
            kind,
            instance_id = %self.instance_id,
            batch_size = self.config.batch_size,
            lease_ttl_ms = self.config.lease_ttl_ms,
            "Process manager started"
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            let pass = tokio::select! {
                _ = token.cancelled() => {
                    info!(kind, "Stop requested mid-pass, in-flight leases left to expire");
                    break;
                }
                pass = self.run_pass() => pass,
            };
            let delay = match pass {
                Ok(0) => wait.no_work_found(),
                Ok(_) => wait.success(),
                Err(e) if e.is_infrastructure() => {
                    error!(kind, error = %e, "Store unavailable, halting process manager");
                    self.health.halt(e.to_string());
                    return;
                }
                Err(e) => {
                    warn!(kind, error = %e, "Process manager pass failed");
                    self.health.record_error(e.to_string());
                    wait.error()
                }
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(kind, instance_id = %self.instance_id, "Process manager stopped");
    }

    /// One poll pass over every actionable state
    ///
    /// All batches are fetched before any handler runs, so a process moves at
    /// most one step per pass. Returns the number of processes advanced.
    ///
    /// A state whose batch cannot be read is skipped for this pass; only an
    /// unreachable store fails the pass.
    pub async fn run_pass(self: &Arc<Self>) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut batch = Vec::new();
        for &state in self.handler.actionable_states() {
            match self
                .store
                .next_for_state(state, self.config.batch_size, now)
                .await
            {
                Ok(found) => batch.extend(found),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    error!(
                        kind = self.handler.kind(),
                        state = %state.as_str(),
                        error = %e,
                        "Could not read processes for state, skipping it this pass"
                    );
                    self.health.record_error(e.to_string());
                }
            }
        }

        if batch.is_empty() {
            self.health.record_pass(0, now);
            return Ok(0);
        }
        debug!(kind = self.handler.kind(), count = batch.len(), "Processes to advance");

        let mut tasks = JoinSet::new();
        for process in batch {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                this.process_one(process).await
            });
        }

        let mut advanced = 0;
        let mut halt = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => advanced += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) if e.is_infrastructure() => halt = Some(e),
                Ok(Err(e)) => warn!(kind = self.handler.kind(), error = %e, "Process step failed"),
                Err(e) => error!(kind = self.handler.kind(), error = %e, "Handler task panicked"),
            }
        }

        if let Some(e) = halt {
            return Err(e);
        }
        self.health.record_pass(advanced, self.clock.now());
        Ok(advanced)
    }

    async fn process_one(&self, polled: ProcessEntity<S, P>) -> Result<bool, StoreError> {
        let id = *polled.id();
        let policy = self.lease_policy();

        if !self
            .store
            .acquire_lease(&id, &self.instance_id, policy.ttl)
            .await?
        {
            debug!(process_id = %id, "Lease contention, skipping");
            return Ok(false);
        }
        let session = LeaseSession::acquired(
            self.store.clone(),
            self.clock.clone(),
            self.instance_id.clone(),
            policy,
        );

        // the polled snapshot may predate another holder's write
        let current = match self.store.find(&id).await? {
            Some(p) if p.state() == polled.state() => p,
            _ => {
                debug!(process_id = %id, "Process moved since poll, skipping");
                session.release(&id).await?;
                return Ok(false);
            }
        };

        let from = current.state();
        let outcome = self.run_with_heartbeat(current, &session, policy.ttl).await;

        if session.is_lost() {
            debug!(process_id = %id, state = %from, "Lease lost, discarding handler result");
            return Ok(false);
        }

        match outcome {
            Ok(StepOutcome::Persist(next)) => match session.checkpoint(&next).await {
                Ok(()) => {
                    info!(process_id = %id, from = %from, to = %next.state(), "Process advanced");
                    Ok(true)
                }
                Err(StoreError::LeaseLost(_)) => {
                    debug!(process_id = %id, "Lease lost before persist, result discarded");
                    Ok(false)
                }
                Err(e) => {
                    let _ = session.release(&id).await;
                    Err(e)
                }
            },
            Ok(StepOutcome::Skip) => {
                session.release(&id).await?;
                Ok(false)
            }
            Err(ProcessError::Store(StoreError::LeaseLost(_))) => {
                debug!(process_id = %id, "Lease lost in handler, result discarded");
                Ok(false)
            }
            Err(ProcessError::Store(e)) if e.is_infrastructure() => {
                let _ = session.release(&id).await;
                Err(e)
            }
            Err(e) => {
                error!(process_id = %id, state = %from, error = %e, "State handler failed");
                session.release(&id).await?;
                Ok(false)
            }
        }
    }

    /// Run the handler while a heartbeat renews the lease every `ttl / 3`
    async fn run_with_heartbeat(
        &self,
        process: ProcessEntity<S, P>,
        session: &LeaseSession<S, P>,
        ttl: Duration,
    ) -> Result<StepOutcome<S, P>, ProcessError> {
        let id = *process.id();
        let period = (ttl / 3).max(Duration::from_millis(1));
        let heartbeat = async {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !session.renew(&id).await {
                    break;
                }
            }
            // lost; let the handler finish and have its result discarded
            std::future::pending::<()>().await
        };

        tokio::select! {
            outcome = self.handler.handle(process, session) => outcome,
            _ = heartbeat => Ok(StepOutcome::Skip),
        }
    }

    /// Persist a freshly created process
    pub async fn create(&self, process: &ProcessEntity<S, P>) -> Result<(), ProcessError> {
        self.store.create(process).await?;
        info!(
            kind = self.handler.kind(),
            process_id = %process.id(),
            role = %process.role(),
            state = %process.state(),
            "Process created"
        );
        Ok(())
    }

    pub async fn find(&self, id: &ProcessId) -> Result<Option<ProcessEntity<S, P>>, ProcessError> {
        Ok(self.store.find(id).await?)
    }

    pub async fn find_by_correlation_id(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<Option<ProcessEntity<S, P>>, ProcessError> {
        Ok(self.store.find_by_correlation_id(role, correlation_id).await?)
    }

    /// Change a process outside the poll loop, under its own lease
    pub async fn mutate<F>(&self, id: &ProcessId, mutate: F) -> Result<ProcessEntity<S, P>, ProcessError>
    where
        F: FnOnce(&mut ProcessEntity<S, P>) -> Result<(), ProcessError>,
    {
        // never the loop's holder id, or a re-acquire would succeed mid-handler
        let holder = format!("{}-inbound-{}", self.instance_id, ulid::Ulid::new());
        let from = self.store.find(id).await?.map(|p| p.state());
        let process =
            mutate_with_lease(self.store.as_ref(), &holder, &self.lease_policy(), id, mutate)
                .await?;
        info!(
            kind = self.handler.kind(),
            process_id = %id,
            from = ?from,
            to = %process.state(),
            "Process updated"
        );
        Ok(process)
    }
}
