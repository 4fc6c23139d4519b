//! Lease session
//!
//! Wraps the lease a manager holds on one process while its handler runs.
//! Handlers that must call out to a peer use [`LeaseSession::checkpoint`] to
//! persist and release before the call, then [`LeaseSession::reclaim`] to take
//! the process back afterwards, so no lease is held across remote I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::clock::Clock;
use super::error::{ProcessError, StoreError};
use super::state::ProcessState;
use super::store::ProcessStore;
use super::types::{ProcessEntity, ProcessId, ProcessPayload};

/// Lease parameters shared by the poll loop and inbound mutations
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub ttl: Duration,
    /// Acquire attempts before giving up on a contended process
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Default)]
struct LeaseFlags {
    held: bool,
    lost: bool,
}

pub struct LeaseSession<S, P> {
    store: Arc<dyn ProcessStore<S, P>>,
    clock: Arc<dyn Clock>,
    holder_id: String,
    policy: LeasePolicy,
    flags: Mutex<LeaseFlags>,
    lost: AtomicBool,
}

impl<S: ProcessState, P: ProcessPayload> LeaseSession<S, P> {
    /// Session for a lease `holder_id` has just acquired
    pub(crate) fn acquired(
        store: Arc<dyn ProcessStore<S, P>>,
        clock: Arc<dyn Clock>,
        holder_id: impl Into<String>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            holder_id: holder_id.into(),
            policy,
            flags: Mutex::new(LeaseFlags {
                held: true,
                lost: false,
            }),
            lost: AtomicBool::new(false),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Renewal failed at some point; whatever the handler computed is stale
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Persist `process` and drop the lease in one write
    pub async fn checkpoint(&self, process: &ProcessEntity<S, P>) -> Result<(), StoreError> {
        let mut flags = self.flags.lock().await;
        if flags.lost || !flags.held {
            return Err(StoreError::LeaseLost(*process.id()));
        }
        let result = self.store.update_and_release(process, &self.holder_id).await;
        match &result {
            Ok(()) => flags.held = false,
            Err(StoreError::LeaseLost(_)) => {
                flags.held = false;
                self.mark_lost(&mut flags);
            }
            Err(_) => {}
        }
        result
    }

    /// Take the lease back after a checkpoint and reload the process
    ///
    /// `None` when another holder kept the process through every attempt;
    /// whoever has it now is authoritative.
    pub async fn reclaim(
        &self,
        id: &ProcessId,
    ) -> Result<Option<ProcessEntity<S, P>>, StoreError> {
        let mut flags = self.flags.lock().await;
        for attempt in 0..self.policy.attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff).await;
            }
            if self
                .store
                .acquire_lease(id, &self.holder_id, self.policy.ttl)
                .await?
            {
                flags.held = true;
                flags.lost = false;
                self.lost.store(false, Ordering::Release);
                return self.store.find(id).await;
            }
        }
        debug!(process_id = %id, "Could not reclaim process, another holder owns it");
        Ok(None)
    }

    /// Heartbeat tick. Returns false once the lease is known to be lost.
    pub(crate) async fn renew(&self, id: &ProcessId) -> bool {
        let mut flags = self.flags.lock().await;
        if flags.lost {
            return false;
        }
        if !flags.held {
            return true;
        }
        match self
            .store
            .renew_lease(id, &self.holder_id, self.policy.ttl)
            .await
        {
            Ok(()) => true,
            Err(StoreError::LeaseLost(_)) | Err(StoreError::NotFound(_)) => {
                warn!(process_id = %id, holder = %self.holder_id, "Lease lost during handler");
                self.mark_lost(&mut flags);
                false
            }
            Err(e) => {
                // transient; the lease may still be valid
                warn!(process_id = %id, error = %e, "Lease renewal failed");
                true
            }
        }
    }

    /// Release if still held. Idempotent.
    pub(crate) async fn release(&self, id: &ProcessId) -> Result<(), StoreError> {
        let mut flags = self.flags.lock().await;
        if flags.held {
            flags.held = false;
            self.store.release_lease(id, &self.holder_id).await?;
        }
        Ok(())
    }

    fn mark_lost(&self, flags: &mut LeaseFlags) {
        flags.lost = true;
        self.lost.store(true, Ordering::Release);
    }
}

/// Apply `mutate` to a process under its lease
///
/// Used by inbound operations (peer acknowledgements, external reports) that
/// change a process outside the poll loop. Contention is retried a few times
/// and then surfaced as [`ProcessError::LeaseContention`]; a failing mutation
/// releases the lease without writing anything.
pub async fn mutate_with_lease<S, P, F>(
    store: &dyn ProcessStore<S, P>,
    holder_id: &str,
    policy: &LeasePolicy,
    id: &ProcessId,
    mutate: F,
) -> Result<ProcessEntity<S, P>, ProcessError>
where
    S: ProcessState,
    P: ProcessPayload,
    F: FnOnce(&mut ProcessEntity<S, P>) -> Result<(), ProcessError>,
{
    if store.find(id).await?.is_none() {
        return Err(ProcessError::NotFound(id.to_string()));
    }

    let mut acquired = false;
    for attempt in 0..policy.attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff).await;
        }
        if store.acquire_lease(id, holder_id, policy.ttl).await? {
            acquired = true;
            break;
        }
        debug!(process_id = %id, attempt, "Lease contention on inbound mutation");
    }
    if !acquired {
        return Err(ProcessError::LeaseContention(*id));
    }

    let mut process = match store.find(id).await {
        Ok(Some(p)) => p,
        Ok(None) => return Err(ProcessError::NotFound(id.to_string())),
        Err(e) => {
            let _ = store.release_lease(id, holder_id).await;
            return Err(e.into());
        }
    };

    if let Err(e) = mutate(&mut process) {
        store.release_lease(id, holder_id).await?;
        return Err(e);
    }

    store.update_and_release(&process, holder_id).await?;
    Ok(process)
}
