//! In-memory process store.
//!
//! Every lease decision happens under the DashMap entry's write guard, so the
//! check and the install are one atomic step even with many managers sharing
//! the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::clock::{Clock, SystemClock};
use super::error::StoreError;
use super::state::ProcessState;
use super::store::ProcessStore;
use super::types::{Lease, ProcessEntity, ProcessId, ProcessPayload, ProcessRole};

pub struct InMemoryProcessStore<S, P> {
    processes: DashMap<ProcessId, ProcessEntity<S, P>>,
    clock: Arc<dyn Clock>,
}

impl<S: ProcessState, P: ProcessPayload> InMemoryProcessStore<S, P> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            processes: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl<S: ProcessState, P: ProcessPayload> Default for InMemoryProcessStore<S, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: ProcessState, P: ProcessPayload> ProcessStore<S, P> for InMemoryProcessStore<S, P> {
    async fn create(&self, process: &ProcessEntity<S, P>) -> Result<(), StoreError> {
        match self.processes.entry(process.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(process.id)),
            Entry::Vacant(slot) => {
                let mut stored = process.clone();
                stored.lease = None;
                slot.insert(stored);
                Ok(())
            }
        }
    }

    async fn find(&self, id: &ProcessId) -> Result<Option<ProcessEntity<S, P>>, StoreError> {
        Ok(self.processes.get(id).map(|p| p.clone()))
    }

    async fn find_by_correlation_id(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<Option<ProcessEntity<S, P>>, StoreError> {
        Ok(self
            .processes
            .iter()
            .filter(|p| p.role == role && p.correlation_id.as_deref() == Some(correlation_id))
            .min_by_key(|p| (p.created_at, p.id))
            .map(|p| p.clone()))
    }

    async fn next_for_state(
        &self,
        state: S,
        max: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessEntity<S, P>>, StoreError> {
        let mut eligible: Vec<ProcessEntity<S, P>> = self
            .processes
            .iter()
            .filter(|p| p.state == state && !p.is_leased(now))
            .map(|p| p.clone())
            .collect();

        eligible.sort_by_key(|p| (p.updated_at, p.id));
        eligible.truncate(max);
        Ok(eligible)
    }

    async fn acquire_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut process = self
            .processes
            .get_mut(id)
            .ok_or(StoreError::NotFound(*id))?;

        let free = match &process.lease {
            None => true,
            Some(lease) => lease.is_expired(now) || lease.holder_id == holder_id,
        };
        if free {
            process.lease = Some(Lease::new(holder_id, now, ttl));
        }
        Ok(free)
    }

    async fn renew_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut process = self
            .processes
            .get_mut(id)
            .ok_or(StoreError::NotFound(*id))?;

        match &process.lease {
            Some(lease) if lease.is_held_by(holder_id, now) => {
                process.lease = Some(Lease::new(holder_id, now, ttl));
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(*id)),
        }
    }

    async fn update_and_release(
        &self,
        process: &ProcessEntity<S, P>,
        holder_id: &str,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut stored = self
            .processes
            .get_mut(&process.id)
            .ok_or(StoreError::NotFound(process.id))?;

        let held = stored
            .lease
            .as_ref()
            .is_some_and(|l| l.is_held_by(holder_id, now));
        if !held {
            return Err(StoreError::LeaseLost(process.id));
        }

        let mut next = process.clone();
        next.lease = None;
        next.updated_at = now;
        *stored = next;
        Ok(())
    }

    async fn release_lease(&self, id: &ProcessId, holder_id: &str) -> Result<(), StoreError> {
        if let Some(mut process) = self.processes.get_mut(id) {
            if process.lease.as_ref().is_some_and(|l| l.holder_id == holder_id) {
                process.lease = None;
            }
        }
        Ok(())
    }
}
