//! Process Store Contract
//!
//! Abstract persistence plus the atomic lease primitive. Managers discover
//! work only through [`ProcessStore::next_for_state`] and mutate a process only
//! while holding its lease.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::state::ProcessState;
use super::types::{ProcessEntity, ProcessId, ProcessPayload, ProcessRole};

#[async_trait]
pub trait ProcessStore<S: ProcessState, P: ProcessPayload>: Send + Sync {
    /// Insert a new process. Fails with `DuplicateId` if the id exists.
    async fn create(&self, process: &ProcessEntity<S, P>) -> Result<(), StoreError>;

    async fn find(&self, id: &ProcessId) -> Result<Option<ProcessEntity<S, P>>, StoreError>;

    /// Match an inbound peer message to a locally tracked process
    ///
    /// Both sides of one exchange may live in the same store, so the match is
    /// per role. With several matches the oldest wins.
    async fn find_by_correlation_id(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<Option<ProcessEntity<S, P>>, StoreError>;

    /// Up to `max` processes in `state` whose lease is absent or expired at
    /// `now`, oldest `updated_at` first.
    async fn next_for_state(
        &self,
        state: S,
        max: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessEntity<S, P>>, StoreError>;

    /// Conditionally install a lease in one atomic write
    ///
    /// Succeeds when the process has no lease, an expired lease, or a live
    /// lease already held by `holder_id` (which is then extended).
    async fn acquire_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Extend a lease the caller still holds; `LeaseLost` otherwise
    async fn renew_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Persist state/payload and clear the lease in one atomic write
    ///
    /// Fails with `LeaseLost` if `holder_id` no longer holds a valid lease.
    async fn update_and_release(
        &self,
        process: &ProcessEntity<S, P>,
        holder_id: &str,
    ) -> Result<(), StoreError>;

    /// Drop a lease without writing the process. No-op if not held.
    async fn release_lease(&self, id: &ProcessId, holder_id: &str) -> Result<(), StoreError>;
}
