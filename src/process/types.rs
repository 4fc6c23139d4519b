//! Process Core Types
//!
//! The persisted entity shared by every process kind. A transfer process and
//! a contract negotiation are both a [`ProcessEntity`], parameterized by
//! their state enum and payload.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ProcessError;
use super::state::ProcessState;

/// Process ID type - ULID-based unique identifier
///
/// Sortable by creation time and generated without coordination between
/// connector instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(ulid::Ulid);

impl ProcessId {
    /// Generate a new unique ProcessId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Side of the exchange this process runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ProcessRole {
    Consumer = 1,
    Provider = 2,
}

impl ProcessRole {
    /// Get numeric ID for storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from stored ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ProcessRole::Consumer),
            2 => Some(ProcessRole::Provider),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Consumer => "CONSUMER",
            ProcessRole::Provider => "PROVIDER",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Time-bounded exclusive claim on a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder_id: String,
    pub leased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            holder_id: holder_id.into(),
            leased_at: now,
            expires_at: lease_expiry(now, ttl),
        }
    }

    /// A lease is expired strictly after `expires_at`.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    #[inline]
    pub fn is_held_by(&self, holder_id: &str, now: DateTime<Utc>) -> bool {
        self.holder_id == holder_id && !self.is_expired(now)
    }
}

/// `now + ttl`, saturating instead of overflowing.
pub fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Payload bound shared by every process kind.
pub trait ProcessPayload:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> ProcessPayload for T where
    T: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Persisted, versioned record of one process
///
/// State-changing fields are only reachable through the transition methods,
/// which enforce the kind's transition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntity<S, P> {
    pub(crate) id: ProcessId,
    pub(crate) role: ProcessRole,
    pub(crate) state: S,
    /// Incremented on every persisted transition, retries included
    pub(crate) state_count: u32,
    pub(crate) state_timestamp: DateTime<Utc>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) error_detail: Option<String>,
    /// Consecutive retryable failures in the current step
    pub(crate) retry_count: u32,
    pub(crate) payload: P,
    pub(crate) lease: Option<Lease>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl<S: ProcessState, P> ProcessEntity<S, P> {
    /// Create a new process in the kind's initial state
    pub fn new(role: ProcessRole, payload: P) -> Self {
        Self::with_id(ProcessId::new(), role, payload)
    }

    pub fn with_id(id: ProcessId, role: ProcessRole, payload: P) -> Self {
        let now = Utc::now();
        Self {
            id,
            role,
            state: S::initial(),
            state_count: 0,
            state_timestamp: now,
            correlation_id: None,
            error_detail: None,
            retry_count: 0,
            payload,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn state_count(&self) -> u32 {
        self.state_count
    }

    pub fn state_timestamp(&self) -> DateTime<Utc> {
        self.state_timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Leased by someone whose lease has not yet expired
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|l| !l.is_expired(now))
    }

    /// Advance to `next` along the transition table
    pub fn transition_to(&mut self, next: S) -> Result<(), ProcessError> {
        self.check_transition(next)?;
        self.retry_count = 0;
        if !next.is_failure() {
            self.error_detail = None;
        }
        self.enter(next);
        Ok(())
    }

    /// Walk every intermediate step up to `target`
    ///
    /// Each step is validated and counted, so the persisted history is the
    /// same as if the steps had been taken one pass at a time.
    pub fn transition_through(&mut self, target: S) -> Result<(), ProcessError> {
        let path = super::state::path_between(self.state, target, self.role)
            .ok_or_else(|| self.invalid(target))?;
        for step in path {
            self.transition_to(step)?;
        }
        Ok(())
    }

    /// Move to a failure state (ERROR or a domain rejection) with detail
    pub fn fail_to(&mut self, next: S, detail: impl Into<String>) -> Result<(), ProcessError> {
        self.check_transition(next)?;
        self.retry_count = 0;
        self.error_detail = Some(detail.into());
        self.enter(next);
        Ok(())
    }

    /// Move to the kind's ERROR state with detail
    pub fn transition_error(&mut self, detail: impl Into<String>) -> Result<(), ProcessError> {
        self.fail_to(S::error(), detail)
    }

    /// Explicit rollback-to-retry to the step that led here
    pub fn roll_back_to(&mut self, previous: S) -> Result<(), ProcessError> {
        if !self.state.can_roll_back_to(previous, self.role) {
            return Err(self.invalid(previous));
        }
        self.retry_count += 1;
        self.enter(previous);
        Ok(())
    }

    /// Take the edge to `next` again after a rollback, keeping the retry count
    pub fn reattempt(&mut self, next: S) -> Result<(), ProcessError> {
        self.check_transition(next)?;
        self.enter(next);
        Ok(())
    }

    /// Whether the exponential retry delay since the last write has passed
    ///
    /// Always true before the first retry.
    pub fn backoff_elapsed(&self, now: DateTime<Utc>, base: Duration) -> bool {
        if self.retry_count == 0 || base.is_zero() {
            return true;
        }
        let shift = (self.retry_count - 1).min(16);
        let delay = base.checked_mul(1u32 << shift).unwrap_or(Duration::MAX);
        lease_expiry(self.updated_at, delay) <= now
    }

    /// Stay in the current state and count one more retry
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
        self.state_count += 1;
        self.updated_at = Utc::now();
    }

    fn check_transition(&self, next: S) -> Result<(), ProcessError> {
        if self.state.can_transition_to(next, self.role) {
            Ok(())
        } else {
            Err(self.invalid(next))
        }
    }

    fn invalid(&self, next: S) -> ProcessError {
        ProcessError::InvalidStateTransition {
            from: self.state.to_string(),
            to: next.to_string(),
        }
    }

    fn enter(&mut self, next: S) {
        let now = Utc::now();
        self.state = next;
        self.state_count += 1;
        self.state_timestamp = now;
        self.updated_at = now;
    }
}

impl<S: ProcessState, P> fmt::Display for ProcessEntity<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Process[{}] role={} state={} count={}",
            self.id, self.role, self.state, self.state_count
        )
    }
}
