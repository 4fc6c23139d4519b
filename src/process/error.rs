//! Process Engine Error Types

use thiserror::Error;

use super::types::ProcessId;

/// Store-level failures
///
/// Only [`StoreError::Unavailable`] is an infrastructure failure; everything
/// else is scoped to a single process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Process already exists: {0}")]
    DuplicateId(ProcessId),

    #[error("Process not found: {0}")]
    NotFound(ProcessId),

    #[error("Lease lost on process {0}")]
    LeaseLost(ProcessId),

    #[error("Corrupted process record: {0}")]
    Corrupted(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::DuplicateId(_) => "DUPLICATE_ID",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::LeaseLost(_) => "LEASE_LOST",
            StoreError::Corrupted(_) => "CORRUPTED",
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    /// The store itself cannot be reached; a manager must halt on this
    #[inline]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupted(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Errors surfaced by managers to their callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Process {0} is leased by another worker")]
    LeaseContention(ProcessId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ProcessError::NotFound(_) => "PROCESS_NOT_FOUND",
            ProcessError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ProcessError::LeaseContention(_) => "LEASE_CONTENTION",
            ProcessError::InvalidRequest(_) => "INVALID_REQUEST",
            ProcessError::Store(e) => e.code(),
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            ProcessError::NotFound(_) => 404,
            ProcessError::InvalidRequest(_) => 400,
            ProcessError::InvalidStateTransition { .. } => 409,
            ProcessError::LeaseContention(_) => 409,
            ProcessError::Store(StoreError::DuplicateId(_)) => 409,
            ProcessError::Store(StoreError::NotFound(_)) => 404,
            ProcessError::Store(StoreError::Unavailable(_)) => 503,
            ProcessError::Store(_) => 500,
        }
    }

    /// Transient: the caller (or the remote peer) may simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessError::LeaseContention(_)
                | ProcessError::Store(StoreError::LeaseLost(_))
                | ProcessError::Store(StoreError::Unavailable(_))
        )
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ProcessError::Store(e) if e.is_infrastructure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = ProcessId::new();
        assert_eq!(StoreError::LeaseLost(id).code(), "LEASE_LOST");
        assert_eq!(
            ProcessError::Store(StoreError::DuplicateId(id)).code(),
            "DUPLICATE_ID"
        );
        assert_eq!(ProcessError::LeaseContention(id).code(), "LEASE_CONTENTION");
    }

    #[test]
    fn test_http_status() {
        let id = ProcessId::new();
        assert_eq!(ProcessError::NotFound("x".into()).http_status(), 404);
        assert_eq!(ProcessError::LeaseContention(id).http_status(), 409);
        assert_eq!(
            ProcessError::Store(StoreError::Unavailable("down".into())).http_status(),
            503
        );
    }

    #[test]
    fn test_classification() {
        let id = ProcessId::new();
        assert!(StoreError::Unavailable("down".into()).is_infrastructure());
        assert!(!StoreError::LeaseLost(id).is_infrastructure());
        assert!(ProcessError::LeaseContention(id).is_retryable());
        assert!(!ProcessError::InvalidRequest("bad".into()).is_retryable());
        assert!(ProcessError::Store(StoreError::Unavailable("down".into())).is_infrastructure());
    }

    #[test]
    fn test_sqlx_mapping() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Corrupted(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }
}
