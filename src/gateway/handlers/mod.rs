pub mod health;
pub mod negotiation;
pub mod transfer;

use crate::process::ProcessId;

use super::types::ApiError;

/// Process ids in paths are ULID strings
pub(crate) fn parse_process_id(raw: &str) -> Result<ProcessId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid process id: {raw}")))
}
