//! Transfer Processes
//!
//! Moves one asset between consumer and provider under an agreed contract.
//!
//! # State Machine
//!
//! ```text
//! INITIAL ─▶ PROVISIONING ─▶ PROVISIONED ─┬─▶ REQUESTED ─▶ REQUESTED_ACK ─┐  (consumer)
//!                                         └───────────────────────────────┤  (provider)
//!                                                                         ▼
//!                   ENDED ◀─ DEPROVISIONED ◀─ DEPROVISIONING ◀─ COMPLETED ◀─ IN_PROGRESS
//!
//! ERROR: terminal, reachable from any non-terminal state
//! ```
//!
//! A consumer writes REQUESTED before it dispatches; a failed dispatch that
//! can be retried rolls back to PROVISIONED.

pub mod delegating;
pub mod manager;
pub mod proxy;
pub mod state;
pub mod sync_manager;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use delegating::DelegatingTransferManager;
pub use manager::{TransferHandler, TransferProcessManager};
pub use proxy::{DataProxy, DataProxyManager, ProxyEntry, ProxyError};
pub use state::TransferProcessState;
pub use sync_manager::SyncTransferManager;
pub use types::{
    DataAddress, DataRequest, ResponseStatus, TransferInitiateResult, TransferPayload,
    TransferProcess,
};
