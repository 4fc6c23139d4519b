//! Dataspace Connector - Process Engine
//!
//! Leased, crash-safe state machines for data transfers and contract
//! negotiations. Any number of connector instances may share one store;
//! the store lease is the only coordination between them.
//!
//! # Modules
//!
//! - [`process`] - Generic process entity, store, lease and poll loop
//! - [`dispatch`] - Remote message dispatchers keyed by protocol
//! - [`provision`] - Resource provisioners
//! - [`transfer`] - Transfer process kind (async, sync, delegating)
//! - [`negotiation`] - Contract negotiation process kind
//! - [`gateway`] - Admin HTTP API
//! - [`config`] / [`logging`] - Startup plumbing

pub mod config;
pub mod logging;

// Engine
pub mod process;

// Collaborators
pub mod dispatch;
pub mod provision;

// Process kinds
pub mod negotiation;
pub mod transfer;

// Admin surface
pub mod gateway;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError, ManagerConfig};
pub use dispatch::{DispatchError, DispatcherRegistry, RemoteMessageDispatcher};
pub use negotiation::{ContractNegotiationManager, NegotiationState};
pub use process::{
    InMemoryProcessStore, PgProcessStore, ProcessEntity, ProcessError, ProcessId, ProcessRole,
    ProcessStore, StoreError,
};
pub use provision::{Provisioner, ProvisionerRegistry};
pub use transfer::{
    DataRequest, DelegatingTransferManager, TransferProcessManager, TransferProcessState,
};
