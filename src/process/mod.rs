//! Leased Process Engine
//!
//! Generic machinery shared by every process kind (transfer, negotiation):
//!
//! - [`types::ProcessEntity`] - persisted record with role-aware transitions
//! - [`store::ProcessStore`] - persistence contract plus the atomic lease
//! - [`manager::ProcessManager`] - poll → lease → advance → persist loop
//! - [`wait::WaitStrategy`] - backoff between passes
//!
//! # Lease protocol
//!
//! ```text
//! next_for_state ──▶ acquire_lease ──▶ handler ──▶ update_and_release
//!                       │ lost            │ heartbeat renew every ttl/3
//!                       ▼                 ▼ lost
//!                     skip             discard result
//! ```

pub mod clock;
pub mod db;
pub mod error;
pub mod health;
pub mod lease;
pub mod manager;
pub mod memory;
pub mod state;
pub mod store;
pub mod types;
pub mod wait;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::PgProcessStore;
pub use error::{ProcessError, StoreError};
pub use health::{HealthSnapshot, ManagerHealth, ManagerStatus};
pub use lease::{LeasePolicy, LeaseSession};
pub use manager::{ProcessManager, StateHandler, StepOutcome};
pub use memory::InMemoryProcessStore;
pub use state::ProcessState;
pub use store::ProcessStore;
pub use types::{Lease, ProcessEntity, ProcessId, ProcessPayload, ProcessRole};
pub use wait::{ExponentialWaitStrategy, FixedWaitStrategy, WaitStrategy};
