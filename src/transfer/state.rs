//! Transfer Process State Definitions
//!
//! Codes match the values persisted by existing connector deployments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::process::{ProcessRole, ProcessState};

/// Transfer process states
///
/// Terminal states: ENDED (1100), ERROR (-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum TransferProcessState {
    /// Created, no side effects yet
    Initial = 100,

    /// Resources are being allocated
    Provisioning = 200,

    /// All resources allocated (or none needed)
    Provisioned = 300,

    /// Consumer: request persisted, dispatch to the provider in flight
    Requested = 400,

    /// Consumer: provider acknowledged the request
    RequestedAck = 500,

    /// Data flow started
    InProgress = 600,

    Completed = 800,

    Deprovisioning = 900,

    Deprovisioned = 1000,

    /// Terminal: unwind finished
    Ended = 1100,

    /// Terminal: failed, see error detail
    Error = -1,
}

const ALL: [TransferProcessState; 11] = [
    TransferProcessState::Initial,
    TransferProcessState::Provisioning,
    TransferProcessState::Provisioned,
    TransferProcessState::Requested,
    TransferProcessState::RequestedAck,
    TransferProcessState::InProgress,
    TransferProcessState::Completed,
    TransferProcessState::Deprovisioning,
    TransferProcessState::Deprovisioned,
    TransferProcessState::Ended,
    TransferProcessState::Error,
];

impl TransferProcessState {
    /// Get the numeric state code for storage
    #[inline]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    /// Convert from a stored state code
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            100 => Some(TransferProcessState::Initial),
            200 => Some(TransferProcessState::Provisioning),
            300 => Some(TransferProcessState::Provisioned),
            400 => Some(TransferProcessState::Requested),
            500 => Some(TransferProcessState::RequestedAck),
            600 => Some(TransferProcessState::InProgress),
            800 => Some(TransferProcessState::Completed),
            900 => Some(TransferProcessState::Deprovisioning),
            1000 => Some(TransferProcessState::Deprovisioned),
            1100 => Some(TransferProcessState::Ended),
            -1 => Some(TransferProcessState::Error),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            TransferProcessState::Initial => "INITIAL",
            TransferProcessState::Provisioning => "PROVISIONING",
            TransferProcessState::Provisioned => "PROVISIONED",
            TransferProcessState::Requested => "REQUESTED",
            TransferProcessState::RequestedAck => "REQUESTED_ACK",
            TransferProcessState::InProgress => "IN_PROGRESS",
            TransferProcessState::Completed => "COMPLETED",
            TransferProcessState::Deprovisioning => "DEPROVISIONING",
            TransferProcessState::Deprovisioned => "DEPROVISIONED",
            TransferProcessState::Ended => "ENDED",
            TransferProcessState::Error => "ERROR",
        }
    }

    /// Forward edges, without the universal edge to ERROR
    fn forward(&self, role: ProcessRole) -> &'static [TransferProcessState] {
        use TransferProcessState::*;
        match (self, role) {
            (Initial, _) => &[Provisioning],
            (Provisioning, _) => &[Provisioned],
            (Provisioned, ProcessRole::Consumer) => &[Requested],
            (Provisioned, ProcessRole::Provider) => &[InProgress],
            (Requested, ProcessRole::Consumer) => &[RequestedAck],
            (RequestedAck, ProcessRole::Consumer) => &[InProgress],
            (InProgress, _) => &[Completed],
            (Completed, _) => &[Deprovisioning],
            (Deprovisioning, _) => &[Deprovisioned],
            (Deprovisioned, _) => &[Ended],
            _ => &[],
        }
    }
}

impl ProcessState for TransferProcessState {
    fn all() -> &'static [Self] {
        &ALL
    }

    fn initial() -> Self {
        TransferProcessState::Initial
    }

    fn error() -> Self {
        TransferProcessState::Error
    }

    fn code(&self) -> i32 {
        self.id()
    }

    fn as_str(&self) -> &'static str {
        self.name()
    }

    #[inline]
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferProcessState::Ended | TransferProcessState::Error
        )
    }

    fn can_transition_to(&self, next: Self, role: ProcessRole) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == TransferProcessState::Error || self.forward(role).contains(&next)
    }
}

impl fmt::Display for TransferProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<i32> for TransferProcessState {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, ()> {
        TransferProcessState::from_id(value).ok_or(())
    }
}
