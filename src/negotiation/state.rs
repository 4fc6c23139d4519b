//! Contract Negotiation State Definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::process::{ProcessRole, ProcessState};

/// Contract negotiation states
///
/// Terminal states: CONFIRMED (1200), DECLINED (1000), ERROR (-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum NegotiationState {
    Initial = 50,

    /// Consumer: request persisted, dispatch to the provider in flight
    Requesting = 100,

    /// Waiting for the provider's decision
    Requested = 200,

    /// Provider: rejection being sent
    Declining = 900,

    /// Terminal: the other side said no, reason in error detail
    Declined = 1000,

    /// Provider: agreement being sent
    Confirming = 1100,

    /// Terminal: agreement in place
    Confirmed = 1200,

    Error = -1,
}

const ALL: [NegotiationState; 8] = [
    NegotiationState::Initial,
    NegotiationState::Requesting,
    NegotiationState::Requested,
    NegotiationState::Declining,
    NegotiationState::Declined,
    NegotiationState::Confirming,
    NegotiationState::Confirmed,
    NegotiationState::Error,
];

impl NegotiationState {
    #[inline]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        ALL.iter().copied().find(|s| s.id() == id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Initial => "INITIAL",
            NegotiationState::Requesting => "REQUESTING",
            NegotiationState::Requested => "REQUESTED",
            NegotiationState::Declining => "DECLINING",
            NegotiationState::Declined => "DECLINED",
            NegotiationState::Confirming => "CONFIRMING",
            NegotiationState::Confirmed => "CONFIRMED",
            NegotiationState::Error => "ERROR",
        }
    }

    fn forward(&self, role: ProcessRole) -> &'static [NegotiationState] {
        use NegotiationState::*;
        match (self, role) {
            (Initial, ProcessRole::Consumer) => &[Requesting],
            (Requesting, ProcessRole::Consumer) => &[Requested],
            (Requested, ProcessRole::Consumer) => &[Confirmed, Declined],
            // a provider process starts from the consumer's request
            (Initial, ProcessRole::Provider) => &[Requested],
            (Requested, ProcessRole::Provider) => &[Confirming, Declining],
            (Confirming, ProcessRole::Provider) => &[Confirmed],
            (Declining, ProcessRole::Provider) => &[Declined],
            _ => &[],
        }
    }
}

impl ProcessState for NegotiationState {
    fn all() -> &'static [Self] {
        &ALL
    }

    fn initial() -> Self {
        NegotiationState::Initial
    }

    fn error() -> Self {
        NegotiationState::Error
    }

    fn code(&self) -> i32 {
        self.id()
    }

    fn as_str(&self) -> &'static str {
        self.name()
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Confirmed | NegotiationState::Declined | NegotiationState::Error
        )
    }

    fn can_transition_to(&self, next: Self, role: ProcessRole) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == NegotiationState::Error || self.forward(role).contains(&next)
    }

    fn is_failure(&self) -> bool {
        matches!(self, NegotiationState::Error | NegotiationState::Declined)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
