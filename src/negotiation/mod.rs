//! Contract Negotiations
//!
//! Second process kind on the engine: agreeing on a contract for an offer.
//!
//! ```text
//! consumer:  INITIAL ─▶ REQUESTING ─▶ REQUESTED ─┬─▶ CONFIRMED
//!                                                └─▶ DECLINED
//! provider:  REQUESTED ─┬─▶ CONFIRMING ─▶ CONFIRMED
//!                       └─▶ DECLINING  ─▶ DECLINED
//! ```
//!
//! DECLINED is a normal outcome, not an error: the reason is kept in the
//! error detail all the same.

pub mod manager;
pub mod state;
pub mod types;


pub use manager::{ContractNegotiationManager, NegotiationHandler};
pub use state::NegotiationState;
pub use types::{
    ClaimToken, ContractAgreement, ContractNegotiation, ContractOffer, ContractRequestMessage,
    NegotiationPayload, NegotiationRequest,
};
