//! Contract Negotiation Types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::NegotiationState;
use crate::dispatch::http::HTTP_PROTOCOL;
use crate::process::ProcessEntity;

pub type ContractNegotiation = ProcessEntity<NegotiationState, NegotiationPayload>;

/// Claims of the calling connector, already verified by the identity layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken {
    pub claims: HashMap<String, String>,
}

impl ClaimToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// Connector id of the caller
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOffer {
    pub id: String,
    pub asset_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub policy: serde_json::Value,
}

impl ContractOffer {
    pub fn new(asset_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            asset_id: asset_id.into(),
            provider_id: provider_id.into(),
            policy: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: String,
    pub offer_id: String,
    pub asset_id: String,
    pub provider_id: String,
    pub consumer_id: String,
    pub policy: serde_json::Value,
    pub signed_at: DateTime<Utc>,
}

impl ContractAgreement {
    pub fn from_offer(offer: &ContractOffer, consumer_id: &str, signed_at: DateTime<Utc>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            offer_id: offer.id.clone(),
            asset_id: offer.asset_id.clone(),
            provider_id: offer.provider_id.clone(),
            consumer_id: consumer_id.to_string(),
            policy: offer.policy.clone(),
            signed_at,
        }
    }
}

/// What a consumer asks its own connector to negotiate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub offer: ContractOffer,
    /// Provider connector address
    pub connector_address: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Where the provider sends its decision
    #[serde(default)]
    pub callback_address: String,
}

fn default_protocol() -> String {
    HTTP_PROTOCOL.to_string()
}

impl NegotiationRequest {
    pub fn new(offer: ContractOffer, connector_address: impl Into<String>) -> Self {
        Self {
            offer,
            connector_address: connector_address.into(),
            protocol: default_protocol(),
            callback_address: String::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_callback(mut self, callback_address: impl Into<String>) -> Self {
        self.callback_address = callback_address.into();
        self
    }
}

/// Contract request as it travels from consumer to provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequestMessage {
    pub correlation_id: String,
    pub offer: ContractOffer,
    pub callback_address: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationPayload {
    pub offer: ContractOffer,
    /// Address the next message for the other side goes to
    pub counter_party_address: String,
    pub protocol: String,
    /// Consumer only: address given to the provider for its decision
    #[serde(default)]
    pub callback_address: String,
    #[serde(default)]
    pub counter_party_id: Option<String>,
    #[serde(default)]
    pub agreement: Option<ContractAgreement>,
    #[serde(default)]
    pub decline_reason: Option<String>,
    /// Provider: decision dispatched at this time, not yet confirmed sent
    #[serde(default)]
    pub pending_since: Option<DateTime<Utc>>,
}

impl NegotiationPayload {
    pub fn for_consumer(request: NegotiationRequest) -> Self {
        Self {
            offer: request.offer,
            counter_party_address: request.connector_address,
            protocol: request.protocol,
            callback_address: request.callback_address,
            counter_party_id: None,
            agreement: None,
            decline_reason: None,
            pending_since: None,
        }
    }

    pub fn for_provider(claim: &ClaimToken, message: ContractRequestMessage) -> Self {
        Self {
            offer: message.offer,
            counter_party_address: message.callback_address,
            protocol: message.protocol,
            callback_address: String::new(),
            counter_party_id: claim.subject().map(str::to_string),
            agreement: None,
            decline_reason: None,
            pending_since: None,
        }
    }
}
