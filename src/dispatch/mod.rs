//! Remote Message Dispatch
//!
//! Sends protocol messages to a peer connector. Dispatchers are registered per
//! protocol at startup and looked up through [`DispatcherRegistry`].
//!
//! Failures are classified once, here: connection-level problems are
//! retryable, everything else (peer rejection, bad response, protocol
//! violation) is fatal for the process that sent the message.

pub mod http;

pub use http::HttpDispatcher;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Kinds of messages a connector sends to its peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TransferRequest,
    ContractRequest,
    ContractAgreement,
    ContractRejection,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TransferRequest => "TRANSFER_REQUEST",
            MessageType::ContractRequest => "CONTRACT_REQUEST",
            MessageType::ContractAgreement => "CONTRACT_AGREEMENT",
            MessageType::ContractRejection => "CONTRACT_REJECTION",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a process wants sent; the registry fills in the correlation id
#[derive(Debug, Clone)]
pub struct Outbound {
    pub protocol: String,
    pub message_type: MessageType,
    /// Peer connector address
    pub recipient: String,
    pub payload: serde_json::Value,
}

/// Message as it goes over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub protocol: String,
    pub message_type: MessageType,
    pub recipient: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rejected by peer (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("No dispatcher registered for protocol: {0}")]
    NoDispatcher(String),
}

impl DispatchError {
    /// Connection-level failure; the message may be re-sent later
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Connection(_) | DispatchError::Timeout(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Connection(_) => "CONNECTION_FAILED",
            DispatchError::Timeout(_) => "TIMEOUT",
            DispatchError::Rejected { .. } => "REJECTED",
            DispatchError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            DispatchError::Protocol(_) => "PROTOCOL_VIOLATION",
            DispatchError::NoDispatcher(_) => "NO_DISPATCHER",
        }
    }
}

#[async_trait]
pub trait RemoteMessageDispatcher: Send + Sync {
    /// Protocol this dispatcher speaks
    fn protocol(&self) -> &str;

    /// Send one message and return the peer's response body
    async fn dispatch(&self, message: &RemoteMessage) -> Result<serde_json::Value, DispatchError>;
}

/// Protocol → dispatcher table, built once at startup
#[derive(Default, Clone)]
pub struct DispatcherRegistry {
    dispatchers: HashMap<String, Arc<dyn RemoteMessageDispatcher>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dispatcher: Arc<dyn RemoteMessageDispatcher>) {
        self.dispatchers
            .insert(dispatcher.protocol().to_string(), dispatcher);
    }

    pub fn with(mut self, dispatcher: Arc<dyn RemoteMessageDispatcher>) -> Self {
        self.register(dispatcher);
        self
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn RemoteMessageDispatcher>> {
        self.dispatchers.get(protocol).cloned()
    }

    /// Resolve the dispatcher for `outbound.protocol` and send
    ///
    /// The correlation id is only computed once a dispatcher is found.
    pub async fn send<F>(
        &self,
        outbound: Outbound,
        correlation_id: F,
    ) -> Result<serde_json::Value, DispatchError>
    where
        F: FnOnce() -> String + Send,
    {
        let dispatcher = self
            .get(&outbound.protocol)
            .ok_or_else(|| DispatchError::NoDispatcher(outbound.protocol.clone()))?;

        let message = RemoteMessage {
            protocol: outbound.protocol,
            message_type: outbound.message_type,
            recipient: outbound.recipient,
            correlation_id: correlation_id(),
            payload: outbound.payload,
        };
        debug!(
            message_type = %message.message_type,
            recipient = %message.recipient,
            correlation_id = %message.correlation_id,
            "Dispatching remote message"
        );
        dispatcher.dispatch(&message).await
    }
}
