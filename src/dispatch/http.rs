//! HTTP dispatcher: POSTs the JSON message to the peer's address.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{DispatchError, RemoteMessage, RemoteMessageDispatcher};

pub const HTTP_PROTOCOL: &str = "http-json";

pub struct HttpDispatcher {
    client: Client,
    protocol: String,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Protocol(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            protocol: HTTP_PROTOCOL.to_string(),
        })
    }

    /// Register under a different protocol name
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }
}

fn classify(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout(e.to_string())
    } else if e.is_connect() {
        DispatchError::Connection(e.to_string())
    } else if e.is_decode() {
        DispatchError::MalformedResponse(e.to_string())
    } else {
        DispatchError::Protocol(e.to_string())
    }
}

#[async_trait]
impl RemoteMessageDispatcher for HttpDispatcher {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn dispatch(&self, message: &RemoteMessage) -> Result<serde_json::Value, DispatchError> {
        let response = self
            .client
            .post(&message.recipient)
            .json(message)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if status.is_client_error() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                reason: body,
            });
        }
        if !status.is_success() {
            return Err(DispatchError::Protocol(format!(
                "unexpected status {status}: {body}"
            )));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| DispatchError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MessageType;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn spawn_peer() -> String {
        let app = Router::new()
            .route(
                "/ok",
                post(|Json(msg): Json<RemoteMessage>| async move {
                    Json(serde_json::json!({ "ack": msg.correlation_id }))
                }),
            )
            .route(
                "/reject",
                post(|| async { (StatusCode::FORBIDDEN, "policy violation") }),
            )
            .route("/garbage", post(|| async { "not json" }))
            .route(
                "/broken",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "oops") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn message(recipient: String) -> RemoteMessage {
        RemoteMessage {
            protocol: HTTP_PROTOCOL.to_string(),
            message_type: MessageType::TransferRequest,
            recipient,
            correlation_id: "corr-7".to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let base = spawn_peer().await;
        let response = dispatcher()
            .dispatch(&message(format!("{base}/ok")))
            .await
            .unwrap();
        assert_eq!(response["ack"], "corr-7");
    }

    #[tokio::test]
    async fn test_client_error_is_fatal_rejection() {
        let base = spawn_peer().await;
        let err = dispatcher()
            .dispatch(&message(format!("{base}/reject")))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Rejected {
                status: 403,
                reason: "policy violation".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_body_and_server_error_are_fatal() {
        let base = spawn_peer().await;
        let err = dispatcher()
            .dispatch(&message(format!("{base}/garbage")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MalformedResponse(_)));

        let err = dispatcher()
            .dispatch(&message(format!("{base}/broken")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_retryable() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dispatcher()
            .dispatch(&message(format!("http://{addr}/ok")))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected retryable, got {err:?}");
    }
}
