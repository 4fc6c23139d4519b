//! Admin HTTP surface
//!
//! Health plus read access to processes, and a way to start a transfer.

pub mod handlers;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health::health_check))
        .route("/api/v1/transfers", post(handlers::transfer::create_transfer))
        .route("/api/v1/transfers/{id}", get(handlers::transfer::get_transfer))
        .route(
            "/api/v1/negotiations/{id}",
            get(handlers::negotiation::get_negotiation),
        )
        .with_state(state)
}

/// Serve the admin API until `shutdown` resolves
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Admin API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
