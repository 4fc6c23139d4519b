//! Dataspace Connector
//!
//! ```text
//! ┌──────────┐    ┌───────────────┐    ┌──────────────┐
//! │  Config  │───▶│ Process store │◀──▶│  Managers    │───▶ remote peers
//! │  (YAML)  │    │ (PG / memory) │    │ (poll loops) │
//! └──────────┘    └───────────────┘    └──────────────┘
//!                         ▲
//!                         └──────── admin API (axum)
//! ```
//!
//! Usage: `dataspace_connector [--env dev] [--port 8181]`

use std::sync::Arc;

use anyhow::Context;

use dataspace_connector::config::AppConfig;
use dataspace_connector::dispatch::DispatcherRegistry;
use dataspace_connector::dispatch::http::HttpDispatcher;
use dataspace_connector::gateway::{self, state::AppState};
use dataspace_connector::negotiation::{
    ContractNegotiationManager, NegotiationPayload, NegotiationState,
};
use dataspace_connector::process::{InMemoryProcessStore, PgProcessStore, ProcessStore, db};
use dataspace_connector::provision::ProvisionerRegistry;
use dataspace_connector::transfer::{
    DataProxyManager, DelegatingTransferManager, SyncTransferManager, TransferPayload,
    TransferProcessManager, TransferProcessState,
};

type TransferStore = Arc<dyn ProcessStore<TransferProcessState, TransferPayload>>;
type NegotiationStore = Arc<dyn ProcessStore<NegotiationState, NegotiationPayload>>;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<(TransferStore, NegotiationStore)> {
    let Some(url) = &config.postgres_url else {
        tracing::warn!("No postgres_url configured, processes are kept in memory only");
        return Ok((
            Arc::new(InMemoryProcessStore::<TransferProcessState, TransferPayload>::new()),
            Arc::new(InMemoryProcessStore::<NegotiationState, NegotiationPayload>::new()),
        ));
    };

    let pool = db::connect(url).await.context("connecting to PostgreSQL")?;
    let transfers =
        PgProcessStore::<TransferProcessState, TransferPayload>::new(pool.clone(), "transfer_processes");
    let negotiations =
        PgProcessStore::<NegotiationState, NegotiationPayload>::new(pool, "contract_negotiations");
    transfers.migrate().await.context("migrating transfer store")?;
    negotiations
        .migrate()
        .await
        .context("migrating negotiation store")?;
    transfers.health_check().await?;
    tracing::info!("Using PostgreSQL process store");
    Ok((Arc::new(transfers), Arc::new(negotiations)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env).with_context(|| format!("loading config/{env}.yaml"))?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = dataspace_connector::logging::init_logging(&config);

    tracing::info!(env = %env, instance_id = %config.instance_id, "Starting dataspace connector");

    let (transfer_store, negotiation_store) = build_stores(&config).await?;

    let http = HttpDispatcher::new(config.transfer.request_timeout())?;
    let dispatchers = Arc::new(DispatcherRegistry::new().with(Arc::new(http)));
    // provisioners and data proxies are registered by extensions
    let provisioners = Arc::new(ProvisionerRegistry::new());
    let proxies = Arc::new(DataProxyManager::new());

    let async_transfers = Arc::new(TransferProcessManager::new(
        transfer_store.clone(),
        dispatchers.clone(),
        provisioners,
        config.transfer.clone(),
        config.instance_id.clone(),
    ));
    let sync_transfers = Arc::new(SyncTransferManager::new(
        transfer_store,
        dispatchers.clone(),
        proxies,
        config.transfer.lease_policy(),
        config.instance_id.clone(),
    ));
    let transfers = Arc::new(DelegatingTransferManager::new(
        async_transfers,
        sync_transfers,
    ));
    let negotiations = Arc::new(ContractNegotiationManager::new(
        negotiation_store,
        dispatchers,
        config.negotiation.clone(),
        config.instance_id.clone(),
    ));

    transfers.start();
    negotiations.start();

    let state = Arc::new(AppState::new(transfers.clone(), negotiations.clone()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        tracing::info!("Shutdown requested");
    };
    let served = gateway::run_server(&config.gateway, state, shutdown).await;

    futures::future::join(transfers.stop(), negotiations.stop()).await;
    tracing::info!("Dataspace connector stopped");

    served.context("admin API server")
}
