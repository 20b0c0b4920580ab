//! xgql Server Entry Point
//!
//! Bootstraps configuration, connects to the object store, builds the
//! process-wide client cache and starts the Axum HTTP server.

use std::sync::Arc;

use tokio::sync::watch;
use xgql_api::telemetry::{init_tracing, TelemetryConfig};
use xgql_api::{build_schema, create_router, ApiConfig, ApiError, ApiResult, AppState, StoreBackend};
use xgql_clients::{
    ClientCache, Discovery, MemoryCluster, RestConfig, RestConnector, SharedTypeMapper,
    StoreConnector,
};
use xgql_core::{Anonymizer, GatewayConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::from_env())?;

    let api_config = ApiConfig::from_env()?;
    let gateway_config = GatewayConfig::from_env()?;

    let (connector, discovery) = connect(&api_config.store).await?;
    let mapper = Arc::new(SharedTypeMapper::new(discovery, gateway_config.refresh.clone()).await?);
    tracing::info!(kinds = mapper.snapshot().len(), "Discovered served kinds");

    let cache = Arc::new(ClientCache::new(
        connector,
        mapper,
        &gateway_config,
        Anonymizer::random(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let eviction = cache.spawn_eviction(shutdown_rx);

    let schema = build_schema(
        Arc::clone(&cache),
        gateway_config.call_timeout,
        api_config.request_timeout,
    );
    let addr = api_config.listen;
    let app = create_router(AppState::new(schema, Arc::clone(&cache), api_config));

    tracing::info!(%addr, "Starting xgql server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = eviction.await {
        tracing::warn!(error = %e, "Eviction task ended abnormally");
    }
    cache.shutdown();

    served.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
}

async fn connect(
    backend: &StoreBackend,
) -> ApiResult<(Arc<dyn StoreConnector>, Arc<dyn Discovery>)> {
    match backend {
        StoreBackend::Rest => {
            let connector = RestConnector::infer(RestConfig::from_env()?).await?;
            let discovery = connector.discovery();
            tracing::info!("Using the Kubernetes API server");
            Ok((Arc::new(connector), Arc::new(discovery)))
        }
        StoreBackend::Memory { fixtures } => {
            let cluster = match fixtures {
                Some(path) => {
                    let yaml = tokio::fs::read_to_string(path).await?;
                    MemoryCluster::from_yaml(&yaml)?
                }
                None => MemoryCluster::new(),
            };
            tracing::info!(fixtures = ?fixtures, "Using the in-memory cluster");
            Ok((Arc::new(cluster.clone()), Arc::new(cluster)))
        }
    }
}
