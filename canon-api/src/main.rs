//! CANON API Server Entry Point
//!
//! Bootstraps configuration and telemetry, wires the store, feed, cache and
//! invalidation consumer, and serves the Axum router until ctrl-c.

use canon_api::telemetry::{init_tracing, TelemetryConfig};
use canon_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env();
    let state = AppState::in_memory(&api_config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = state.consumer.spawn(shutdown_rx);
    tracing::info!(
        partitions = api_config.feed.partition_count,
        edge_backend = state.cache.edge().kind(),
        hot_capacity = api_config.cache.hot_capacity,
        "Invalidation consumers started"
    );

    let app = create_api_router(state, &api_config)?;

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting CANON API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    // Receivers may already be gone if every consumer exited on its own.
    let _ = shutdown_tx.send(true);
    for handle in consumers {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Consumer task did not stop cleanly");
        }
    }

    tracing::info!("CANON API server stopped");
    Ok(())
}
