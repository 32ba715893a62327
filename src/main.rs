mod api;
mod collaborators;
mod config;
mod engine;
mod error;
mod gateway;
mod geo;
mod models;
mod observability;
mod orchestrator;
mod registry;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::collaborators::{HttpOrderCatalog, MockCatalog, OrderCatalog};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let catalog: Arc<dyn OrderCatalog> = match (
        config.order_service_url.clone(),
        config.restaurant_service_url.clone(),
    ) {
        (Some(orders), Some(restaurants)) => {
            Arc::new(HttpOrderCatalog::new(orders, restaurants))
        }
        _ => {
            tracing::warn!("no collaborator URLs configured; using in-memory catalog");
            Arc::new(MockCatalog::new())
        }
    };

    let shared_state = Arc::new(state::AppState::new(&config, catalog));

    orchestrator::spawn_consumers(shared_state.clone());

    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
