//! Fluenta Billing Service - HTTP API for credits, usage, and vouchers.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fluenta_billing_service::{create_router, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fluenta_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fluenta Billing Service");

    let config = ServiceConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::new(store, config.clone());
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(
    config: &ServiceConfig,
) -> Result<Arc<dyn fluenta_billing_store::Store>, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = fluenta_billing_store::RocksStore::open(&config.data_dir)?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(
    _config: &ServiceConfig,
) -> Result<Arc<dyn fluenta_billing_store::Store>, Box<dyn std::error::Error>> {
    tracing::warn!("Using in-memory store; state is lost on restart");
    Ok(Arc::new(fluenta_billing_store::MemoryStore::new()))
}
