//! Ratekeeper daemon.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_service::{RatesService, ServiceConfig};
use ratekeeper_store::{MemoryStore, PgStore, Stores};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Ratekeeper");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let registry = config.registry()?;
    let stores = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections, registry).await?;
            store.prepare().await?;
            info!("Using PostgreSQL storage");
            Stores::shared(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory storage");
            Stores::shared(Arc::new(MemoryStore::new(registry)))
        }
    };

    let service = Arc::new(RatesService::new(&config, stores)?);

    let poller = Arc::new(service.feed_poller(&config));
    if poller.adapter_count() == 0 {
        warn!("No feed adapters registered, batch ingestion is idle");
    }
    let poll_tasks = poller.spawn();

    let shutdown = service.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        if let Err(e) = shutdown.stop().await {
            error!(error = %e, "Error during shutdown");
        }
    });

    service.start().await?;

    info!(
        currencies = ?config.currencies.supported,
        rate_types = ?config.enabled_rate_types,
        "Ratekeeper running"
    );

    while !service.state().is_terminal() {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    for task in poll_tasks {
        task.abort();
    }

    info!(metrics = ?service.metrics().snapshot(), "Ratekeeper shutdown complete");
    Ok(())
}
