mod cleanup;
mod collage;
mod config;
mod frame_sampler;
mod frame_selector;
mod inventory_store;
mod pipeline;
mod product_parser;
mod scan_api;
mod vision_client;

use anyhow::{Context, Result};
use config::Config;
use inventory_store::InventoryStore;
use pipeline::ScanPipeline;
use scan_api::{start_api_server, AppState};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vision_client::VisionClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        "Starting shelf scanning service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let inventory = Arc::new(
        InventoryStore::new(&config.database)
            .await
            .context("Failed to initialize inventory store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        inventory
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let vision =
        VisionClient::from_config(&config.vision).context("Failed to configure vision providers")?;

    let pipeline = Arc::new(ScanPipeline::new(&config, vision));

    // Create API state
    let state = AppState {
        pipeline,
        inventory: inventory.clone(),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Shelf scanning service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down shelf scanning service");

    api_handle.abort();

    info!("Shelf scanning service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
