mod config;
mod models;
mod mqtt_service;
mod rest_server;
mod store;
mod weather;

use crate::config::Config;
use crate::mqtt_service::MqttService;
use crate::rest_server::run_rest_server;
use crate::store::ConfigStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load process configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {:?}", e);
            return;
        }
    };

    let store = Arc::new(ConfigStore::load(config.config_path.as_str()));
    info!("Configuration store ready at {}.", config.config_path);

    // Seam to the rendering layer: it watches the latest telemetry value.
    let (telemetry_tx, mut telemetry_rx) = watch::channel(None);

    let mqtt_service = MqttService::new(store.clone(), telemetry_tx, config.clone());
    tokio::spawn(mqtt_service.start());

    tokio::spawn(async move {
        while telemetry_rx.changed().await.is_ok() {
            let latest = telemetry_rx.borrow_and_update().clone();
            if let Some(telemetry) = latest {
                info!(
                    "Weather update: {} -> {} ({:?}°)",
                    telemetry.raw_state,
                    telemetry.condition.as_str(),
                    telemetry.temperature
                );
            }
        }
    });

    // Start the REST API and push channel
    let rest_store = store.clone();
    let http_port = config.http_port;
    let rest_task = tokio::spawn(async move {
        run_rest_server(rest_store, http_port).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to handle termination signal: {:?}", e);
    }
    info!("Shutting down.");
    rest_task.abort();
}
