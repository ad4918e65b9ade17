use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use amlwatch::anomaly::engine::AnomalyEngine;
use amlwatch::anomaly::model::IsolationForestModel;
use amlwatch::api::AppState;
use amlwatch::config::Config;
use amlwatch::ingest::generator::SyntheticGenerator;
use amlwatch::pipeline::{EventHub, StreamCoordinator};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=debug for per-transaction output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("AML monitor starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load_or_default(&config_path)?;
    tracing::info!(
        history_capacity = config.detection.history_capacity,
        high_risk_locations = config.detection.high_risk_locations.len(),
        "Configuration loaded from {}",
        config_path
    );

    // Train the anomaly model before accepting any traffic
    let model = IsolationForestModel::fit_synthetic(&config.model)?;
    let engine = AnomalyEngine::new(config.detection.clone(), Arc::new(model));
    let history = engine.history();
    let hub = Arc::new(EventHub::new(config.stream.channel_capacity));

    tracing::info!("Detection engine initialized");

    // Create shutdown signal
    let shutdown = CancellationToken::new();

    // Spawn API server
    if config.api.enabled {
        let state = AppState {
            history: history.clone(),
            hub: hub.clone(),
            replay_count: config.stream.replay_count,
        };
        let host = config.api.host.clone();
        let port = config.api.port;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = amlwatch::api::serve(state, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // Spawn the stream worker
    let source = SyntheticGenerator::new(config.stream.suspicious_fraction);
    let coordinator = StreamCoordinator::new(engine, source, hub, config.stream.clone());
    let worker = tokio::spawn(coordinator.run(shutdown.clone()));

    tracing::info!("Stream worker started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping stream worker...");
    shutdown.cancel();

    match worker.await {
        Ok(processed) => tracing::info!(processed, "Stream worker stopped"),
        Err(e) => tracing::error!(error = %e, "Stream worker panicked"),
    }

    tracing::info!(retained = history.len(), "AML monitor stopped gracefully");
    Ok(())
}
