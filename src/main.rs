//! Grid Sentinel entry point: wires configuration, storage, the ingestion
//! worker and the MQTT transport together.

use grid_sentinel::alerts::{HttpSmsGateway, Notifier};
use grid_sentinel::config::ServerConfig;
use grid_sentinel::control::ControlPlane;
use grid_sentinel::db::Store;
use grid_sentinel::ingest::{Pipeline, DEFAULT_ENQUEUE_TIMEOUT};
use grid_sentinel::ledger::{ChainStatus, HashChainLedger};
use grid_sentinel::transport::MqttTransport;
use grid_sentinel::twin::DigitalTwin;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env file is fine
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grid_sentinel=info".parse()?),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Grid Sentinel...");
    cfg.log_summary();

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let ledger = Arc::new(HashChainLedger::new(store.clone()));
    match ledger.verify_chain()? {
        ChainStatus::Secure { chain_length } => {
            tracing::info!("Ledger intact ({} events)", chain_length)
        }
        ChainStatus::Empty => tracing::info!("Ledger is empty"),
        ChainStatus::Corrupted { violations } => {
            tracing::error!("Ledger integrity check failed with {} violations", violations.len());
            for violation in &violations {
                tracing::error!("  {}", violation);
            }
        }
    }

    let gateway = match cfg.sms_api_key.as_deref() {
        Some(key) => match HttpSmsGateway::new(&cfg.sms_endpoint, key, cfg.side_effect_timeout) {
            Ok(gateway) => {
                tracing::info!("SMS alerts via {}", gateway.endpoint());
                Some(gateway)
            }
            Err(e) => {
                tracing::error!("SMS gateway unavailable: {}", e);
                None
            }
        },
        None => {
            tracing::warn!("SMS credentials missing, alerts will be skipped");
            None
        }
    };
    let notifier = Arc::new(Notifier::new(gateway, cfg.notifier_config()));

    let twin = DigitalTwin::new(cfg.theft_threshold_amps);
    let transport = MqttTransport::new(cfg.mqtt_settings());
    let publisher = Arc::new(transport.publisher());

    // Start the ingestion worker
    let pipeline = Pipeline::new(
        twin.clone(),
        store.clone(),
        ledger.clone(),
        publisher.clone(),
        notifier.clone(),
        cfg.pipeline_config(),
    );
    let (ingest, worker) = pipeline.spawn(cfg.queue_capacity, DEFAULT_ENQUEUE_TIMEOUT);

    let control = ControlPlane::new(
        twin,
        store,
        ledger,
        publisher,
        notifier,
        ingest.clone(),
        cfg.admin_secret.clone(),
        cfg.side_effect_timeout,
    );

    // Start the transport
    let (stop_tx, stop_rx) = tokio::sync::broadcast::channel(1);
    let transport_task = transport.spawn(ingest, stop_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, draining ingestion queue");

    let _ = stop_tx.send(());
    if let Err(e) = transport_task.await {
        tracing::error!("Transport task failed: {}", e);
    }

    // The worker exits once the last queue sender is gone
    drop(control);
    worker.await?;

    tracing::info!("Grid Sentinel stopped");
    Ok(())
}
