//! Tick Ingest Binary
//!
//! Connects to the tick feed, buffers ticks and batches them into
//! training epochs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! TICK_USER_ID=demo cargo run --bin tick-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TICK_USER_ID`: Owner of the collected epochs
//!
//! ## Optional
//! - `TICK_FEED_URL`: Feed WebSocket URL
//! - `TICK_FEED_SYMBOL`: Symbol to subscribe to (default: R_10)
//! - `TICK_FEED_SUBSCRIPTION`: Raw JSON subscription, overrides the symbol
//! - `TICK_BATCH_SIZE`: Ticks per epoch, 10 to 1000 (default: 100)
//! - `TICK_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tick_ingest::application::ports::{EpochStorePort, TrainerPort};
use tick_ingest::application::services::{
    BatcherConfig, BatcherEvent, EpochBatcher, TickBuffer, TickBufferConfig,
};
use tick_ingest::infrastructure::events::{EventBus, attach_batcher, attach_tick_buffer};
use tick_ingest::infrastructure::feed::{
    ConnectionSupervisor, EnvironmentSignal, SupervisorConfig, WebSocketTransport,
};
use tick_ingest::infrastructure::health::{HealthServer, HealthServerState};
use tick_ingest::infrastructure::persistence::InMemoryEpochStore;
use tick_ingest::infrastructure::telemetry;
use tick_ingest::infrastructure::training::LinearTrainer;
use tick_ingest::{PipelineConfig, init_metrics};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        otlp_export = telemetry_guard.is_exporting(),
        "Starting tick ingest"
    );

    let _metrics_handle = init_metrics()?;

    let config = PipelineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Event bus and consumers
    let bus = Arc::new(EventBus::with_defaults());
    let buffer = Arc::new(TickBuffer::new(TickBufferConfig::from_settings(
        &config.buffer,
    )));
    attach_tick_buffer(&bus, &buffer);

    let store: Arc<dyn EpochStorePort> = Arc::new(InMemoryEpochStore::new());
    let trainer: Arc<dyn TrainerPort> = Arc::new(LinearTrainer::new());
    let batcher = EpochBatcher::spawn(
        BatcherConfig::new(config.user_id.clone(), config.batching.batch_size)
            .with_training_timeout(config.batching.training_timeout),
        trainer,
        store,
    )
    .await?;
    attach_batcher(&bus, &batcher);
    batcher.start(config.batching.batch_size);

    tokio::spawn(log_batcher_events(
        batcher.subscribe_events(),
        shutdown_token.clone(),
    ));

    // Feed connection
    let supervisor = ConnectionSupervisor::new(
        SupervisorConfig::from_pipeline_config(&config),
        Arc::new(WebSocketTransport::new()),
        Arc::clone(&bus),
    );
    let (feed, supervisor_task) = supervisor.start(&shutdown_token);
    feed.connect().await?;

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed.clone(),
        Arc::clone(&buffer),
        Arc::clone(&batcher),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Tick ingest ready");

    await_shutdown(&shutdown_token).await;

    let _ = feed.signal(EnvironmentSignal::Unload).await;
    batcher.stop();
    batcher.shutdown();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, supervisor_task)
        .await
        .is_err()
    {
        tracing::warn!("Connection supervisor did not stop in time");
    }

    tracing::info!(
        epochs = batcher.status().epochs_completed,
        exported_ticks = buffer.export_len(),
        "Tick ingest stopped"
    );
    Ok(())
}

/// Log epoch results until shutdown.
async fn log_batcher_events(
    mut events: broadcast::Receiver<BatcherEvent>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(BatcherEvent::EpochCompleted(record)) => {
                    tracing::info!(
                        epoch = record.epoch_number,
                        loss = record.loss,
                        accuracy = record.accuracy,
                        "Epoch completed"
                    );
                }
                Ok(BatcherEvent::EpochFailed { sequence, error, discarded, retained }) => {
                    tracing::warn!(sequence, error = %error, discarded, retained, "Epoch failed");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Batcher event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        user_id = %config.user_id,
        batch_size = config.batching.batch_size.get(),
        training_timeout_secs = config.batching.training_timeout.as_secs(),
        health_port = config.server.health_port,
        display_capacity = config.buffer.display_capacity,
        export_capacity = config.buffer.export_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        subscription = %config.feed.subscription.to_value(),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "Feed endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
