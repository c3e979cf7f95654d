//! Transaction micro-batch pipeline
//!
//! Moves transaction events from a durable queue into a relational store:
//! - Bounded fetches from Redpanda or a local JSONL queue file
//! - Fail-closed validation and calendar/amount enrichment
//! - Idempotent raw (insert-only) and curated (upsert) writes
//! - Cursor commit only after both writes succeed
//! - Periodic quality gate over the trailing window

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use validator::Validate;

use queue::{open_source, FileQueueConfig, RedpandaConfig, SourceKind};
use store::{StoreClient, StoreConfig, TransactionStore};
use telemetry::{health, init_tracing_from_env, log_snapshot, metrics};
use worker::{CycleConfig, CycleController, PipelineScheduler, SchedulerConfig};

/// Source selection.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct SourceSection {
    #[serde(default)]
    kind: SourceKind,
}

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    source: SourceSection,

    #[serde(default)]
    redpanda: RedpandaConfig,

    #[serde(default)]
    file_queue: FileQueueConfig,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    cycle: CycleConfig,

    #[serde(default)]
    scheduler: SchedulerConfig,

    /// Run one cycle and one quality check, then exit
    #[serde(default)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection before any TLS use
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting transaction pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    info!(
        source = ?config.source.kind,
        brokers = ?config.redpanda.brokers,
        topic = %config.redpanda.topic,
        batch_size = config.cycle.batch_size,
        poison_policy = ?config.cycle.poison_policy,
        "Loaded configuration"
    );

    let store = Arc::new(
        StoreClient::connect(config.store.clone())
            .await
            .context("Failed to connect to store")?,
    );

    if let Err(e) = store::health::init_schema(&store).await {
        error!("Failed to initialize store schema: {}", e);
        // Continue anyway - the tables may already exist under another owner
    }

    check_health(&config, &store).await;

    let source = open_source(config.source.kind, &config.redpanda, &config.file_queue);
    let store: Arc<dyn TransactionStore> = store;
    let controller = Arc::new(CycleController::new(
        source,
        store.clone(),
        config.cycle.clone(),
    ));
    let scheduler = Arc::new(PipelineScheduler::new(
        config.scheduler.clone(),
        controller,
        store,
    ));

    if config.run_once {
        let (report, quality) = scheduler.run_once().await;
        log_snapshot(&metrics().snapshot());

        if !report.is_success() {
            bail!("Cycle {} failed: {:?}", report.cycle_id, report.outcome);
        }
        let quality = quality.context("Quality check could not run")?;
        quality.into_result().context("Quality gate failed")?;

        info!("One-shot run complete");
        return Ok(());
    }

    let handles = scheduler.clone().start();

    shutdown_signal().await;
    info!("Shutting down...");

    // Let an in-flight cycle finish so its batch is either committed or left for redelivery
    scheduler.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }

    log_snapshot(&metrics().snapshot());
    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. PIPELINE__STORE__URL
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PIPELINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat overrides for the common knobs
    if let Ok(brokers) = std::env::var("PIPELINE_BROKERS") {
        config.redpanda.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(topic) = std::env::var("PIPELINE_TOPIC") {
        config.redpanda.topic = topic;
    }
    if let Ok(group_id) = std::env::var("PIPELINE_GROUP_ID") {
        config.redpanda.group_id = group_id;
    }
    if let Ok(username) = std::env::var("PIPELINE_SASL_USERNAME") {
        config.redpanda.sasl_username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_SASL_PASSWORD") {
        config.redpanda.sasl_password = Some(password);
    }
    if let Ok(path) = std::env::var("PIPELINE_QUEUE_FILE") {
        config.file_queue.path = path.into();
    }
    if let Ok(url) = std::env::var("PIPELINE_STORE_URL") {
        config.store.url = url;
    }
    if let Ok(batch_size) = std::env::var("PIPELINE_BATCH_SIZE") {
        config.cycle.batch_size = batch_size
            .parse()
            .context("PIPELINE_BATCH_SIZE must be a positive integer")?;
    }
    if let Ok(poll_timeout) = std::env::var("PIPELINE_POLL_TIMEOUT_MS") {
        config.cycle.poll_timeout_ms = poll_timeout
            .parse()
            .context("PIPELINE_POLL_TIMEOUT_MS must be a positive integer")?;
    }
    if let Ok(interval) = std::env::var("PIPELINE_CYCLE_INTERVAL_SECS") {
        config.scheduler.cycle_interval_secs = interval
            .parse()
            .context("PIPELINE_CYCLE_INTERVAL_SECS must be a positive integer")?;
    }

    config
        .cycle
        .validate()
        .context("Invalid cycle configuration")?;
    config
        .scheduler
        .validate()
        .context("Invalid scheduler configuration")?;

    Ok(config)
}

/// Check component health on startup.
async fn check_health(config: &Config, store: &StoreClient) {
    let queue_healthy =
        queue::health::check_source(config.source.kind, &config.redpanda, &config.file_queue)
            .await;
    if queue_healthy {
        health().queue.set_healthy();
        info!("Queue connection: healthy");
    } else {
        health().queue.set_unhealthy("Connection failed");
        error!("Queue connection: unhealthy");
    }

    let store_healthy = store::health::check_connection(store).await;
    if store_healthy {
        health().store.set_healthy();
        info!(backend = store.backend(), "Store connection: healthy");
    } else {
        health().store.set_unhealthy("Connection failed");
        error!(backend = store.backend(), "Store connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
