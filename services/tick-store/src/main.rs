//! Tick Store Service
//!
//! Subscribes to the Kite ticker, buffers normalized ticks and persists them
//! to PostgreSQL in batched transactions. Exits non-zero when the feed gives
//! up reconnecting, after flushing what is still buffered.

use anyhow::{Context, Result};
use clap::Parser;
use services_common::init_tracing;
use std::path::PathBuf;
use std::sync::Arc;
use tick_store::feed::KiteTicker;
use tick_store::storage::PgTickStore;
use tick_store::{FeedAdapter, LifecycleSupervisor, PipelineMetrics, TickPipeline, TickStoreConfig};
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "tick-store";

/// Kite tick ingestion into PostgreSQL
#[derive(Parser, Debug)]
#[clap(name = "tick-store")]
#[clap(about = "Persist Kite ticker data in batched transactions")]
struct Cli {
    /// TOML configuration file
    #[clap(long, short, env = "TICK_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Kite API key
    #[clap(long, env = "KITE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Kite access token
    #[clap(long, env = "KITE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// PostgreSQL connection URL
    #[clap(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Instrument tokens to subscribe, comma separated
    #[clap(long, env = "KITE_INSTRUMENTS", value_delimiter = ',')]
    instruments: Vec<u32>,

    /// Records per batch transaction
    #[clap(long)]
    batch_threshold: Option<usize>,

    /// Target table
    #[clap(long)]
    table: Option<String>,

    /// Create the table and index on startup
    #[clap(long)]
    create_table: bool,
}

impl Cli {
    /// File configuration with environment and flag overrides applied
    fn load_config(&self) -> Result<TickStoreConfig> {
        let mut config = match &self.config {
            Some(path) => TickStoreConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => TickStoreConfig::default(),
        };

        if let Some(api_key) = &self.api_key {
            config.feed.api_key.clone_from(api_key);
        }
        if let Some(access_token) = &self.access_token {
            config.feed.access_token.clone_from(access_token);
        }
        if let Some(url) = &self.database_url {
            config.store.url.clone_from(url);
        }
        if !self.instruments.is_empty() {
            config.feed.instruments.clone_from(&self.instruments);
        }
        if let Some(threshold) = self.batch_threshold {
            config.pipeline.batch_threshold = threshold;
        }
        if let Some(table) = &self.table {
            config.store.table.clone_from(table);
        }
        if self.create_table {
            config.store.create_table = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing(SERVICE_NAME)?;

    let cli = Cli::parse();
    let config = cli.load_config()?;
    info!(
        "Starting {}: {} instruments in {} mode, table {}",
        SERVICE_NAME,
        config.feed.instruments.len(),
        config.feed.mode,
        config.store.table
    );

    let metrics = PipelineMetrics::new()?;
    let store = PgTickStore::connect(&config.store)
        .await
        .context("Failed to connect to the tick store")?;
    if config.store.create_table {
        store.ensure_schema(&config.store.table).await?;
    }

    let pipeline = Arc::new(TickPipeline::new(
        store,
        &config.store.table,
        config.pipeline.clone(),
        metrics.clone(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let periodic_flush = pipeline.spawn_periodic_flush(shutdown_rx);

    let (ticker, handle, events) = KiteTicker::new(config.feed.clone());
    let ticker_task = tokio::spawn(ticker.serve());

    let adapter = FeedAdapter::new(
        config.feed.instruments.clone(),
        config.feed.mode,
        Arc::clone(&pipeline),
    );
    let mut supervisor = LifecycleSupervisor::new(handle, adapter);

    let result = {
        let run = supervisor.run(events);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result.map_err(anyhow::Error::from),
            signal = tokio::signal::ctrl_c() => {
                let signal = signal.context("Failed to listen for shutdown signal");
                if signal.is_ok() {
                    info!("Shutdown signal received, draining feed events");
                }
                // Dropping the ticker closes the event stream; the supervisor
                // finishes the event in hand, including any inline flush.
                ticker_task.abort();
                let drained = run.await.map_err(anyhow::Error::from);
                signal.and(drained)
            }
        }
    };

    drop(supervisor);
    ticker_task.abort();

    let _ = shutdown_tx.send(true);
    if let Some(task) = periodic_flush {
        if let Err(e) = task.await {
            error!("Periodic flush task failed: {}", e);
        }
    }

    let outcome = pipeline.shutdown().await;
    if outcome.failed_batches > 0 {
        error!(
            "{} records lost in {} failed batches at shutdown",
            outcome.dropped_records, outcome.failed_batches
        );
    }
    info!("Final metrics:\n{}", metrics.render());

    result
}
