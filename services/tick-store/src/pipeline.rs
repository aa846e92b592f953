//! Tick pipeline: buffer, flush coordinator and metrics as one owned object
//!
//! Constructed once at startup and shared by reference with the feed side,
//! so several independent pipelines can run in one process.

use crate::buffer::{BufferError, TickBuffer};
use crate::config::PipelineConfig;
use crate::flush::{FlushCoordinator, FlushOutcome};
use crate::metrics::PipelineMetrics;
use crate::record::TickRecord;
use crate::storage::{BatchWriter, TickStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pipeline errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// The pipeline is shutting down and no longer accepts records
    #[error("pipeline is shut down")]
    Closed,
}

impl From<BufferError> for PipelineError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Closed => Self::Closed,
        }
    }
}

/// Counters describing the pipeline at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records currently buffered
    pub buffered: usize,
    /// Buffer capacity
    pub capacity: usize,
    /// Records accepted since startup
    pub enqueued: u64,
    /// Records committed since startup
    pub committed: u64,
    /// Records lost with failed batches since startup
    pub dropped: u64,
}

/// Ingestion pipeline from feed ticks to the store
#[derive(Debug)]
pub struct TickPipeline<S: TickStore> {
    buffer: Arc<TickBuffer>,
    coordinator: FlushCoordinator<S>,
    metrics: PipelineMetrics,
    config: PipelineConfig,
}

impl<S: TickStore> TickPipeline<S> {
    /// Build a pipeline writing into `table` of `store`
    pub fn new(store: S, table: &str, config: PipelineConfig, metrics: PipelineMetrics) -> Self {
        let buffer = Arc::new(TickBuffer::new(config.buffer_capacity()));
        let writer = BatchWriter::new(store, table, config.write_timeout());
        let coordinator = FlushCoordinator::new(
            Arc::clone(&buffer),
            writer,
            config.batch_threshold,
            metrics.clone(),
        );

        info!(
            "Tick pipeline ready: threshold {}, buffer capacity {}",
            coordinator.threshold(),
            buffer.capacity()
        );

        Self {
            buffer,
            coordinator,
            metrics,
            config,
        }
    }

    /// Enqueue a record and flush if the threshold is reached
    ///
    /// Suspends while the buffer is full. Batch write failures are handled
    /// by the coordinator and never surface here.
    pub async fn submit(&self, record: TickRecord) -> Result<(), PipelineError> {
        let occupancy = self.buffer.enqueue(record).await?;
        self.metrics.ticks_enqueued.inc();
        self.metrics
            .buffer_occupancy
            .set(i64::try_from(occupancy).unwrap_or(i64::MAX));

        self.coordinator.on_enqueued(occupancy).await;
        Ok(())
    }

    /// Records currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Shared buffer
    pub fn buffer(&self) -> &Arc<TickBuffer> {
        &self.buffer
    }

    /// Flush coordinator
    pub fn coordinator(&self) -> &FlushCoordinator<S> {
        &self.coordinator
    }

    /// Metric handles
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Persist everything currently buffered regardless of the threshold
    pub async fn flush_pending(&self) -> FlushOutcome {
        self.coordinator.flush_pending().await
    }

    /// Stop accepting records and persist what is still buffered
    pub async fn shutdown(&self) -> FlushOutcome {
        self.buffer.close();
        let outcome = self.coordinator.flush_pending().await;
        info!(
            "Pipeline shut down: flushed {} records in {} batches, {} dropped",
            outcome.records, outcome.batches, outcome.dropped_records
        );
        outcome
    }

    /// Snapshot of buffer and persistence counters
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            buffered: self.buffer.len(),
            capacity: self.buffer.capacity(),
            enqueued: self.metrics.ticks_enqueued.get(),
            committed: self.metrics.records_committed.get(),
            dropped: self.metrics.records_dropped.get(),
        }
    }
}

impl<S: TickStore> TickPipeline<S> {
    /// Flush below-threshold records on the configured interval
    ///
    /// Returns `None` when the interval is disabled. The task ends once
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_periodic_flush(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let period = self.config.flush_interval()?;
        let pipeline = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if pipeline.buffered() == 0 {
                            continue;
                        }
                        let outcome = pipeline.flush_pending().await;
                        if outcome.failed_batches > 0 {
                            warn!("Periodic flush dropped {} records", outcome.dropped_records);
                        } else if !outcome.is_empty() {
                            debug!("Periodic flush persisted {} records", outcome.records);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Periodic flush stopped");
                            break;
                        }
                    }
                }
            }
        }))
    }
}
