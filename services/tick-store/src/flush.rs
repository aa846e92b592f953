//! Flush coordinator
//!
//! Decides when buffered records become a batch and guarantees that at most
//! one batch transaction runs at a time. Flush ownership is the lock around
//! the batch writer: the hot path claims it with `try_lock` and never waits,
//! pending and shutdown flushes wait for it.

use crate::buffer::TickBuffer;
use crate::metrics::PipelineMetrics;
use crate::record::TickRecord;
use crate::storage::{BatchWriter, TickStore};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Result of one or more flushes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Batches committed
    pub batches: usize,
    /// Records committed
    pub records: usize,
    /// Batches rolled back
    pub failed_batches: usize,
    /// Records lost with failed batches
    pub dropped_records: usize,
}

impl FlushOutcome {
    const fn committed(records: usize) -> Self {
        Self {
            batches: 1,
            records,
            failed_batches: 0,
            dropped_records: 0,
        }
    }

    const fn failed(records: usize) -> Self {
        Self {
            batches: 0,
            records: 0,
            failed_batches: 1,
            dropped_records: records,
        }
    }

    /// Whether any flush ran
    pub const fn is_empty(&self) -> bool {
        self.batches == 0 && self.failed_batches == 0
    }
}

impl AddAssign for FlushOutcome {
    fn add_assign(&mut self, other: Self) {
        self.batches += other.batches;
        self.records += other.records;
        self.failed_batches += other.failed_batches;
        self.dropped_records += other.dropped_records;
    }
}

/// Threshold-driven flush coordinator
#[derive(Debug)]
pub struct FlushCoordinator<S: TickStore> {
    buffer: Arc<TickBuffer>,
    writer: Mutex<BatchWriter<S>>,
    threshold: usize,
    metrics: PipelineMetrics,
}

impl<S: TickStore> FlushCoordinator<S> {
    /// Create a coordinator flushing `threshold` records per batch
    pub fn new(
        buffer: Arc<TickBuffer>,
        writer: BatchWriter<S>,
        threshold: usize,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            buffer,
            writer: Mutex::new(writer),
            threshold: threshold.max(1),
            metrics,
        }
    }

    /// Records per batch
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// React to an enqueue that left `occupancy` records buffered
    ///
    /// Flushes threshold-sized batches while the buffer stays at or above the
    /// threshold. If another flush owns the writer this returns immediately;
    /// the owner re-checks occupancy after releasing ownership, so no
    /// threshold crossing is missed.
    pub async fn on_enqueued(&self, occupancy: usize) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let mut occupancy = occupancy;

        while occupancy >= self.threshold {
            let Ok(writer) = self.writer.try_lock() else {
                debug!("Flush already in progress, {} records buffered", occupancy);
                break;
            };

            let batch = self.buffer.drain(self.threshold);
            if !batch.is_empty() {
                outcome += self.write_batch(&writer, batch).await;
            }
            drop(writer);

            occupancy = self.buffer.len();
        }

        outcome
    }

    /// Persist everything buffered right now, waiting for flush ownership
    ///
    /// Records enqueued while this runs are left for the next flush so a
    /// busy producer cannot keep it running forever.
    pub async fn flush_pending(&self) -> FlushOutcome {
        let writer = self.writer.lock().await;
        let mut outcome = FlushOutcome::default();
        let mut remaining = self.buffer.len();

        while remaining > 0 {
            let batch = self.buffer.drain(self.threshold.min(remaining));
            if batch.is_empty() {
                break;
            }
            remaining -= batch.len();
            outcome += self.write_batch(&writer, batch).await;
        }
        drop(writer);

        // Producers that crossed the threshold meanwhile found the writer busy.
        outcome += self.on_enqueued(self.buffer.len()).await;
        outcome
    }

    async fn write_batch(&self, writer: &BatchWriter<S>, batch: Vec<TickRecord>) -> FlushOutcome {
        self.metrics.buffer_occupancy.set(gauge_value(self.buffer.len()));
        let size = batch.len();
        let started = Instant::now();

        let mut in_flight = InFlightBatch::new(&self.metrics, &batch);
        let result = writer.write(&batch).await;
        in_flight.settle();
        self.metrics
            .flush_duration
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.batches_committed.inc();
                self.metrics.records_committed.inc_by(size as u64);
                debug!(
                    "Flushed {} ticks in {:?}",
                    size,
                    started.elapsed()
                );
                FlushOutcome::committed(size)
            }
            Err(e) => {
                // Failed batches are never requeued.
                record_dropped_batch(&self.metrics, e.stage(), &batch, &e);
                FlushOutcome::failed(size)
            }
        }
    }
}

/// Stage label for a batch whose flush was dropped before the write finished
pub const CANCELLED_STAGE: &str = "cancelled";

/// Batch drained from the buffer but not yet settled by the store
///
/// If the flush future is dropped mid-write the transaction rolls back and
/// the drained records are gone; dropping this guard unsettled reports them.
struct InFlightBatch<'a> {
    metrics: &'a PipelineMetrics,
    batch: &'a [TickRecord],
    settled: bool,
}

impl<'a> InFlightBatch<'a> {
    fn new(metrics: &'a PipelineMetrics, batch: &'a [TickRecord]) -> Self {
        Self {
            metrics,
            batch,
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if !self.settled {
            record_dropped_batch(
                self.metrics,
                CANCELLED_STAGE,
                self.batch,
                &"flush cancelled before the batch committed",
            );
        }
    }
}

fn record_dropped_batch(
    metrics: &PipelineMetrics,
    stage: &str,
    batch: &[TickRecord],
    reason: &dyn std::fmt::Display,
) {
    metrics.batches_failed.with_label_values(&[stage]).inc();
    metrics.records_dropped.inc_by(batch.len() as u64);

    let first = batch.first().map(TickRecord::observed_at);
    let last = batch.last().map(TickRecord::observed_at);
    error!(
        stage,
        batch_size = batch.len(),
        first_observed_at = ?first,
        last_observed_at = ?last,
        "Batch write failed, records dropped: {}",
        reason
    );
}

fn gauge_value(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
