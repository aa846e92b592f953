//! Prometheus metrics for one tick pipeline
//!
//! Each pipeline owns its registry so independent pipelines (and tests) can
//! live in the same process without name collisions.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Pipeline metric handles
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Records accepted into the buffer
    pub ticks_enqueued: IntCounter,
    /// Records currently buffered
    pub buffer_occupancy: IntGauge,
    /// Batches committed to the store
    pub batches_committed: IntCounter,
    /// Records committed to the store
    pub records_committed: IntCounter,
    /// Failed batches by failing stage
    pub batches_failed: IntCounterVec,
    /// Records lost with failed batches
    pub records_dropped: IntCounter,
    /// Batch write latency
    pub flush_duration: Histogram,
    /// Feed reconnection attempts
    pub feed_reconnects: IntCounter,
    /// Feed error notifications
    pub feed_errors: IntCounter,
}

impl PipelineMetrics {
    /// Create and register all metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ticks_enqueued = IntCounter::new(
            "tick_store_ticks_enqueued_total",
            "Tick records accepted into the buffer",
        )?;
        let buffer_occupancy =
            IntGauge::new("tick_store_buffer_occupancy", "Tick records currently buffered")?;
        let batches_committed = IntCounter::new(
            "tick_store_batches_committed_total",
            "Batches committed to the store",
        )?;
        let records_committed = IntCounter::new(
            "tick_store_records_committed_total",
            "Tick records committed to the store",
        )?;
        let batches_failed = IntCounterVec::new(
            Opts::new("tick_store_batches_failed_total", "Batches rolled back"),
            &["stage"],
        )?;
        let records_dropped = IntCounter::new(
            "tick_store_records_dropped_total",
            "Tick records lost with failed batches",
        )?;
        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "tick_store_flush_duration_seconds",
                "Batch transaction latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        )?;
        let feed_reconnects = IntCounter::new(
            "tick_store_feed_reconnects_total",
            "Feed reconnection attempts",
        )?;
        let feed_errors =
            IntCounter::new("tick_store_feed_errors_total", "Feed error notifications")?;

        registry.register(Box::new(ticks_enqueued.clone()))?;
        registry.register(Box::new(buffer_occupancy.clone()))?;
        registry.register(Box::new(batches_committed.clone()))?;
        registry.register(Box::new(records_committed.clone()))?;
        registry.register(Box::new(batches_failed.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;
        registry.register(Box::new(feed_reconnects.clone()))?;
        registry.register(Box::new(feed_errors.clone()))?;

        Ok(Self {
            registry,
            ticks_enqueued,
            buffer_occupancy,
            batches_committed,
            records_committed,
            batches_failed,
            records_dropped,
            flush_duration,
            feed_reconnects,
            feed_errors,
        })
    }

    /// Prometheus text exposition of the registry
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        match encoder.encode(&self.registry.gather(), &mut buffer) {
            Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| "Error encoding metrics".to_string()),
            Err(_) => "Error gathering metrics".to_string(),
        }
    }
}
