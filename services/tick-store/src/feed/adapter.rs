//! Bridge from ticker feed callbacks to the tick pipeline

use super::{Mode, Tick, TickerFeed};
use crate::pipeline::{PipelineError, TickPipeline};
use crate::record::TickRecord;
use crate::storage::TickStore;
use std::sync::Arc;
use tracing::{error, info};

/// Subscribes on connect and forwards normalized ticks into the pipeline
#[derive(Debug)]
pub struct FeedAdapter<S: TickStore> {
    subscriptions: Vec<u32>,
    mode: Mode,
    pipeline: Arc<TickPipeline<S>>,
}

impl<S: TickStore> FeedAdapter<S> {
    /// Create an adapter for the given instruments and streaming mode
    pub fn new(subscriptions: Vec<u32>, mode: Mode, pipeline: Arc<TickPipeline<S>>) -> Self {
        Self {
            subscriptions,
            mode,
            pipeline,
        }
    }

    /// Instrument tokens subscribed on every connect
    pub fn subscriptions(&self) -> &[u32] {
        &self.subscriptions
    }

    /// Streaming mode requested on every connect
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Target pipeline
    pub fn pipeline(&self) -> &Arc<TickPipeline<S>> {
        &self.pipeline
    }

    /// Subscribe and set the mode on a fresh connection
    ///
    /// Failures are logged; the connection stays up and the next reconnect
    /// retries the subscription.
    pub async fn on_connect<F: TickerFeed + ?Sized>(&self, feed: &F) {
        if let Err(e) = feed.subscribe(&self.subscriptions).await {
            error!("Subscription to {} instruments failed: {}", self.subscriptions.len(), e);
            return;
        }
        if let Err(e) = feed.set_mode(self.mode, &self.subscriptions).await {
            error!("Setting {} mode failed: {}", self.mode, e);
            return;
        }
        info!(
            "Subscribed to {} instruments in {} mode",
            self.subscriptions.len(),
            self.mode
        );
    }

    /// Normalize a tick and submit it, suspending while the buffer is full
    pub async fn on_tick(&self, tick: &Tick) -> Result<(), PipelineError> {
        self.pipeline.submit(normalize(tick)).await
    }
}

/// Storage record for a tick
///
/// Uses the exchange timestamp, falling back to the local receive time for
/// modes that carry none.
pub fn normalize(tick: &Tick) -> TickRecord {
    TickRecord::new(
        tick.instrument_token,
        tick.exchange_timestamp.unwrap_or(tick.received_at),
        tick.last_price,
    )
}
