//! Feed lifecycle supervision
//!
//! Consumes [`FeedEvent`]s in order: re-subscribes on every connect before
//! accepting further ticks, forwards ticks to the pipeline and turns
//! reconnect exhaustion into a single fatal error.

use crate::feed::{FeedAdapter, FeedEvent, TickerFeed};
use crate::storage::TickStore;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Connection state as observed through feed events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet
    Disconnected,
    /// Waiting for the first connection
    Connecting,
    /// Connected and subscribed
    Connected,
    /// Waiting for a reconnect attempt
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
    },
    /// Reconnection exhausted; terminal
    GivenUp,
    /// Peer closed the connection
    Closed,
    /// Last event was a feed error
    Errored,
}

/// Supervisor errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorError {
    /// The feed stopped reconnecting
    #[error("feed reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Reconnect attempts made
        attempts: u32,
    },
}

/// Drives the feed adapter from lifecycle and tick events
#[derive(Debug)]
pub struct LifecycleSupervisor<F: TickerFeed, S: TickStore> {
    feed: F,
    adapter: FeedAdapter<S>,
    state: ConnectionState,
}

impl<F: TickerFeed, S: TickStore> LifecycleSupervisor<F, S> {
    /// Create a supervisor issuing subscriptions through `feed`
    pub fn new(feed: F, adapter: FeedAdapter<S>) -> Self {
        Self {
            feed,
            adapter,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current connection state
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Feed used for subscriptions
    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Adapter forwarding ticks into the pipeline
    pub fn adapter(&self) -> &FeedAdapter<S> {
        &self.adapter
    }

    /// Process one event
    ///
    /// Returns `ReconnectExhausted` for the first `GaveUp`; every event after
    /// that is ignored.
    pub async fn handle(&mut self, event: FeedEvent) -> Result<(), SupervisorError> {
        if self.state == ConnectionState::GivenUp {
            debug!("Ignoring feed event after give-up: {:?}", event);
            return Ok(());
        }

        let metrics = self.adapter.pipeline().metrics();
        match event {
            FeedEvent::Connected => {
                self.state = ConnectionState::Connected;
                self.adapter.on_connect(&self.feed).await;
            }
            FeedEvent::Tick(tick) => {
                if let Err(e) = self.adapter.on_tick(&tick).await {
                    warn!("Dropping tick for {}: {}", tick.instrument_token, e);
                }
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                self.state = ConnectionState::Reconnecting { attempt };
                metrics.feed_reconnects.inc();
                info!("Feed reconnecting: attempt {} in {:?}", attempt, delay);
            }
            FeedEvent::GaveUp { attempt } => {
                self.state = ConnectionState::GivenUp;
                error!(
                    "Feed gave up after {} reconnect attempts, {} records still buffered",
                    attempt,
                    self.adapter.pipeline().buffered()
                );
                return Err(SupervisorError::ReconnectExhausted { attempts: attempt });
            }
            FeedEvent::Closed { code, reason } => {
                self.state = ConnectionState::Closed;
                warn!(
                    "Feed closed ({} {}), {} records buffered",
                    code,
                    reason,
                    self.adapter.pipeline().buffered()
                );
            }
            FeedEvent::Error(reason) => {
                self.state = ConnectionState::Errored;
                metrics.feed_errors.inc();
                error!(
                    "Feed error: {}, {} records buffered",
                    reason,
                    self.adapter.pipeline().buffered()
                );
            }
        }

        Ok(())
    }

    /// Process events until the stream ends or the feed gives up
    pub async fn run(&mut self, mut events: mpsc::Receiver<FeedEvent>) -> Result<(), SupervisorError> {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }

        while let Some(event) = events.recv().await {
            self.handle(event).await?;
        }

        info!("Feed event stream ended");
        Ok(())
    }
}
