//! Ticker feed types and the Kite WebSocket client
//!
//! The pipeline only relies on [`TickerFeed`] for subscriptions and on a
//! stream of [`FeedEvent`] values for ticks and connection lifecycle.

pub mod adapter;
pub mod kite;
pub mod packet;
pub mod reconnect;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use adapter::FeedAdapter;
pub use kite::{KiteTicker, KiteTickerHandle};
pub use reconnect::ReconnectPolicy;

/// Streaming mode requested per instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Last traded price only
    Ltp,
    /// Price, volume and OHLC
    Quote,
    /// Quote plus timestamps and five-level depth
    Full,
}

impl Mode {
    /// Wire name used in mode requests
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session open/high/low/close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ohlc {
    /// Opening price
    pub open: f64,
    /// Session high
    pub high: f64,
    /// Session low
    pub low: f64,
    /// Previous close
    pub close: f64,
}

/// One side's price level in the market depth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthLevel {
    /// Quantity at this level
    pub quantity: u32,
    /// Price of this level
    pub price: f64,
    /// Number of orders at this level
    pub orders: u16,
}

/// Five-level market depth
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Depth {
    /// Bid levels, best first
    pub buy: Vec<DepthLevel>,
    /// Ask levels, best first
    pub sell: Vec<DepthLevel>,
}

/// Decoded ticker packet
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Instrument token
    pub instrument_token: u32,
    /// Mode the packet was sent in
    pub mode: Mode,
    /// False for indices
    pub tradable: bool,
    /// Last traded price
    pub last_price: f64,
    /// Last traded quantity (quote and full)
    pub last_traded_quantity: u32,
    /// Average traded price (quote and full)
    pub average_price: f64,
    /// Volume traded for the day (quote and full)
    pub volume: u32,
    /// Total pending buy quantity (quote and full)
    pub total_buy_quantity: u32,
    /// Total pending sell quantity (quote and full)
    pub total_sell_quantity: u32,
    /// Session OHLC (quote and full)
    pub ohlc: Option<Ohlc>,
    /// Time of the last trade (full)
    pub last_trade_time: Option<DateTime<Utc>>,
    /// Exchange timestamp (full)
    pub exchange_timestamp: Option<DateTime<Utc>>,
    /// Market depth (full)
    pub depth: Option<Depth>,
    /// Local receive time of the frame carrying this tick
    pub received_at: DateTime<Utc>,
}

/// Notification from the feed connection
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Connection established and ready for subscriptions
    Connected,
    /// Market data tick
    Tick(Tick),
    /// Reconnection attempt scheduled after `delay`
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Wait before the attempt
        delay: Duration,
    },
    /// Reconnection attempts exhausted; the feed has stopped
    GaveUp {
        /// Failed attempts made
        attempt: u32,
    },
    /// Connection closed
    Closed {
        /// WebSocket close code
        code: u16,
        /// Close reason sent by the peer
        reason: String,
    },
    /// Transient error reported by the feed
    Error(String),
}

/// Feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// The connection task is gone
    #[error("feed connection task has stopped")]
    Stopped,

    /// No answer from the connection task
    #[error("feed connection dropped the request")]
    NoReply,

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed feed URL
    #[error("invalid feed url: {0}")]
    Url(#[from] url::ParseError),

    /// Request could not be encoded
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Handshake did not complete in time
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No frame received within the read timeout
    #[error("no data received for {0:?}")]
    Stalled(Duration),

    /// Request rejected by a feed implementation
    #[error("feed request rejected: {0}")]
    Rejected(String),
}

/// Subscription surface of a ticker feed
#[async_trait]
pub trait TickerFeed: Send + Sync {
    /// Subscribe to instrument tokens
    async fn subscribe(&self, tokens: &[u32]) -> Result<(), FeedError>;

    /// Set the streaming mode for instrument tokens
    async fn set_mode(&self, mode: Mode, tokens: &[u32]) -> Result<(), FeedError>;
}
