//! Common constants used across all services
//!
//! Single source of truth for defaults that the services and their
//! configuration files fall back to.

/// Kite ticker connection constants
pub mod network {
    /// Kite ticker WebSocket endpoint
    pub const KITE_TICKER_URL: &str = "wss://ws.kite.trade";

    /// Maximum reconnection attempts before the feed gives up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Base reconnection backoff in milliseconds (doubled per attempt)
    pub const RECONNECT_BACKOFF_MS: u64 = 1000;

    /// Maximum backoff between reconnection attempts in seconds
    pub const MAX_RECONNECT_DELAY_SECS: u64 = 60;

    /// Default connection timeout in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 7;

    /// Seconds without any frame (heartbeats included) before the
    /// connection is considered dead
    pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;

    /// Event buffer size between the feed connection and its consumer
    pub const EVENT_BUFFER_SIZE: usize = 1000;
}

/// Tick pipeline constants
pub mod pipeline {
    /// Records per flush when nothing else is configured
    pub const DEFAULT_BATCH_THRESHOLD: usize = 1000;

    /// Buffer capacity as a multiple of the batch threshold
    pub const DEFAULT_BUFFER_MULTIPLIER: usize = 4;

    /// Largest buffer capacity (threshold times multiplier) accepted
    pub const MAX_BUFFER_CAPACITY: usize = 10_000_000;

    /// Upper bound for a single batch transaction in seconds
    pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

    /// Interval for flushing records below the threshold, 0 disables it
    pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
}

/// Storage constants
pub mod storage {
    /// Table ticks are written to
    pub const DEFAULT_TICK_TABLE: &str = "tickdata";

    /// Connection pool size
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

    /// Pool acquire timeout in seconds
    pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
}
