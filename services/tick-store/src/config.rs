//! Tick store configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment
//! and command line by the binary.

use crate::feed::Mode;
use crate::storage::postgres::is_valid_identifier;
use serde::{Deserialize, Serialize};
use services_common::constants::{network, pipeline, storage};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid setting
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TickStoreConfig {
    /// Ticker feed settings
    pub feed: FeedConfig,
    /// Persistent store settings
    pub store: StoreConfig,
    /// Buffering and flush policy
    pub pipeline: PipelineConfig,
}

/// Ticker feed configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Ticker WebSocket base URL
    pub url: String,
    /// Kite Connect API key
    pub api_key: String,
    /// Session access token
    pub access_token: String,
    /// Instrument tokens to subscribe to
    pub instruments: Vec<u32>,
    /// Streaming mode requested for every instrument
    pub mode: Mode,
    /// Consecutive failed reconnects before giving up
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds, doubled per attempt
    pub reconnect_base_delay_ms: u64,
    /// Cap on the reconnect delay in seconds
    pub reconnect_max_delay_secs: u64,
    /// WebSocket handshake timeout in seconds
    pub connect_timeout_secs: u64,
    /// Silence after which the connection is considered dead, in seconds
    pub read_timeout_secs: u64,
    /// Capacity of the feed event channel
    pub event_buffer: usize,
}

// Credentials stay out of logs.
impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("instruments", &self.instruments)
            .field("mode", &self.mode)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_base_delay_ms", &self.reconnect_base_delay_ms)
            .field("reconnect_max_delay_secs", &self.reconnect_max_delay_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

/// Persistent store configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Table ticks are inserted into
    pub table: String,
    /// Connection pool size
    pub max_connections: u32,
    /// Pool acquire timeout in seconds
    pub acquire_timeout_secs: u64,
    /// Create the table on startup if missing
    pub create_table: bool,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &"<redacted>")
            .field("table", &self.table)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("create_table", &self.create_table)
            .finish()
    }
}

/// Buffering and flush policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffered record count that triggers a flush
    pub batch_threshold: usize,
    /// Buffer capacity as a multiple of the threshold
    pub buffer_multiplier: usize,
    /// Upper bound for a batch transaction in seconds
    pub write_timeout_secs: u64,
    /// Interval for flushing records below the threshold, 0 disables it
    pub flush_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: network::KITE_TICKER_URL.to_string(),
            api_key: String::new(),
            access_token: String::new(),
            instruments: Vec::new(),
            mode: Mode::Full,
            max_reconnect_attempts: network::MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: network::RECONNECT_BACKOFF_MS,
            reconnect_max_delay_secs: network::MAX_RECONNECT_DELAY_SECS,
            connect_timeout_secs: network::DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: network::DEFAULT_READ_TIMEOUT_SECS,
            event_buffer: network::EVENT_BUFFER_SIZE,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/ticks".to_string(),
            table: storage::DEFAULT_TICK_TABLE.to_string(),
            max_connections: storage::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: storage::DEFAULT_ACQUIRE_TIMEOUT_SECS,
            create_table: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_threshold: pipeline::DEFAULT_BATCH_THRESHOLD,
            buffer_multiplier: pipeline::DEFAULT_BUFFER_MULTIPLIER,
            write_timeout_secs: pipeline::DEFAULT_WRITE_TIMEOUT_SECS,
            flush_interval_secs: pipeline::DEFAULT_FLUSH_INTERVAL_SECS,
        }
    }
}

impl TickStoreConfig {
    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feed.validate()?;
        self.store.validate()?;
        self.pipeline.validate()
    }
}

impl FeedConfig {
    /// Reject settings the ticker cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() || self.access_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "feed api_key and access_token are required".to_string(),
            ));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one instrument token must be configured".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("feed event_buffer must be > 0".to_string()));
        }
        if self.read_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed timeouts must be at least one second".to_string(),
            ));
        }
        url::Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("feed url {}: {}", self.url, e)))?;
        Ok(())
    }

    /// Base reconnect delay
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reconnect delay cap
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    /// Handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read inactivity timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl StoreConfig {
    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("store url is required".to_string()));
        }
        if !is_valid_identifier(&self.table) {
            return Err(ConfigError::Invalid(format!(
                "store table {:?} is not a plain SQL identifier",
                self.table
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("store max_connections must be > 0".to_string()));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_threshold == 0 {
            return Err(ConfigError::Invalid("batch_threshold must be > 0".to_string()));
        }
        if self.buffer_multiplier == 0 {
            return Err(ConfigError::Invalid("buffer_multiplier must be > 0".to_string()));
        }
        let capacity = self.batch_threshold.checked_mul(self.buffer_multiplier);
        if capacity.is_none_or(|c| c > pipeline::MAX_BUFFER_CAPACITY) {
            return Err(ConfigError::Invalid(format!(
                "batch_threshold * buffer_multiplier must not exceed {}",
                pipeline::MAX_BUFFER_CAPACITY
            )));
        }
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid("write_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Buffer capacity derived from the threshold
    pub fn buffer_capacity(&self) -> usize {
        self.batch_threshold.saturating_mul(self.buffer_multiplier).max(1)
    }

    /// Batch transaction timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Periodic flush interval, `None` when disabled
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}
