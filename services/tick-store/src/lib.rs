//! Tick Store Service
//!
//! Streams Kite ticker events into a bounded in-memory buffer and persists
//! them to PostgreSQL in batched transactions:
//! - Feed adapter and lifecycle supervisor for the ticker connection
//! - Bounded FIFO buffer with producer backpressure
//! - Threshold-driven flush coordinator with exclusive flush ownership
//! - All-or-nothing batch writer over a transactional store

pub mod buffer;
pub mod config;
pub mod feed;
pub mod flush;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod storage;
pub mod supervisor;

pub use buffer::{BufferError, TickBuffer};
pub use config::{ConfigError, FeedConfig, PipelineConfig, StoreConfig, TickStoreConfig};
pub use feed::{FeedAdapter, FeedError, FeedEvent, Mode, Tick, TickerFeed};
pub use flush::{FlushCoordinator, FlushOutcome};
pub use metrics::PipelineMetrics;
pub use pipeline::{PipelineError, PipelineStats, TickPipeline};
pub use record::TickRecord;
pub use storage::{BatchError, BatchWriter, SqlValue, StoreError, StoreTransaction, TickStore};
pub use supervisor::{ConnectionState, LifecycleSupervisor, SupervisorError};
