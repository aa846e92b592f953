//! Storage backends for tick persistence

pub mod postgres;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use postgres::{PgTickStore, PgTransaction};
pub use writer::{BatchError, BatchWriter};

/// Positional statement parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlValue {
    /// 64-bit integer column
    BigInt(i64),
    /// Timestamp with time zone column
    Timestamp(DateTime<Utc>),
    /// Double precision column
    Double(f64),
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver or database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration rejected before touching the database
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    /// Statement rejected by the store
    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// Transactional store the batch writer persists into
#[async_trait]
pub trait TickStore: Send + Sync + 'static {
    /// Transaction handle type
    type Transaction: StoreTransaction;

    /// Open a new transaction
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// Open store transaction
///
/// Dropping a transaction without calling `commit` must discard its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Validate and cache a statement for repeated execution
    async fn prepare(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Execute a statement with positional parameters, returning rows affected
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError>;

    /// Make every write of the transaction visible
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write of the transaction
    async fn rollback(self) -> Result<(), StoreError>;
}
