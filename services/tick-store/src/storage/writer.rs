//! All-or-nothing batch writer

use super::{SqlValue, StoreError, StoreTransaction, TickStore};
use crate::record::TickRecord;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Batch write failures, one variant per stage
#[derive(Debug, Error)]
pub enum BatchError {
    /// Nothing to write
    #[error("refusing to write an empty batch")]
    Empty,

    /// Transaction could not be opened
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] StoreError),

    /// Insert statement could not be prepared
    #[error("failed to prepare insert statement: {0}")]
    Prepare(#[source] StoreError),

    /// A row insert failed; the transaction was rolled back
    #[error("insert failed at row {row} of {size}: {source}")]
    Insert {
        /// Zero-based index of the failing row
        row: usize,
        /// Batch size
        size: usize,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Commit failed
    #[error("failed to commit batch: {0}")]
    Commit(#[source] StoreError),

    /// The transaction did not finish in time and was abandoned
    #[error("batch write timed out after {0:?}")]
    Timeout(Duration),
}

impl BatchError {
    /// Short stage label used in logs and metrics
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Begin(_) => "begin",
            Self::Prepare(_) => "prepare",
            Self::Insert { .. } => "insert",
            Self::Commit(_) => "commit",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Writes batches of tick records as single transactions
#[derive(Debug)]
pub struct BatchWriter<S: TickStore> {
    store: S,
    insert_sql: String,
    timeout: Duration,
}

impl<S: TickStore> BatchWriter<S> {
    /// Create a writer inserting into `table`
    ///
    /// The table name is interpolated into the statement; callers validate it
    /// (see `StoreConfig::validate`).
    pub fn new(store: S, table: &str, timeout: Duration) -> Self {
        Self {
            store,
            insert_sql: insert_statement(table),
            timeout,
        }
    }

    /// Persist `batch` atomically, in order
    pub async fn write(&self, batch: &[TickRecord]) -> Result<(), BatchError> {
        if batch.is_empty() {
            return Err(BatchError::Empty);
        }

        // On timeout the transaction future is dropped, which rolls it back.
        match tokio::time::timeout(self.timeout, self.write_transaction(batch)).await {
            Ok(result) => result,
            Err(_) => Err(BatchError::Timeout(self.timeout)),
        }
    }

    async fn write_transaction(&self, batch: &[TickRecord]) -> Result<(), BatchError> {
        let mut tx = self.store.begin().await.map_err(BatchError::Begin)?;

        if let Err(e) = tx.prepare(&self.insert_sql).await {
            abort(tx).await;
            return Err(BatchError::Prepare(e));
        }

        for (row, record) in batch.iter().enumerate() {
            if let Err(source) = tx.execute(&self.insert_sql, &bind_params(record)).await {
                abort(tx).await;
                return Err(BatchError::Insert {
                    row,
                    size: batch.len(),
                    source,
                });
            }
        }

        tx.commit().await.map_err(BatchError::Commit)?;

        debug!("Committed batch of {} ticks", batch.len());
        Ok(())
    }
}

/// Positional parameters for one record: `(instrument_id, observed_at, price)`
pub fn bind_params(record: &TickRecord) -> [SqlValue; 3] {
    [
        SqlValue::BigInt(i64::from(record.instrument_id())),
        SqlValue::Timestamp(record.observed_at()),
        SqlValue::Double(record.price()),
    ]
}

fn insert_statement(table: &str) -> String {
    format!("INSERT INTO {table} (instrument_id, observed_at, price) VALUES ($1, $2, $3)")
}

async fn abort<T: StoreTransaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed, transaction discarded on drop: {}", e);
    }
}
