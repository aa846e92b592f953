//! `PostgreSQL` tick store
//!
//! Thin transactional wrapper over an `sqlx` pool. Statements are cached per
//! connection by `sqlx`, so `prepare` only validates the statement once per
//! transaction before the row inserts run.

use super::{SqlValue, StoreError, StoreTransaction, TickStore};
use crate::config::StoreConfig;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use tracing::info;

/// Tick store backed by a `PostgreSQL` connection pool
#[derive(Debug, Clone)]
pub struct PgTickStore {
    pool: PgPool,
}

impl PgTickStore {
    /// Connect using the store configuration
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            "Connected to tick store with {} max connections",
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// Create the tick table and its lookup index if missing
    ///
    /// The index is not unique; duplicate rows are accepted.
    pub async fn ensure_schema(&self, table: &str) -> Result<(), StoreError> {
        if !is_valid_identifier(table) {
            return Err(StoreError::InvalidConfig(format!(
                "invalid table name: {table}"
            )));
        }

        let create_table = format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                instrument_id BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL,
                price DOUBLE PRECISION NOT NULL
            )
            "
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_instrument_time_idx ON {table} (instrument_id, observed_at)"
        );

        sqlx::query(&create_table).execute(&self.pool).await?;
        sqlx::query(&create_index).execute(&self.pool).await?;

        info!("Tick table {} ready", table);
        Ok(())
    }
}

#[async_trait]
impl TickStore for PgTickStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { tx })
    }
}

/// Open `PostgreSQL` transaction; rolled back by `sqlx` when dropped
#[derive(Debug)]
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn prepare(&mut self, sql: &str) -> Result<(), StoreError> {
        (&mut *self.tx).prepare(sql).await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match *param {
                SqlValue::BigInt(v) => query.bind(v),
                SqlValue::Timestamp(ts) => query.bind(ts),
                SqlValue::Double(v) => query.bind(v),
            };
        }

        let result = query.execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Whether `name` is safe to interpolate as a SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
