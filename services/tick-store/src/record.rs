//! Normalized tick record persisted by the batch writer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized market event
///
/// Created by the feed adapter, consumed by exactly one batch write and then
/// discarded. Fields are read-only once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    instrument_id: u32,
    observed_at: DateTime<Utc>,
    price: f64,
}

impl TickRecord {
    /// Create a new record
    #[must_use]
    pub const fn new(instrument_id: u32, observed_at: DateTime<Utc>, price: f64) -> Self {
        Self {
            instrument_id,
            observed_at,
            price,
        }
    }

    /// Instrument token as reported by the feed
    #[must_use]
    pub const fn instrument_id(&self) -> u32 {
        self.instrument_id
    }

    /// Feed-reported time of the event
    #[must_use]
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Last traded price
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }
}
