//! Test utilities for the tick store workspace
//!
//! - Mock transactional store and ticker feed
//! - Record, tick and Kite packet factories
//! - Logging and polling helpers

pub mod helpers;

pub use factories::*;
pub use mocks::*;
pub use helpers::*;
