//! Shared constants and runtime helpers for the tick-store services

pub mod constants;
pub mod telemetry;

pub use constants::*;
pub use telemetry::init_tracing;
