//! Tracing initialisation shared by service binaries

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with environment filter
///
/// Falls back to `<service>=info,sqlx=warn` when `RUST_LOG` is not set.
pub fn init_tracing(service_name: &str) -> Result<()> {
    let default_filter = format!("{}=info,sqlx=warn", service_name.replace('-', "_"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise tracing: {}", e))?;

    Ok(())
}
