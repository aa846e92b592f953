//! Test helper functions and utilities

use std::time::Duration;
use tokio::time::{sleep, timeout};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialize test logging with environment-based configuration.
///
/// Writes through the test harness so output is captured per test.
/// Safe to call multiple times - subsequent calls are ignored.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for a condition to become true with timeout and polling.
///
/// Repeatedly evaluates `condition` until it returns true or the timeout
/// expires.
///
/// # Arguments
///
/// * `condition` - Predicate polled until it holds
/// * `timeout_duration` - Maximum time to wait for the condition
/// * `poll_interval` - Time to wait between condition checks
///
/// # Returns
///
/// Ok(()) if the condition becomes true, Err if the timeout expires
pub async fn wait_for<F>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> Result<()>
where
    F: Fn() -> bool,
{
    timeout(timeout_duration, async {
        loop {
            if condition() {
                return;
            }
            sleep(poll_interval).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Timeout waiting for condition"))
}

/// Wrap a future with a timeout so a stuck test fails instead of hanging.
///
/// # Arguments
///
/// * `duration` - Maximum time to wait for the future to complete
/// * `future` - The async operation to wrap
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl std::future::Future<Output = T>,
) -> Result<T> {
    timeout(duration, future)
        .await
        .map_err(|_| anyhow::anyhow!("Test timeout after {:?}", duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_for_succeeds_once_condition_holds() {
        let polls = AtomicUsize::new(0);
        let result = wait_for(
            || polls.fetch_add(1, Ordering::SeqCst) >= 2,
            Duration::from_secs(1),
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(10), sleep(Duration::from_secs(5))).await;
        assert!(result.is_err());
    }
}
