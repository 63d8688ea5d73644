use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{DataError, DataResult};

/// Retry an operation with exponential backoff and jitter.
/// Only retryable errors (network, rate limit, 5xx, timeout) are retried;
/// everything else fails fast.
pub async fn retry_with_backoff<F, Fut, T>(operation: F, max_attempts: usize) -> DataResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DataResult<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(max_attempts);

    Retry::spawn(retry_strategy, || async {
        match operation().await {
            Ok(result) => Ok(result),
            Err(e) if e.is_retryable() => {
                tracing::warn!("Retryable error: {}", e);
                if let DataError::RateLimit { retry_after } = &e {
                    tokio::time::sleep(Duration::from_secs(*retry_after)).await;
                }
                Err(e)
            }
            Err(e) => {
                tracing::error!("Non-retryable error: {}", e);
                Err(e)
            }
        }
    })
    .await
}
