use std::future::Future;

use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryConfig;
use crate::Error;

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// configured number of attempts is used up. The delay doubles after each
/// retryable failure, capped at `max_delay`.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = config.base_delay();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < config.attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, config.attempts, e, delay
                );
                sleep(delay).await;
                delay = (delay * 2).min(config.max_delay());
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
