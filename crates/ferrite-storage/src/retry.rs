//! Retry with exponential backoff for transient backend errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff policy: waits grow by `factor` from `base` up to
/// `max_attempts` total tries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_secs(1),
            factor: 2,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base * self.factor.saturating_pow(attempt)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or attempts run
/// out. Only rate-limit and server-side failures should report retryable.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: BackoffPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.delay(attempt);
                warn!("transient error (attempt {}): {}, retrying in {:?}", attempt + 1, err, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
