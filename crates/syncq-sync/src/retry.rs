//! Bounded exponential backoff for transport operations
//!
//! Only [`TransportError::Transient`] failures are retried. Attempt `n`
//! (1-based) that fails transiently is followed by a delay of
//! `base_delay * 2^(n-1)` before attempt `n + 1`, up to `max_attempts`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use syncq_core::config::RetryConfig;
use syncq_core::ports::TransportError;

/// Retry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// Delay before the attempt following failed attempt `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Final failure of a retried operation
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed transiently
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: TransportError,
    },

    /// A failure that retrying cannot fix
    #[error(transparent)]
    Failed(TransportError),
}

/// Runs `f` under `policy`
///
/// `on_retry(next_attempt, delay)` is called before each backoff sleep.
pub async fn with_retry<F, Fut, T, R>(
    policy: &RetryPolicy,
    operation: &str,
    mut on_retry: R,
    f: F,
) -> Result<T, RetryError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    R: FnMut(u32, Duration),
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                if attempt >= policy.max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                on_retry(attempt + 1, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(RetryError::Failed(err)),
        }
    }
}
