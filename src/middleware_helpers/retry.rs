use crate::errors::ServiceError;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn from_app_config(cfg: &crate::config::AppConfig) -> Self {
        Self {
            max_attempts: cfg.transaction_max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.transaction_retry_base_delay_ms),
            ..Default::default()
        }
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries deadlocks, lock timeouts and other storage hiccups; business errors
/// such as insufficient stock are returned immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientStoragePolicy;

impl RetryPolicy<ServiceError> for TransientStoragePolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_transient()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if !policy.is_retryable(&error) {
                    return Err(error);
                }
                if attempts >= config.max_attempts {
                    warn!("Operation failed after {} attempts: {}", attempts, error);
                    return Err(error);
                }

                counter!("ortomediq.transaction.retries", 1);
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
