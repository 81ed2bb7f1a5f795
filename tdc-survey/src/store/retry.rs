//! Retry with exponential backoff for transient store failures
//!
//! **Backoff Strategy:**
//! - Initial delay: `initial_backoff` (default 100ms)
//! - Doubles after every failed attempt
//! - Capped at `max_backoff` (default 2s)
//!
//! Only errors classified as transient (network failures, rate limiting,
//! 5xx responses) are retried. Anything else is returned at once. Callers
//! doing non-idempotent writes narrow that to errors that prove nothing was
//! written (`with_retry_if`).

use std::future::Future;
use std::time::{Duration, Instant};
use tdc_common::config::RetryConfig;

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "append responses")
/// * `policy` - Attempt budget and backoff bounds
/// * `operation` - Async closure performing one attempt
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    with_retry_if(operation_name, policy, StoreError::is_transient, operation).await
}

/// Like [`with_retry`], but only errors accepted by `retryable` are retried
///
/// Appends pass [`StoreError::is_unsent`], so a write that may already have
/// landed is never sent twice.
pub async fn with_retry_if<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    retryable: fn(&StoreError) -> bool,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying store operation");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !retryable(&err) {
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Store operation failed: retry budget exhausted"
                    );
                    return Err(err);
                }

                let delay = backoff.min(policy.max_backoff);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient store failure, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}
