//! Bounded exponential backoff for database calls.

use crate::config::RetryConfig;
use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently a failed operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Timeout applied to every single attempt.
    pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error or the
/// retries are exhausted. Every attempt is bounded by the policy timeout.
///
/// The last error is returned unchanged. An attempt that timed out may
/// have been applied in part, so `op` must be safe to run again.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, context: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.operation_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                context: context.to_string(),
                seconds: policy.operation_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    context, e, retries, policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
