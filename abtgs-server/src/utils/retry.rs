//! Stage Retry Logic
//!
//! Exponential backoff for transient network and storage failures. Permanent
//! failures are returned on the first attempt.
//!
//! **Backoff Strategy:**
//! - Initial delay: 200ms
//! - Multiplier: 2.0 (exponential)
//! - Max delay: 5000ms
//! - Max attempts: 3 (including the first)

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::adapters::{StageError, StageResult};

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Retry a stage operation while it fails transiently
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "acquire", "upload")
/// * `policy` - Attempt limit and backoff
/// * `operation` - Async closure performing one attempt
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> StageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StageResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Transient failure persisted, giving up"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
fn transient_storage(message: impl Into<String>) -> StageError {
    StageError::Storage {
        message: message.into(),
        transient: true,
    }
}
