//! Retry-with-backoff for fallible async operations.

use std::future::Future;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::error::AssistantError;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.  Zero behaves like one.
    pub max_retries: u32,
    /// Delay before attempt `n + 1` is `base_delay * n` (linear backoff).
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// Non-retryable errors are returned unchanged.  Exhaustion yields a
/// non-retryable `UNKNOWN_ERROR` wrapping the last failure.
pub async fn with_retry<T, F, Fut>(
    mut operation: F,
    context: &str,
    policy: RetryPolicy,
) -> Result<T, AssistantError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AssistantError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            log::debug!("queue: {context} failed with non-retryable {}", err.code);
            return Err(err);
        }

        if attempt >= attempts {
            log::warn!("queue: {context} failed after {attempts} attempts: {err}");
            return Err(AssistantError::unknown(format!(
                "Failed after {attempts} attempts: {}",
                err.message
            ))
            .with_retryable(false)
            .with_cause(err));
        }

        let delay = policy.delay_after(attempt);
        log::debug!("queue: {context} attempt {attempt} failed ({err}), retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AssistantError::network("reset"))
                } else {
                    Ok("done")
                }
            },
            "test",
            policy(),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AssistantError::validation("bad input"))
            },
            "test",
            policy(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AssistantError::service_unavailable("HTTP 503"))
            },
            "test",
            policy(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(!err.retryable);
        assert_eq!(err.message, "Failed after 3 attempts: HTTP 503");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_policy_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AssistantError::network("down"))
            },
            "test",
            RetryPolicy::none(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
