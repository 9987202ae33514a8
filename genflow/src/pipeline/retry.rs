//! Retry utilities for provider calls.
//!
//! Generation calls are retried with a constant delay and no jitter.

use crate::cancellation::CancellationToken;
use crate::errors::{GenflowError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::constant(3, Duration::from_secs(1))
    }
}

impl RetryConfig {
    /// A constant-delay policy; at least one attempt is always made.
    #[must_use]
    pub fn constant(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Returns true if an error is worth another attempt.
#[must_use]
pub fn is_retryable(err: &GenflowError) -> bool {
    !matches!(
        err,
        GenflowError::Cancelled(_) | GenflowError::Validation(_) | GenflowError::NotFound(_)
    )
}

/// Executes an operation with retry logic.
///
/// The operation receives the zero-based attempt number. Waiting between
/// attempts is interrupted by `cancel`. Provider errors returned after the
/// last attempt carry the attempt count.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    key: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        cancel.check()?;

        let err = match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= max_attempts || !is_retryable(&err) {
            return Err(match err {
                GenflowError::Provider(p) => GenflowError::Provider(p.with_attempts(attempt)),
                other => other,
            });
        }

        let delay = config.delay;
        debug!(
            key = %key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after error"
        );

        tokio::select! {
            () = cancel.cancelled() => cancel.check()?,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, ValidationError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_constant_config_makes_at_least_one_attempt() {
        let config = RetryConfig::constant(0, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay, Duration::from_millis(250));
        assert_eq!(RetryConfig::default().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let config = RetryConfig::constant(5, Duration::from_millis(1));
        let token = CancellationToken::new();

        let result = with_retry(&config, "gen", &token, |attempt| async move {
            if attempt < 2 {
                Err(GenflowError::from(ProviderError::new("fake", "busy")))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_records_attempts() {
        let config = RetryConfig::constant(3, Duration::from_millis(1));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let result: Result<()> = with_retry(&config, "gen", &token, move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(GenflowError::from(ProviderError::new("fake", "down")))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            GenflowError::Provider(p) => assert_eq!(p.attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let config = RetryConfig::constant(5, Duration::from_millis(1));
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<()> = with_retry(&config, "gen", &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenflowError::from(ValidationError::new("bad prompt"))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let config = RetryConfig::constant(3, Duration::from_secs(60));
        let token = Arc::new(CancellationToken::new());

        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            t.cancel("stop");
        });

        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            with_retry(&config, "gen", &token, |_| async {
                Err(GenflowError::from(ProviderError::new("fake", "down")))
            }),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(GenflowError::Cancelled(_))));
    }
}
