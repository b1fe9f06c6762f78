//! Bounded retries with exponential backoff for external calls.

use crate::config::RetryConfig;
use crate::error::{RuntimeError, ServiceError};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Run `call` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only [`ServiceError::Transient`] failures are retried. Each attempt and
/// each backoff sleep is raced against `cancel`; a cancelled call is
/// dropped and its result discarded.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            result = call() => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_transient() || attempt >= max_attempts {
            return Err(RuntimeError::ExternalCall {
                operation: operation.to_string(),
                attempts: attempt,
                message: error.to_string(),
            });
        }

        let delay = policy.backoff(attempt);
        warn!(operation, attempt, ?delay, %error, "external call failed, retrying");
        tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), &CancellationToken::new(), "fetch", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ServiceError::Transient("timeout".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&fast_policy(2), &CancellationToken::new(), "fetch", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Transient("timeout".into()))
            })
            .await;
        assert_eq!(
            result,
            Err(RuntimeError::ExternalCall {
                operation: "fetch".into(),
                attempts: 2,
                message: "transient failure: timeout".into(),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&fast_policy(5), &CancellationToken::new(), "post", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Rejected("403".into()))
            })
            .await;
        assert!(matches!(result, Err(RuntimeError::ExternalCall { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_retry(&fast_policy(3), &cancel, "slow", || async {
            std::future::pending::<Result<(), ServiceError>>().await
        })
        .await;
        assert_eq!(result, Err(RuntimeError::Cancelled));
    }
}
