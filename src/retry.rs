use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::connector::ConnectorError;
use crate::errors::{classify, Classification, ErrorKind};

/// A value produced after zero or more retries. `failed_attempts` and
/// `last_error` survive so recovered failures can still be recorded for
/// audit.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub failed_attempts: u32,
    pub last_error: Option<(Classification, String)>,
}

/// Terminal failure: either non-retryable, or retryable with attempts
/// exhausted.
#[derive(Debug)]
pub struct RetryError {
    pub error: ConnectorError,
    pub classification: Classification,
    pub attempts: u32,
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempts)", self.error, self.attempts)
    }
}

impl std::error::Error for RetryError {}

/// Total tries allowed for a failure class. `unknown` errors get a single
/// retry before turning terminal.
fn attempts_for(kind: ErrorKind, policy: &RetryPolicy) -> u32 {
    match kind {
        ErrorKind::Unknown => 2,
        _ => policy.max_attempts.max(1),
    }
}

/// Exponential backoff with optional jitter, honoring an upstream
/// `retry_after` hint when it is longer.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let mut delay = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(policy.max_delay);
    if policy.jitter && delay > Duration::ZERO {
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay += Duration::from_millis(jitter_ms);
    }
    match retry_after {
        Some(hint) if hint > delay => hint,
        _ => delay,
    }
}

/// Runs `op`, retrying retryable connector failures under `policy`. Each
/// retry sleeps the backoff delay; non-retryable failures and exhausted
/// retries return a [`RetryError`] carrying the attempt count.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<Attempted<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut attempt: u32 = 0;
    let mut last_error: Option<(Classification, String)> = None;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    failed_attempts: attempt - 1,
                    last_error,
                });
            }
            Err(error) => {
                let classification = classify(&error);
                if !classification.retryable {
                    return Err(RetryError {
                        error,
                        classification,
                        attempts: attempt,
                    });
                }
                let allowed = attempts_for(classification.kind, policy);
                if attempt >= allowed {
                    warn!(
                        kind = ?classification.kind,
                        attempts = attempt,
                        "retries exhausted: {error}"
                    );
                    return Err(RetryError {
                        error,
                        classification,
                        attempts: attempt,
                    });
                }

                let retry_after = match &error {
                    ConnectorError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let delay = backoff_delay(policy, attempt, retry_after);
                debug!(
                    kind = ?classification.kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff: {error}"
                );
                last_error = Some((classification, error.to_string()));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = quick_policy();
        assert_eq!(backoff_delay(&policy, 1, None), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2, None), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 3, None), Duration::from_millis(400));
        assert_eq!(backoff_delay(&policy, 10, None), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_hint_wins_when_longer() {
        let policy = quick_policy();
        let hint = Some(Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, 1, hint), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&quick_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ConnectorError::Network("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, 42);
        assert_eq!(result.failed_attempts, 2);
        assert!(result.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_then_fails() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&quick_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ConnectorError::Network("reset".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.classification.kind, ErrorKind::TransientNetwork);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&quick_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ConnectorError::Auth("revoked".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_errors_retry_once() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&quick_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ConnectorError::Upstream {
                    status: 418,
                    message: "teapot".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
    }
}
