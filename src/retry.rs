//! Retry logic with exponential backoff
//!
//! Two kinds of retries share the same backoff curve:
//! - a failed conversion attempt is handed back to the queue and becomes
//!   claimable again after [`backoff_delay`];
//! - a store write that hits a transient error is repeated in place by
//!   [`with_retry`], so a finished conversion is not lost to a busy database.
//!
//! # Example
//!
//! ```no_run
//! use convertd::retry::{IsRetryable, with_retry};
//! use convertd::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, 3, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, busy database, tool temporarily unavailable) should return `true`.
/// Permanent failures (corrupt input, unsupported conversion) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => is_transient_io(e),
            Error::Sqlx(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
                sqlx::Error::Io(e) => is_transient_io(e),
                // SQLITE_BUSY / SQLITE_LOCKED surface as database errors
                sqlx::Error::Database(db) => {
                    let message = db.message();
                    message.contains("locked") || message.contains("busy")
                }
                _ => false,
            },
            Error::Config { .. }
            | Error::MissingInput(_)
            | Error::UnsupportedFormat { .. }
            | Error::PayloadTooLarge { .. }
            | Error::NotFound(_)
            | Error::NotReady { .. }
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

/// Delay before a task may be claimed again after failed attempt number `attempt`
///
/// `initial_delay * backoff_multiplier^(attempt - 1)`, capped by `max_delay`,
/// jittered when enabled. The cap also applies after jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let base = Duration::try_from_secs_f64(secs.max(0.0))
        .map_or(config.max_delay, |delay| delay.min(config.max_delay));

    let delay = if config.jitter { add_jitter(base) } else { base };
    delay.min(config.max_delay)
}

/// Execute an async operation, repeating it on retryable errors
///
/// Makes at most `max_attempts` calls, sleeping [`backoff_delay`] between them.
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 5), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 500), Duration::from_secs(10));
    }

    #[test]
    fn huge_exponent_saturates_at_max_delay() {
        let config = RetryConfig {
            backoff_multiplier: 10.0,
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 25), config.max_delay);

        let config = RetryConfig {
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 1000.0,
            jitter: true,
            ..RetryConfig::default()
        };
        for attempt in [9, 10, 400, u32::MAX] {
            assert!(backoff_delay(&config, attempt) <= config.max_delay);
        }
    }

    #[test]
    fn attempt_zero_uses_initial_delay() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 0), config.initial_delay);
    }

    #[test]
    fn jittered_backoff_never_exceeds_max_delay() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: true,
        };

        for attempt in 1..50 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay <= config.max_delay, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?} < {delay:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?} > 2x");
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn with_retry_recovers_from_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_config(), 3, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast_config(), 3, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_repeat_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast_config(), 5, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Permanent) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_io_errors_are_retryable() {
        for kind in [
            std::io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted,
            std::io::ErrorKind::ConnectionReset,
        ] {
            assert!(Error::Io(std::io::Error::new(kind, "x")).is_retryable());
        }
        assert!(
            !Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "x"))
                .is_retryable()
        );
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!Error::MissingInput("no file".into()).is_retryable());
        assert!(!Error::NotFound("task".into()).is_retryable());
        assert!(!Error::ShuttingDown.is_retryable());
        assert!(Error::Sqlx(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!Error::Sqlx(sqlx::Error::RowNotFound).is_retryable());
    }
}
