//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient step failures.
//! It implements exponential backoff with optional jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use newsletter_scheduler::retry::{IsRetryable, with_retry};
//! use newsletter_scheduler::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
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
//! let result = with_retry(&config, |_attempt| async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DeliveryError, Error, StepError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, rate limiting, upstream 5xx) should return `true`.
/// Permanent failures (missing credentials, empty model output, bad input) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| is_transient_status(s.as_u16()))
            }
            Error::Upstream { status, .. } => is_transient_status(*status),
            Error::Delivery(DeliveryError::Rejected { status, .. }) => {
                is_transient_status(*status)
            }
            // Credentials will not appear between attempts
            Error::Delivery(DeliveryError::MissingConfiguration { .. }) => false,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // SQLite busy/locked under concurrent writers
            Error::Sqlx(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("locked") || msg.contains("busy")
            }
            Error::Sqlx(sqlx::Error::PoolTimedOut) => true,
            Error::Sqlx(_) | Error::Database(_) => false,
            Error::EmptySummary => false,
            Error::Config { .. } => false,
            Error::InvalidEvent(_) => false,
            Error::NotFound(_) => false,
            Error::RunNotDue { .. } => false,
            Error::Serialization(_) => false,
            Error::ShuttingDown => false,
            Error::ApiServerError(_) => false,
            Error::Other(_) => false,
        }
    }
}

impl IsRetryable for StepError {
    fn is_retryable(&self) -> bool {
        match self {
            StepError::Failed(e) => e.is_retryable(),
            StepError::Skip { .. } | StepError::DuplicateStep(_) | StepError::Fatal(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation` receives the 1-based attempt number. At most `config.max_attempts`
/// attempts are made in total (a value of 0 still allows one attempt); non-retryable
/// errors are returned immediately.
///
/// # Example
///
/// ```no_run
/// use newsletter_scheduler::retry::with_retry;
/// use newsletter_scheduler::config::RetryConfig;
/// use newsletter_scheduler::error::Error;
///
/// # async fn example() -> Result<(), Error> {
/// let config = RetryConfig::default();
/// let result = with_retry(&config, |attempt| async move {
///     tracing::debug!(attempt, "calling upstream");
///     Ok::<String, Error>("success".to_string())
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(
                        error = %e,
                        attempt = attempt,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Whether a failure on `attempt` will be followed by another attempt
pub(crate) fn will_retry<E: IsRetryable>(config: &RetryConfig, error: &E, attempt: u32) -> bool {
    error.is_retryable() && attempt < config.max_attempts.max(1)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
