//! Retry handling for store contention.
//!
//! `SQLite` reports `SQLITE_BUSY`/`SQLITE_LOCKED` when another connection
//! (usually another process) holds the write lock past `busy_timeout`. The
//! store maps those to [`Error::Contention`], and [`RetryPolicy::run`] retries
//! them with exponential backoff. Any other error is returned immediately.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential-backoff retry policy.
///
/// # Example
///
/// ```rust
/// use docanon::storage::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for_attempt(1), 50);
/// assert_eq!(policy.delay_for_attempt(2), 100);
/// assert_eq!(policy.delay_for_attempt(3), 200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Delay after the given 1-based attempt: `base_delay_ms * 2^(attempt - 1)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        self.base_delay_ms
            .saturating_mul(1 << (attempt - 1).min(10))
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error from `call`, or
    /// [`Error::Contention`] once every attempt hit contention.
    pub fn run<T, F>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match call() {
                Err(err) if err.is_retryable() => {
                    metrics::counter!(
                        "docanon_store_contention_total",
                        "operation" => operation
                    )
                    .increment(1);
                    if attempt == attempts {
                        break;
                    }
                    let delay_ms = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms,
                        "store is locked, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                },
                other => return other,
            }
        }

        tracing::error!(operation, attempts, "store stayed locked through every retry");
        Err(Error::Contention {
            operation: operation.to_string(),
            attempts,
        })
    }
}

/// Returns true for `SQLITE_BUSY` and `SQLITE_LOCKED`.
#[must_use]
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Converts a `rusqlite` error into the crate error for `operation`.
///
/// Lock errors become a single-attempt [`Error::Contention`] so that a
/// surrounding [`RetryPolicy`] retries them.
pub fn sql_error(operation: &str, err: &rusqlite::Error) -> Error {
    if is_busy(err) {
        Error::Contention {
            operation: operation.to_string(),
            attempts: 1,
        }
    } else {
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: err.to_string(),
        }
    }
}
