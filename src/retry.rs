//! Per-record bounded retry with a constant backoff.
//!
//! The retry budget belongs to a single call of [`RetryPolicy::run`]: every
//! record starts again from its first attempt, so one record that exhausted its
//! attempts never shortens the budget of the next one.

use serde::Serialize;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Errors that can tell whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Fixed number of attempts with a fixed sleep between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between two consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

/// The last error of an operation that ran out of attempts.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub source: E,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the attempts
    /// are used up. `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last error together with the number of attempts made.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= max_attempts || !source.is_retryable() => {
                    return Err(Exhausted {
                        attempts: attempt,
                        source,
                    });
                }
                Err(_) => {
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("store said no (fatal: {0})")]
    struct Fatal(bool);

    impl Retryable for Fatal {
        fn is_retryable(&self) -> bool {
            !self.0
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let result = policy.run(|attempt| if attempt < 3 { Err(Fatal(false)) } else { Ok(attempt) });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn stops_at_max_attempts() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let err = policy
            .run(|_| -> Result<(), _> {
                calls += 1;
                Err(Fatal(false))
            })
            .unwrap_err();
        assert_eq!(calls, 5);
        assert_eq!(err.attempts, 5);
    }

    #[test]
    fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let err = policy.run(|_| -> Result<(), _> { Err(Fatal(true)) }).unwrap_err();
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn exhausted_error_reports_attempts_and_cause() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy.run(|_| -> Result<(), _> { Err(Fatal(false)) }).unwrap_err();
        assert_eq!(
            err.to_string(),
            "gave up after 2 attempt(s): store said no (fatal: false)"
        );
        let cause = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("store said no (fatal: false)"));
    }
}
