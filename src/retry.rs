//! Bounded retry for optimistic-concurrency conflicts.
//!
//! Every read-model mutation runs as a "load, transform, save" unit inside
//! [`execute_with_retry`]. When the store reports that a record changed
//! underneath us, the whole unit is rerun from a fresh read after a short
//! randomized pause, so contending writers fall out of lockstep. Any other
//! error ends the loop immediately.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::error::ValidationError;

/// How many times, and how patiently, a conflicting unit is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed part of the pause between attempts.
    pub base_backoff: Duration,
    /// Upper bound of the random part added to `base_backoff`.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_attempts` times without sleeping.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Validate the policy.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidField` if `max_attempts` is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid_field(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// The pause before the next attempt.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base_backoff;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.base_backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// A successful result and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    /// The operation's value.
    pub value: T,
    /// Attempts used, starting at 1.
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with a non-conflict error, or
/// `policy.max_attempts` attempts have failed with a conflict.
///
/// `is_conflict` decides which errors are worth retrying. On exhaustion the
/// last conflict error is returned unchanged, so the caller sees it as the
/// event's failure rather than a silent success.
///
/// # Errors
/// Returns the first non-conflict error, or the last conflict error once
/// attempts run out.
///
/// # Examples
///
/// ```
/// use trackgraph::retry::{execute_with_retry, RetryPolicy};
///
/// let mut calls = 0;
/// let outcome = execute_with_retry(
///     &RetryPolicy::immediate(3),
///     || {
///         calls += 1;
///         if calls < 2 { Err("conflict") } else { Ok(calls) }
///     },
///     |e| *e == "conflict",
/// )
/// .unwrap();
/// assert_eq!(outcome.value, 2);
/// assert_eq!(outcome.attempts, 2);
/// ```
pub fn execute_with_retry<T, E, F, C>(
    policy: &RetryPolicy,
    mut operation: F,
    is_conflict: C,
) -> Result<RetryOutcome<T>, E>
where
    F: FnMut() -> Result<T, E>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "succeeded after retry");
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) if is_conflict(&err) && attempt < max_attempts => {
                let pause = policy.backoff();
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "concurrent modification, retrying"
                );
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }
            }
            Err(err) => {
                if is_conflict(&err) {
                    error!(attempts = attempt, error = %err, "retries exhausted");
                }
                return Err(err);
            }
        }
    }
}
