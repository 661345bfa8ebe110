//! Bounded polling used to wait for remote state to converge.
//!
//! Vendor APIs report progress asynchronously: a vApp gains its VM some time
//! after instantiation, an EC2 instance reaches `running` after a while, and
//! so on. [`retry_until`] re-evaluates an attempt at a fixed interval until it
//! yields a value, fails, or the attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and spacing for [`retry_until`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    limit: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing `limit` attempts spaced by `interval`.
    ///
    /// A zero `limit` is clamped to one: the condition is always checked at
    /// least once, so the policy equals `RetryPolicy::new(1, interval)`.
    #[must_use]
    pub const fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit: if limit == 0 { 1 } else { limit },
            interval,
        }
    }

    /// Total number of attempts that will be made. Never zero.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.limit
    }

    /// Pause between consecutive attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// Failure modes of [`retry_until`].
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt completed without producing a value.
    #[error("condition not met after {attempts} attempts spaced {interval:?} apart")]
    Exhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// Interval that separated the attempts.
        interval: Duration,
    },
    /// An attempt failed outright; polling stopped at that point.
    #[error(transparent)]
    Attempt(E),
}

/// Repeatedly evaluates `attempt` until it yields `Some(value)`.
///
/// `Ok(None)` means "not yet" and schedules another attempt after the policy
/// interval; the interval is only slept between attempts, never after the
/// last one. An `Err` short-circuits immediately.
///
/// # Errors
///
/// Returns [`RetryError::Attempt`] with the first error raised by `attempt`,
/// or [`RetryError::Exhausted`] when the budget is spent without a value.
pub async fn retry_until<T, E, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: std::error::Error + 'static,
{
    let attempts = policy.attempts();
    for current in 1..=attempts {
        if let Some(value) = attempt().await.map_err(RetryError::Attempt)? {
            return Ok(value);
        }
        if current < attempts {
            debug!(attempt = current, of = attempts, "condition not met yet; waiting");
            sleep(policy.interval).await;
        }
    }

    warn!(attempts, interval = ?policy.interval, "retry budget exhausted");
    Err(RetryError::Exhausted {
        attempts,
        interval: policy.interval,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io;

    use rstest::rstest;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_first_value_without_sleeping() {
        let started = Instant::now();
        let calls = Cell::new(0_u32);

        let value = retry_until(RetryPolicy::new(10, Duration::from_secs(10)), || {
            calls.set(calls.get() + 1);
            async { Ok::<_, io::Error>(Some("vm-1")) }
        })
        .await
        .unwrap_or_else(|err| panic!("retry should succeed: {err}"));

        assert_eq!(value, "vm-1");
        assert_eq!(calls.get(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_until_value_appears() {
        let started = Instant::now();
        let calls = Cell::new(0_u32);

        let value = retry_until(RetryPolicy::new(10, Duration::from_secs(10)), || {
            calls.set(calls.get() + 1);
            let ready = calls.get() == 3;
            async move { Ok::<_, io::Error>(ready.then_some(42)) }
        })
        .await
        .unwrap_or_else(|err| panic!("retry should succeed: {err}"));

        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[rstest]
    #[case::single(1, 1, 0)]
    #[case::zero_is_one(0, 1, 0)]
    #[case::ten(10, 10, 9)]
    #[tokio::test(start_paused = true)]
    async fn exhausts_budget(#[case] limit: u32, #[case] expected_calls: u32, #[case] sleeps: u64) {
        let started = Instant::now();
        let calls = Cell::new(0_u32);

        let err = retry_until(RetryPolicy::new(limit, Duration::from_secs(10)), || {
            calls.set(calls.get() + 1);
            async { Ok::<Option<()>, io::Error>(None) }
        })
        .await
        .expect_err("retry should exhaust");

        assert_eq!(calls.get(), expected_calls);
        assert_eq!(started.elapsed(), Duration::from_secs(10 * sleeps));
        match err {
            RetryError::Exhausted { attempts, interval } => {
                assert_eq!(attempts, expected_calls);
                assert_eq!(interval, Duration::from_secs(10));
            }
            RetryError::Attempt(other) => panic!("unexpected attempt error: {other}"),
        }
    }

    #[test]
    fn zero_limit_is_clamped_at_construction() {
        let policy = RetryPolicy::new(0, Duration::from_secs(3));
        assert_eq!(policy, RetryPolicy::new(1, Duration::from_secs(3)));
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.interval(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_attempt_error_immediately() {
        let calls = Cell::new(0_u32);

        let err = retry_until(RetryPolicy::new(5, Duration::from_secs(1)), || {
            calls.set(calls.get() + 1);
            async { Err::<Option<()>, _>(io::Error::other("api down")) }
        })
        .await
        .expect_err("attempt error should propagate");

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, RetryError::Attempt(ref inner) if inner.to_string() == "api down"));
    }
}
