//! Bounded polling. The only retry loop in the crate.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Attempt budget for a single wait. Total wait is at most
/// `(max_attempts - 1) * delay` plus the fetch latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl PollPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Upper bound on time spent sleeping.
    pub fn budget(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

/// Result of a poll that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Reached(T),
    Exhausted { attempts: u32, last: T },
}

/// Fetch until `done` accepts the observed value or the budget runs out.
///
/// A zero `max_attempts` still fetches once. Errors from `fetch` abort the
/// wait immediately. No sleep follows the final attempt.
pub async fn poll_until<T, F, Fut, P>(
    policy: PollPolicy,
    mut fetch: F,
    mut done: P,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let observed = fetch().await?;

        if done(&observed) {
            return Ok(PollOutcome::Reached(observed));
        }

        if attempt >= max_attempts {
            return Ok(PollOutcome::Exhausted {
                attempts: attempt,
                last: observed,
            });
        }

        tracing::debug!(attempt, max_attempts, "target not reached, waiting");
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn returns_as_soon_as_target_is_seen() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = poll_until(
            PollPolicy::new(10, Duration::ZERO),
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| *n == 3,
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Reached(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_with_last_observation() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = poll_until(
            PollPolicy::new(4, Duration::ZERO),
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) },
            |_| false,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 4,
                last: 3
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_budget_still_fetches_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = poll_until(
            PollPolicy::new(0, Duration::from_secs(60)),
            move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) },
            |_| false,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_aborts_wait() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<PollOutcome<u32>> = poll_until(
            PollPolicy::new(5, Duration::ZERO),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Control("throttled".into()))
            },
            |_| true,
        )
        .await;

        assert!(matches!(result, Err(Error::Control(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_but_not_after_last() {
        let start = tokio::time::Instant::now();
        let outcome = poll_until(
            PollPolicy::new(3, Duration::from_secs(10)),
            || async { Ok(()) },
            |_| false,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn budget_counts_gaps_between_attempts() {
        assert_eq!(
            PollPolicy::new(30, Duration::from_secs(10)).budget(),
            Duration::from_secs(290)
        );
        assert_eq!(
            PollPolicy::new(0, Duration::from_secs(10)).budget(),
            Duration::ZERO
        );
    }
}
