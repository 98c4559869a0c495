//! Retry with exponential backoff.
//!
//! The executor knows nothing about circuit state. It is meant to run inside
//! [`CircuitBreaker::execute`](crate::circuit_breaker::CircuitBreaker::execute)
//! so an open circuit short-circuits before the first attempt.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy: `attempts` tries separated by `base_delay * 2^(i-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Delay slept after the failed attempt number `attempt` (1-based).
    ///
    /// No jitter and no cap; saturates instead of overflowing.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// The error of the final attempt is returned unchanged. Sleeping goes
    /// through the tokio timer, so only the calling task is suspended.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    tracing::warn!(attempt, error = %err, "all retry attempts failed");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_after(64), Duration::MAX);
    }

    #[test]
    fn test_delay_keeps_doubling_until_saturated() {
        let policy = RetryPolicy::new(100, Duration::from_millis(1));
        assert_eq!(policy.delay_after(32), Duration::from_millis(1 << 31));
        assert_eq!(policy.delay_after(33), Duration::MAX);
        assert_eq!(policy.delay_after(40), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts_and_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();
        let calls = Mutex::new(Vec::new());

        let result: Result<(), String> = policy
            .run(|| {
                let elapsed = start.elapsed();
                let mut calls = calls.lock().unwrap();
                calls.push(elapsed);
                let n = calls.len();
                async move { Err(format!("failure {n}")) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        let calls = calls.into_inner().unwrap();
        assert_eq!(
            calls,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
            ]
        );
        // No sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_short_circuits() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let start = Instant::now();
        let mut calls = 0;

        let result: Result<&str, String> = policy
            .run(|| {
                calls += 1;
                let n = calls;
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100));
        let mut calls = 0;
        let result: Result<(), String> = policy
            .run(|| {
                calls += 1;
                async { Err("nope".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
