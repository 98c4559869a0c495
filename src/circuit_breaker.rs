//! Three-state circuit breaker guarding the spreadsheet backend.
//!
//! The breaker only gates admission: failures of the wrapped operation are
//! counted and handed back to the caller untouched. Leaving `Open` is decided
//! lazily on the next call, there is no background timer.

use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. Must be at least 1.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::milliseconds(60_000),
        }
    }
}

/// Read-only snapshot for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub is_open: bool,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit was open; the operation was never invoked.
    #[error("circuit breaker is open")]
    Open(CircuitStatus),
    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// The lock is released while the operation is in flight, so concurrent
    /// callers in `HalfOpen` may all be admitted; every outcome is still
    /// recorded as one atomic transition.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_admit().map_err(CircuitError::Open)?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitError::Operation(err))
            }
        }
    }

    /// Current state snapshot. Does not trigger the `Open -> HalfOpen` check.
    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        Self::snapshot(&inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn try_admit(&self) -> Result<(), CircuitStatus> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = self.clock.now();
        let elapsed_past_timeout = inner
            .last_failure_time
            .map(|last| now.signed_duration_since(last) > self.config.recovery_timeout)
            .unwrap_or(true);

        if elapsed_past_timeout {
            inner.state = CircuitState::HalfOpen;
            tracing::info!(breaker = %self.name, "circuit half-open, admitting trial call");
            Ok(())
        } else {
            tracing::debug!(breaker = %self.name, "circuit open, rejecting call");
            Err(Self::snapshot(&inner))
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "circuit closed after successful call");
        }
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(self.clock.now());

        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "circuit opened"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    fn snapshot(inner: &BreakerState) -> CircuitStatus {
        CircuitStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            is_open: inner.state == CircuitState::Open,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is always left consistent between statements, so a poisoned
        // lock is still safe to reuse.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(threshold: u32, timeout_ms: i64) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::default();
        let breaker = CircuitBreaker::new(
            "sheets",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::milliseconds(timeout_ms),
            },
            Arc::new(clock.clone()),
        );
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CircuitError<String>> {
        breaker
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom".to_string())
            })
            .await
    }

    async fn succeed(
        breaker: &CircuitBreaker,
        calls: &AtomicU32,
    ) -> Result<u32, CircuitError<String>> {
        breaker
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(7)
            })
            .await
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let (breaker, _) = breaker(5, 60_000);
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(status.last_failure_time.is_none());
        assert!(!status.is_open);
    }

    #[tokio::test]
    async fn test_operation_error_is_returned() {
        let (breaker, _) = breaker(5, 60_000);
        let calls = AtomicU32::new(0);
        match fail(&breaker, &calls).await {
            Err(CircuitError::Operation(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(breaker.status().failure_count, 1);
    }

    #[tokio::test]
    async fn test_opens_and_fails_fast() {
        let (breaker, clock) = breaker(2, 1000);
        let calls = AtomicU32::new(0);

        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_ms(500);
        assert!(matches!(succeed(&breaker, &calls).await, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Exactly at the timeout is still open.
        clock.advance_ms(500);
        assert!(matches!(succeed(&breaker, &calls).await, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.advance_ms(1);
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker(2, 1000);
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        clock.advance_ms(1001);

        assert!(matches!(fail(&breaker, &calls).await, Err(CircuitError::Operation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let status = breaker.status();
        assert!(status.is_open);
        assert_eq!(status.failure_count, 3);
        assert_eq!(status.last_failure_time, Some(clock.now()));

        assert!(matches!(succeed(&breaker, &calls).await, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_count() {
        let (breaker, _) = breaker(3, 1000);
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        succeed(&breaker, &calls).await.unwrap();
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 2);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = CircuitStatus {
            state: CircuitState::HalfOpen,
            failure_count: 1,
            last_failure_time: None,
            is_open: false,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "HALF_OPEN");
        assert_eq!(json["failureCount"], 1);
        assert_eq!(json["isOpen"], false);
        assert!(json["lastFailureTime"].is_null());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        const CALLERS: usize = 16;
        let (breaker, _) = breaker(3, 60_000);
        let breaker = Arc::new(breaker);
        // Hold every operation until all callers are admitted.
        let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let breaker = breaker.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    breaker
                        .execute(move || async move {
                            barrier.wait().await;
                            Err::<(), _>("boom".to_string())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Err(CircuitError::Operation(_))));
        }

        let status = breaker.status();
        assert_eq!(status.failure_count, CALLERS as u32);
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.is_open);
    }
}
