//! Composition root for guarded calls.
//!
//! A guarded call runs `breaker(retry(operation))` and then writes exactly one
//! audit entry, whatever the outcome. Rate limiting happens earlier, at the
//! HTTP layer, through the limiters owned here.

use crate::audit::{AuditLogger, AuditMetadata, AuditResult};
use crate::circuit_breaker::{CircuitBreaker, CircuitError, CircuitStatus};
use crate::clock::SharedClock;
use crate::error::{AuditError, GatewayError};
use crate::metrics::MetricsCollector;
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::retry::RetryPolicy;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;

/// Result of a guarded call plus the audit side channel.
///
/// `audit_error` is set when the audit entry could not be written. It is
/// reported separately and never replaces `outcome`.
#[derive(Debug)]
pub struct Guarded<T> {
    pub outcome: Result<T, GatewayError>,
    pub audit_error: Option<AuditError>,
}

impl<T> Guarded<T> {
    pub fn into_result(self) -> Result<T, GatewayError> {
        self.outcome
    }
}

/// The limiters a request passes through, in order.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub global: RateLimiter,
    pub admin: RateLimiter,
}

#[derive(Debug)]
pub struct Gateway {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    audit: AuditLogger,
    limiters: Limiters,
    metrics: MetricsCollector,
    clock: SharedClock,
}

impl Gateway {
    pub fn new(
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        audit: AuditLogger,
        limiters: Limiters,
        clock: SharedClock,
    ) -> Self {
        Self {
            breaker,
            retry,
            audit,
            limiters,
            metrics: MetricsCollector::new(),
            clock,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn limiters(&self) -> &Limiters {
        &self.limiters
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Pass `key` through each limiter in turn; the first denial wins.
    ///
    /// Returns the decision of the last limiter consulted so callers can emit
    /// rate-limit headers for the tightest scope that was checked.
    pub fn admit(
        &self,
        limiters: &[&RateLimiter],
        key: &str,
    ) -> Result<Option<RateLimitDecision>, GatewayError> {
        let mut last = None;
        for limiter in limiters {
            let decision = limiter.admit(key);
            if !decision.allowed {
                return Err(GatewayError::RateLimited(decision));
            }
            last = Some(decision);
        }
        Ok(last)
    }

    /// Run `operation` behind the breaker with retries and audit the result.
    ///
    /// The audit payload records `payload`; on success the operation's value
    /// is stored as the audit detail.
    pub async fn execute<F, Fut, T, E>(
        &self,
        action: &str,
        payload: Value,
        metadata: AuditMetadata,
        operation: F,
    ) -> Guarded<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let retry = self.retry;
        let outcome = self
            .breaker
            .execute(|| retry.run(operation))
            .await
            .map_err(|err| match err {
                CircuitError::Open(status) => GatewayError::CircuitOpen(status),
                CircuitError::Operation(e) => GatewayError::ExternalFailure(e.to_string()),
            });

        let audit_result = match &outcome {
            Ok(value) => AuditResult::success(serde_json::to_value(value).unwrap_or(Value::Null)),
            Err(err) => AuditResult::failure(err.to_string()),
        };

        let audit_error = match self.audit.record(action, payload, audit_result, metadata).await {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(
                    target: "sheetguard::audit",
                    action,
                    error = %e,
                    "audit log unavailable"
                );
                Some(e)
            }
        };

        self.metrics
            .record_outcome(action, &outcome, audit_error.is_some())
            .await;

        Guarded {
            outcome,
            audit_error,
        }
    }
}
