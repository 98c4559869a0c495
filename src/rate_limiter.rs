use crate::clock::SharedClock;
use crate::rate_limit_config::RateLimitRule;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Fixed-window request counter, one bucket per key.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    scope: Arc<str>,
    rule: RateLimitRule,
    window: Duration,
    clock: SharedClock,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

#[derive(Clone, Debug)]
struct Bucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Admission result plus the values behind the `X-RateLimit-*` headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until `reset_at`, at least 1.
    pub retry_after: i64,
}

impl RateLimitDecision {
    /// Reset time as whole seconds since the epoch.
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = reset_at.signed_duration_since(now).num_milliseconds();
    ((millis + 999) / 1000).max(1)
}

impl RateLimiter {
    pub fn new(scope: impl Into<Arc<str>>, rule: RateLimitRule, clock: SharedClock) -> Self {
        let window = Duration::from_std(rule.window).unwrap_or_else(|_| Duration::days(36_500));
        Self {
            scope: scope.into(),
            rule,
            window,
            clock,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Count one request against `key` and decide whether it may proceed.
    ///
    /// Denied requests still count, so a client hammering a closed window
    /// keeps its count above the limit until the window resets.
    pub fn admit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let max = self.rule.max_requests;

        if !self.rule.enabled {
            return RateLimitDecision {
                allowed: true,
                limit: max,
                remaining: max,
                reset_at: now,
                retry_after: 1,
            };
        }

        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            count: 0,
            reset_at: now + self.window,
        });

        if now > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + self.window;
        }
        bucket.count = bucket.count.saturating_add(1);

        let allowed = bucket.count <= max;
        if !allowed {
            tracing::debug!(scope = %self.scope, key, count = bucket.count, "rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            limit: max,
            remaining: max.saturating_sub(bucket.count),
            reset_at: bucket.reset_at,
            retry_after: retry_after_secs(bucket.reset_at, now),
        }
    }

    /// Remove buckets whose window ended more than `grace` ago.
    pub fn sweep(&self, grace: Duration) -> usize {
        let now = self.clock.now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| match bucket.reset_at.checked_add_signed(grace) {
            Some(expires) => now <= expires,
            None => true,
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}
