use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-window limit for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
    pub enabled: bool,
}

/// Limits for every scope the gateway knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Applied to every route, keyed by client address.
    pub global: RateLimitRule,
    /// Applied additionally to operator routes.
    pub admin: RateLimitRule,
    /// Extra time an expired bucket is kept before it is swept.
    #[serde(with = "humantime_serde")]
    pub idle_grace: Duration,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(60_000),
            max_requests: 60,
            enabled: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: RateLimitRule::default(),
            admin: RateLimitRule::new(Duration::from_millis(60_000), 30),
            idle_grace: Duration::from_millis(60_000),
        }
    }
}

impl RateLimitRule {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            enabled: true,
        }
    }

    /// Create a rule that admits everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validate rule parameters
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_requests == 0 {
            return Err("Max requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("Window must be greater than 0".to_string());
        }
        Ok(())
    }
}
