use crate::config::Config;
use crate::error::GatewayError;
use crate::rate_limit_config::RateLimitRule;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the whole service configuration
    pub fn validate(config: &Config) -> Result<(), GatewayError> {
        Self::validate_circuit_breaker(config.failure_threshold, config.recovery_timeout_ms)?;
        Self::validate_retry(config.retry_attempts)?;

        let limits = config.rate_limits();
        Self::validate_rate_limit("global", &limits.global)?;
        Self::validate_rate_limit("admin", &limits.admin)?;

        Self::validate_audit(config.audit_log_max_size, config.audit_log_max_files)?;
        Self::validate_log_level(&config.log_level)?;

        if config.cleanup_interval_secs == 0 {
            return Err(GatewayError::Configuration(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates circuit breaker parameters
    pub fn validate_circuit_breaker(
        threshold: u32,
        recovery_timeout_ms: u64,
    ) -> Result<(), GatewayError> {
        if threshold == 0 {
            return Err(GatewayError::Configuration(
                "Failure threshold must be at least 1".to_string(),
            ));
        }
        if recovery_timeout_ms == 0 {
            return Err(GatewayError::Configuration(
                "Recovery timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_retry(attempts: u32) -> Result<(), GatewayError> {
        if attempts == 0 {
            return Err(GatewayError::Configuration(
                "Retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates rate limit parameters
    pub fn validate_rate_limit(scope: &str, rule: &RateLimitRule) -> Result<(), GatewayError> {
        rule.validate()
            .map_err(|e| GatewayError::Configuration(format!("{} rate limit: {}", scope, e)))
    }

    pub fn validate_audit(max_file_size: u64, max_files: usize) -> Result<(), GatewayError> {
        if max_file_size == 0 {
            return Err(GatewayError::Configuration(
                "Audit log max size must be greater than 0".to_string(),
            ));
        }
        if max_files == 0 {
            return Err(GatewayError::Configuration(
                "Audit log must keep at least one archive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<(), GatewayError> {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&level.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid
            )));
        }
        Ok(())
    }
}
