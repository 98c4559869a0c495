use crate::audit::{AuditConfig, RotationPolicy, DEFAULT_FILE_NAME};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limit_config::{RateLimitConfig, RateLimitRule};
use crate::retry::RetryPolicy;
use envconfig::Envconfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Log level for the crate's own targets
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Directory holding the audit log and its archives
    #[envconfig(from = "LOG_DIR", default = "logs")]
    pub log_dir: PathBuf,

    /// Directory the emulated sheets write to
    #[envconfig(from = "DATA_DIR", default = "data")]
    pub data_dir: PathBuf,

    #[envconfig(from = "CIRCUIT_BREAKER_FAILURE_THRESHOLD", default = "5")]
    pub failure_threshold: u32,

    #[envconfig(from = "CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS", default = "60000")]
    pub recovery_timeout_ms: u64,

    #[envconfig(from = "RETRY_ATTEMPTS", default = "3")]
    pub retry_attempts: u32,

    #[envconfig(from = "RETRY_BASE_DELAY_MS", default = "500")]
    pub retry_base_delay_ms: u64,

    #[envconfig(from = "RATE_LIMIT_WINDOW_MS", default = "60000")]
    pub rate_limit_window_ms: u64,

    /// Requests per window per client on every route
    #[envconfig(from = "RATE_LIMIT_MAX_REQUESTS", default = "60")]
    pub rate_limit_max_requests: u32,

    /// Requests per window per client on operator routes
    #[envconfig(from = "ADMIN_RATE_LIMIT_MAX_REQUESTS", default = "30")]
    pub admin_rate_limit_max_requests: u32,

    #[envconfig(from = "RATE_LIMIT_ENABLED", default = "true")]
    pub rate_limit_enabled: bool,

    /// Key clients on `X-Forwarded-For`/`X-Real-IP` instead of the peer
    /// address. Only safe behind a proxy that overwrites those headers.
    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "false")]
    pub trust_proxy_headers: bool,

    /// Rotate the audit log once it is larger than this many bytes
    #[envconfig(from = "AUDIT_LOG_MAX_SIZE", default = "10485760")]
    pub audit_log_max_size: u64,

    /// Archived audit logs to keep
    #[envconfig(from = "AUDIT_LOG_MAX_FILES", default = "5")]
    pub audit_log_max_files: usize,

    /// Rate limiter cleanup interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    /// How long past its window an idle bucket survives a sweep
    #[envconfig(from = "BUCKET_IDLE_GRACE_MS", default = "60000")]
    pub bucket_idle_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            data_dir: PathBuf::from("data"),
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 60,
            admin_rate_limit_max_requests: 30,
            rate_limit_enabled: true,
            trust_proxy_headers: false,
            audit_log_max_size: 10 * 1024 * 1024,
            audit_log_max_files: 5,
            cleanup_interval_secs: 300,
            bucket_idle_grace_ms: 60_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: chrono::Duration::milliseconds(
                i64::try_from(self.recovery_timeout_ms).unwrap_or(i64::MAX),
            ),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        let window = Duration::from_millis(self.rate_limit_window_ms);
        let rule = |max| RateLimitRule {
            window,
            max_requests: max,
            enabled: self.rate_limit_enabled,
        };
        RateLimitConfig {
            global: rule(self.rate_limit_max_requests),
            admin: rule(self.admin_rate_limit_max_requests),
            idle_grace: Duration::from_millis(self.bucket_idle_grace_ms),
        }
    }

    pub fn audit(&self) -> AuditConfig {
        AuditConfig {
            dir: self.log_dir.clone(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            rotation: RotationPolicy {
                max_file_size: self.audit_log_max_size,
                max_files: self.audit_log_max_files,
            },
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
