use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::audit::AuditStats;
use crate::circuit_breaker::{CircuitState, CircuitStatus};
use crate::gateway::Gateway;
use crate::metrics::ActionMetrics;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the process started serving
    pub uptime: f64,
    pub version: String,
    pub platform: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealth {
    #[serde(flatten)]
    pub base: HealthStatus,
    pub services: ServiceStatuses,
    pub metrics: BTreeMap<String, ActionMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatuses {
    pub sheets: SheetsStatus,
    pub audit_logs: AuditLogsStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsStatus {
    pub status: String,
    pub circuit_breaker: CircuitStatus,
}

#[derive(Debug, Serialize)]
pub struct AuditLogsStatus {
    pub status: String,
    pub stats: AuditStats,
}

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

pub struct HealthChecker {
    gateway: Arc<Gateway>,
}

impl HealthChecker {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        LazyLock::force(&START_TIME);
        Self { gateway }
    }

    pub fn check_health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            timestamp: self.gateway.clock().now(),
            uptime: START_TIME.elapsed().as_secs_f64(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Health plus breaker state, audit statistics and outcome counters
    pub async fn check_detailed(&self) -> DetailedHealth {
        let breaker = self.gateway.breaker_status();
        let stats = self.gateway.audit().stats().await;

        let sheets_status = match breaker.state {
            CircuitState::Closed => "ok",
            CircuitState::HalfOpen => "recovering",
            CircuitState::Open => "unavailable",
        };
        let audit_status = if stats.error.is_some() { "error" } else { "ok" };

        let mut base = self.check_health();
        if sheets_status != "ok" || audit_status != "ok" {
            base.status = "degraded".to_string();
        }

        DetailedHealth {
            base,
            services: ServiceStatuses {
                sheets: SheetsStatus {
                    status: sheets_status.to_string(),
                    circuit_breaker: breaker,
                },
                audit_logs: AuditLogsStatus {
                    status: audit_status.to_string(),
                    stats,
                },
            },
            metrics: self.gateway.metrics().snapshot().await,
        }
    }
}
