use crate::error::GatewayError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome counters for one guarded action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetrics {
    pub total: u64,
    pub succeeded: u64,
    pub external_failures: u64,
    pub circuit_open: u64,
    pub audit_failures: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    actions: Arc<RwLock<BTreeMap<String, ActionMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_outcome<T>(
        &self,
        action: &str,
        outcome: &Result<T, GatewayError>,
        audit_failed: bool,
    ) {
        let mut actions = self.actions.write().await;
        let metrics = actions.entry(action.to_string()).or_default();

        metrics.total += 1;
        match outcome {
            Ok(_) => metrics.succeeded += 1,
            Err(GatewayError::CircuitOpen(_)) => metrics.circuit_open += 1,
            Err(_) => metrics.external_failures += 1,
        }
        if audit_failed {
            metrics.audit_failures += 1;
        }
    }

    pub async fn action(&self, action: &str) -> Option<ActionMetrics> {
        self.actions.read().await.get(action).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, ActionMetrics> {
        self.actions.read().await.clone()
    }
}
