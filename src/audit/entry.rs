//! The audit record written once per guarded action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const UNKNOWN: &str = "unknown";

/// One line of the audit log. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    pub result: AuditResult,
    #[serde(default)]
    pub metadata: AuditMetadata,
}

/// Outcome of the audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl AuditResult {
    pub fn success(detail: Value) -> Self {
        Self { ok: true, detail }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: json!({ "message": message.into() }),
        }
    }
}

/// Who triggered the action. Missing fields are recorded as `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    #[serde(default = "unknown")]
    pub user_id: String,
    #[serde(default = "unknown")]
    pub ip_address: String,
    #[serde(default = "unknown")]
    pub user_agent: String,
    #[serde(default = "unknown")]
    pub session_id: String,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => unknown(),
    }
}

impl Default for AuditMetadata {
    fn default() -> Self {
        Self {
            user_id: unknown(),
            ip_address: unknown(),
            user_agent: unknown(),
            session_id: unknown(),
        }
    }
}

impl AuditMetadata {
    pub fn new(
        user_id: Option<&str>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        session_id: Option<&str>,
    ) -> Self {
        Self {
            user_id: or_unknown(user_id),
            ip_address: or_unknown(ip_address),
            user_agent: or_unknown(user_agent),
            session_id: or_unknown(session_id),
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = or_unknown(Some(user_id));
        self
    }
}
