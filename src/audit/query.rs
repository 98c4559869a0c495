//! Filtering, pagination and aggregate statistics over audit entries.

use super::entry::AuditEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Search filters. Every `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// 1-based page number.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size capped at `MAX_PAGE_LIMIT`. Zero means the default.
    pub fn limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(limit) => limit.min(MAX_PAGE_LIMIT),
        }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &entry.metadata.user_id != user_id {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.result.ok != success {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPage {
    pub logs: Vec<AuditEntry>,
    pub total: usize,
    pub pagination: Pagination,
    /// Set when the log could not be read; `logs` is then empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditPage {
    pub fn empty(query: &AuditQuery) -> Self {
        Self {
            logs: Vec::new(),
            total: 0,
            pagination: Pagination {
                page: query.page(),
                limit: query.limit(),
                total: 0,
                total_pages: 0,
            },
            error: None,
        }
    }

    pub fn unavailable(query: &AuditQuery, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(query)
        }
    }
}

/// Aggregate counts over the whole log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total_logs: usize,
    pub actions: BTreeMap<String, usize>,
    /// Percentage of successful entries, two decimals, 0 for an empty log.
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditStats {
    pub fn empty() -> Self {
        Self {
            total_logs: 0,
            actions: BTreeMap::new(),
            success_rate: 0.0,
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty()
        }
    }
}

/// Parse newline-delimited entries, skipping blank and malformed lines.
pub fn parse_lines(content: &str) -> Vec<AuditEntry> {
    let mut skipped = 0usize;
    let entries: Vec<AuditEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        tracing::debug!(target: "sheetguard::audit", skipped, "skipped malformed audit lines");
    }
    entries
}

/// Apply filters, sort newest first and cut out the requested page.
pub fn search(entries: Vec<AuditEntry>, query: &AuditQuery) -> AuditPage {
    let mut matching: Vec<AuditEntry> = entries.into_iter().filter(|e| query.matches(e)).collect();
    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let total = matching.len();
    let page = query.page();
    let limit = query.limit();
    let start = (page - 1).saturating_mul(limit);

    let logs = matching.into_iter().skip(start).take(limit).collect();

    AuditPage {
        logs,
        total,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit),
        },
        error: None,
    }
}

pub fn stats<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> AuditStats {
    let mut total_logs = 0usize;
    let mut successful = 0usize;
    let mut actions = BTreeMap::new();

    for entry in entries {
        total_logs += 1;
        if entry.result.ok {
            successful += 1;
        }
        *actions.entry(entry.action.clone()).or_insert(0) += 1;
    }

    let success_rate = if total_logs == 0 {
        0.0
    } else {
        round2(successful as f64 / total_logs as f64 * 100.0)
    };

    AuditStats {
        total_logs,
        actions,
        success_rate,
        error: None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
