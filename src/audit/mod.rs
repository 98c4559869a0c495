//! Append-only audit log with size-based rotation, search and statistics.
//!
//! Every guarded action produces exactly one [`AuditEntry`], written as one
//! JSON line to the active file. Check-size, rotate and append run under one
//! async mutex, so appends never interleave and a rotation never races an
//! append from the same process. Several processes sharing one file are not
//! coordinated.

pub mod entry;
pub mod query;
pub mod rotation;

pub use entry::{AuditEntry, AuditMetadata, AuditResult};
pub use query::{AuditPage, AuditQuery, AuditStats, Pagination};
pub use rotation::RotationPolicy;

use crate::clock::SharedClock;
use crate::error::AuditError;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const DEFAULT_FILE_NAME: &str = "audit.log";

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub dir: PathBuf,
    pub file_name: String,
    pub rotation: RotationPolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: DEFAULT_FILE_NAME.to_string(),
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    rotation: RotationPolicy,
    clock: SharedClock,
    writer: Mutex<()>,
}

impl AuditLogger {
    pub fn new(config: AuditConfig, clock: SharedClock) -> Self {
        Self {
            path: config.dir.join(&config.file_name),
            rotation: config.rotation,
            clock,
            writer: Mutex::new(()),
        }
    }

    /// Path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, rotating first if the active file is too large.
    ///
    /// A failed rotation is logged and the entry is still appended to the
    /// current file. The returned error is for diagnostics only; callers must
    /// not let it replace the outcome of the action being audited.
    pub async fn record(
        &self,
        action: &str,
        payload: Value,
        result: AuditResult,
        metadata: AuditMetadata,
    ) -> Result<AuditEntry, AuditError> {
        let _guard = self.writer.lock().await;
        let now = self.clock.now();

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        if let Err(e) = rotation::rotate_if_needed(&self.path, &self.rotation, now).await {
            tracing::warn!(
                target: "sheetguard::audit",
                error = %e,
                "audit log rotation failed, appending to current file"
            );
        }

        let entry = AuditEntry {
            timestamp: now,
            action: action.to_string(),
            payload,
            result,
            metadata,
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(entry)
    }

    /// Filtered, newest-first page of entries from the active file.
    ///
    /// Never fails: an unreadable log yields an empty page with `error` set.
    pub async fn search(&self, query: &AuditQuery) -> AuditPage {
        match self.read_entries().await {
            Ok(entries) => query::search(entries, query),
            Err(e) => {
                tracing::error!(target: "sheetguard::audit", error = %e, "audit search failed");
                AuditPage::unavailable(query, e.to_string())
            }
        }
    }

    /// Aggregate counts over the active file.
    ///
    /// Never fails: an unreadable log yields zeroed stats with `error` set.
    pub async fn stats(&self) -> AuditStats {
        match self.read_entries().await {
            Ok(entries) => query::stats(&entries),
            Err(e) => {
                tracing::error!(target: "sheetguard::audit", error = %e, "audit stats failed");
                AuditStats::unavailable(e.to_string())
            }
        }
    }

    /// Archived files, newest first.
    pub async fn archives(&self) -> io::Result<Vec<PathBuf>> {
        match rotation::list_archives(&self.path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    async fn read_entries(&self) -> io::Result<Vec<AuditEntry>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(query::parse_lines(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
