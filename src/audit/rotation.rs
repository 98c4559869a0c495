//! Size-based rotation and archive retention for the audit log.
//!
//! Archives live next to the active file and are named
//! `<stem>.<timestamp>.log`, where the timestamp is ISO-8601 with `:` and `.`
//! replaced by `-`. That format sorts lexicographically in time order. When
//! a name is already taken the stamp moves forward one millisecond at a time
//! until it is free, so archive names stay unique and ordered.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the active file is strictly larger than this many bytes.
    pub max_file_size: u64,
    /// Archives kept after rotation. The active file is not counted.
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

fn stem_of(active: &Path) -> String {
    active
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audit".to_string())
}

fn dir_of(active: &Path) -> &Path {
    match active.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Archive path for a rotation happening at `at`.
pub fn archive_path(active: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    dir_of(active).join(format!("{}.{}.log", stem_of(active), stamp))
}

async fn free_archive_path(active: &Path, mut at: DateTime<Utc>) -> io::Result<PathBuf> {
    loop {
        let candidate = archive_path(active, at);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        at += chrono::Duration::milliseconds(1);
    }
}

fn is_archive_name(active: &Path, name: &str) -> bool {
    let prefix = format!("{}.", stem_of(active));
    let active_name = active.file_name().map(|n| n.to_string_lossy());
    name.starts_with(&prefix)
        && name.ends_with(".log")
        && active_name.as_deref() != Some(name)
}

/// Archives of `active`, newest first.
pub async fn list_archives(active: &Path) -> io::Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    let mut dir = fs::read_dir(dir_of(active)).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_archive_name(active, &name) {
            names.push(name);
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names.into_iter().map(|n| dir_of(active).join(n)).collect())
}

/// Rename the active file to an archive if it has outgrown the policy.
///
/// Returns the archive path when a rotation happened. A missing active file
/// is not an error.
pub async fn rotate_if_needed(
    active: &Path,
    policy: &RotationPolicy,
    now: DateTime<Utc>,
) -> io::Result<Option<PathBuf>> {
    let size = match fs::metadata(active).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if size <= policy.max_file_size {
        return Ok(None);
    }

    let archive = free_archive_path(active, now).await?;
    fs::rename(active, &archive).await?;
    tracing::info!(
        target: "sheetguard::audit",
        archive = %archive.display(),
        size,
        "rotated audit log"
    );

    prune_archives(active, policy.max_files).await?;
    Ok(Some(archive))
}

/// Delete archives beyond the newest `max_files`. Returns what was removed.
pub async fn prune_archives(active: &Path, max_files: usize) -> io::Result<Vec<PathBuf>> {
    let archives = list_archives(active).await?;
    let mut removed = Vec::new();
    for stale in archives.into_iter().skip(max_files) {
        match fs::remove_file(&stale).await {
            Ok(()) => removed.push(stale),
            Err(e) => tracing::warn!(
                target: "sheetguard::audit",
                file = %stale.display(),
                error = %e,
                "failed to delete old audit archive"
            ),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        let path = archive_path(Path::new("/var/log/app/audit.log"), at);
        assert_eq!(
            path,
            PathBuf::from("/var/log/app/audit.2024-03-09T14-05-07-042Z.log")
        );
    }

    #[test]
    fn test_archive_name_matching() {
        let active = Path::new("logs/audit.log");
        assert!(is_archive_name(active, "audit.2024-03-09T14-05-07-042Z.log"));
        assert!(!is_archive_name(active, "audit.log"));
        assert!(!is_archive_name(active, "other.2024-03-09T14-05-07-042Z.log"));
        assert!(!is_archive_name(active, "audit.2024-03-09.txt"));
    }

    #[tokio::test]
    async fn test_small_file_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("audit.log");
        fs::write(&active, b"0123456789").await.unwrap();

        let policy = RotationPolicy {
            max_file_size: 10,
            max_files: 2,
        };
        let rotated = rotate_if_needed(&active, &policy, Utc::now()).await.unwrap();
        assert!(rotated.is_none());
        assert!(active.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("audit.log");
        let rotated = rotate_if_needed(&active, &RotationPolicy::default(), Utc::now())
            .await
            .unwrap();
        assert!(rotated.is_none());
    }

    #[tokio::test]
    async fn test_same_instant_rotations_get_distinct_archives() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("audit.log");
        let policy = RotationPolicy {
            max_file_size: 0,
            max_files: 10,
        };
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for content in ["first", "second", "third"] {
            fs::write(&active, content).await.unwrap();
            rotate_if_needed(&active, &policy, at).await.unwrap();
        }

        let archives = list_archives(&active).await.unwrap();
        assert_eq!(archives.len(), 3);
        assert_eq!(archives[2], archive_path(&active, at));
        assert_eq!(fs::read_to_string(&archives[0]).await.unwrap(), "third");
        assert_eq!(fs::read_to_string(&archives[2]).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("audit.log");
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..4 {
            let path = archive_path(&active, base + chrono::Duration::seconds(i));
            fs::write(path, b"x").await.unwrap();
        }
        fs::write(&active, b"live").await.unwrap();

        let removed = prune_archives(&active, 2).await.unwrap();
        assert_eq!(removed.len(), 2);

        let kept = list_archives(&active).await.unwrap();
        assert_eq!(
            kept,
            vec![
                archive_path(&active, base + chrono::Duration::seconds(3)),
                archive_path(&active, base + chrono::Duration::seconds(2)),
            ]
        );
        assert!(active.exists());
    }
}
