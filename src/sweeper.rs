//! Startup retention sweep for rotated log files.
//!
//! Deletes `<prefix>-*.log` entries in the log directory that are at least
//! `max_age_days` whole days old. Ages are rounded down to full days, so with
//! the default of 5 a file last touched 4 days and 23 hours ago survives.

use crate::log_dir::LogDir;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32) -> Self {
        Self { max_age_days }
    }

    /// Whether a file of the given age is past retention.
    pub fn is_expired(&self, age: Duration) -> bool {
        let full_days = age.as_secs() / DAY.as_secs();
        full_days >= u64::from(self.max_age_days)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_age_days: 5 }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Entries whose name matched the log pattern.
    pub matched: usize,
    pub deleted: Vec<PathBuf>,
    pub failed: usize,
}

/// Delete expired log files under `log_dir`, measuring age against `now`.
///
/// Never fails: an unreadable directory or a file that cannot be removed is
/// logged and skipped.
pub fn sweep(log_dir: &LogDir, policy: RetentionPolicy, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    if let Err(e) = log_dir.ensure() {
        tracing::warn!(
            error = %e,
            dir = %log_dir.root().display(),
            "failed to create log directory, skipping retention sweep"
        );
        return report;
    }

    let pattern = match glob::Pattern::new(&log_dir.file_pattern()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "invalid log file pattern, skipping retention sweep");
            return report;
        }
    };

    let entries = match std::fs::read_dir(log_dir.root()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read log directory for retention sweep");
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| pattern.matches(n));
        if !matches {
            continue;
        }
        report.matched += 1;

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, file = %path.display(), "failed to stat log file");
                report.failed += 1;
                continue;
            }
        };
        // A modification time in the future counts as brand new.
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if !policy.is_expired(age) {
            continue;
        }

        match remove(&path, metadata.is_dir()) {
            Ok(()) => {
                tracing::debug!(
                    file = %path.display(),
                    age_days = age.as_secs() / DAY.as_secs(),
                    "deleted expired log file"
                );
                report.deleted.push(path);
            }
            Err(e) => {
                tracing::warn!(error = %e, file = %path.display(), "failed to delete expired log file");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        dir = %log_dir.root().display(),
        matched = report.matched,
        deleted = report.deleted.len(),
        failed = report.failed,
        "log retention sweep complete"
    );
    report
}

// Directories only go if empty, like `find -delete`.
fn remove(path: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    }
}
