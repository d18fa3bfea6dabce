use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Manages the log directory layout.
///
/// Every supervisor run writes to a single `<prefix>-<YYYY-MM-DD>.log` under the
/// log directory (default `logs/`). This struct provides the well-known paths
/// and the glob pattern the retention sweeper matches.
#[derive(Debug, Clone)]
pub struct LogDir {
    root: PathBuf,
    prefix: String,
}

impl LogDir {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// The root directory (e.g. `logs/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name prefix shared by every rotated log (e.g. `scalping`).
    #[cfg(test)]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the log file for a given calendar date.
    pub fn target_for(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    /// Path of the log file for today's local date.
    pub fn today(&self) -> PathBuf {
        self.target_for(chrono::Local::now().date_naive())
    }

    /// Glob matched against file names when sweeping (e.g. `scalping-*.log`).
    pub fn file_pattern(&self) -> String {
        format!("{}-*.log", glob::Pattern::escape(&self.prefix))
    }

    /// Create the directory if missing.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn ensure(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }
}

/// The shared, append-only log file of one supervisor run.
///
/// Cloning is cheap; every clone refers to the same open file description, which
/// was opened with `O_APPEND` so each write lands at the current end of file.
#[derive(Debug, Clone)]
pub struct LogTarget {
    path: PathBuf,
    file: Arc<File>,
}

impl LogTarget {
    /// Open (or create) `path` in append mode. Never truncates.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> Arc<File> {
        Arc::clone(&self.file)
    }
}
