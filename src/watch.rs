//! Modification-time based change detection.
//!
//! Only mtimes are compared. Touching a file without editing it counts as a
//! change; no hashing is done.

use std::path::Path;
use std::time::SystemTime;

use walkdir::{DirEntry, WalkDir};

use crate::config::WatchConfig;
use crate::error::{Result, SupervisorError};

/// Newest mtime seen across the watched file set.
///
/// `None` means no matching file has been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeState(Option<SystemTime>);

impl ChangeState {
    pub fn new(latest: Option<SystemTime>) -> Self {
        Self(latest)
    }

    pub fn latest(&self) -> Option<SystemTime> {
        self.0
    }
}

/// Files to sample: a root plus extension and directory filters.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl ChangeDetector {
    pub fn new(extensions: Vec<String>, exclude_dirs: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            extensions,
            exclude_dirs,
        }
    }

    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self::new(cfg.extensions.clone(), cfg.exclude_dirs.clone())
    }

    /// Walk `root` and return the newest mtime among matching files.
    ///
    /// Unreadable entries are skipped. Fails only when `root` itself cannot
    /// be read.
    pub fn sample(&self, root: &Path) -> Result<ChangeState> {
        std::fs::metadata(root).map_err(|source| SupervisorError::Walk {
            root: root.to_path_buf(),
            source,
        })?;

        let latest = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded_dir(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("skipping unreadable entry: {e}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.matches(entry.path()))
            .filter_map(|entry| entry.metadata().ok()?.modified().ok())
            .max();

        Ok(ChangeState(latest))
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.exclude_dirs.iter().any(|d| *d == name)
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }
}

/// Changed iff `current` is strictly newer than `previous`.
pub fn has_changed(previous: ChangeState, current: ChangeState) -> bool {
    match (previous.0, current.0) {
        (Some(prev), Some(cur)) => cur > prev,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}
