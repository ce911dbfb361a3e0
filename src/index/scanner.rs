//! Recursive project scanner feeding the file index

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{BridgeError, Result};

use super::FileRecord;

/// Suffix of the hidden shadow-config naming convention.
///
/// A pipeline file `tasks.json` pairs with a sibling `.tasks.flow.json`;
/// the shadow file is excluded from the primary index regardless of its
/// extension but stays readable on demand.
pub const SHADOW_CONFIG_SUFFIX: &str = ".flow.json";

/// True for file names following the shadow-config convention.
pub fn is_shadow_config(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.to_lowercase().ends_with(SHADOW_CONFIG_SUFFIX)
}

/// Sibling shadow-config path for a pipeline file.
pub fn shadow_config_path(pipeline_path: &Path) -> PathBuf {
    let stem = pipeline_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name = format!(".{}{}", stem, SHADOW_CONFIG_SUFFIX);
    match pipeline_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Result of a full scan
#[derive(Debug)]
pub struct ScanOutcome {
    pub records: Vec<FileRecord>,
    /// True when a depth or file-count limit cut the walk short
    pub truncated: bool,
    pub limit_reason: Option<String>,
}

/// Recursive walker over the project root.
///
/// Excluded directories are pruned by bare name; files pass an extension
/// allow-list, with the shadow-config rule applied on top. Per-file errors
/// are logged and skipped, never aborting the walk.
pub struct Scanner {
    root: PathBuf,
    exclude: Vec<String>,
    extensions: Vec<String>,
    max_depth: usize,
    max_files: usize,
}

impl Scanner {
    pub fn new(
        root: PathBuf,
        exclude: Vec<String>,
        extensions: Vec<String>,
        max_depth: usize,
        max_files: usize,
    ) -> Self {
        Self {
            root,
            exclude,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            max_depth,
            max_files,
        }
    }

    /// Walk the whole root.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome {
            records: Vec::new(),
            truncated: false,
            limit_reason: None,
        };
        self.walk(&self.root, 0, &mut outcome)?;
        Ok(outcome)
    }

    fn walk(&self, dir: &Path, depth: usize, outcome: &mut ScanOutcome) -> Result<()> {
        if self.max_depth > 0 && depth >= self.max_depth {
            outcome.truncated = true;
            outcome.limit_reason = Some(format!("max depth {} reached", self.max_depth));
            return Ok(());
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                // Unreadable directory: skip the subtree, keep partial progress
                tracing::warn!("skipping unreadable directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if file_type.is_dir() {
                let name = entry.file_name();
                if self.is_excluded_dir(&name.to_string_lossy()) {
                    continue;
                }
                self.walk(&path, depth + 1, outcome)?;
                continue;
            }

            if !file_type.is_file() || !self.matches(&path) {
                continue;
            }

            if self.max_files > 0 && outcome.records.len() >= self.max_files {
                outcome.truncated = true;
                outcome.limit_reason = Some(format!("max files {} reached", self.max_files));
                return Ok(());
            }

            match self.record_for(&path) {
                Ok(record) => outcome.records.push(record),
                Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
            }
        }

        Ok(())
    }

    /// Re-derive the record for a single path; `Ok(None)` when the path is
    /// a directory or fails the allow-list.
    pub fn scan_single(&self, abs_path: &Path) -> Result<Option<FileRecord>> {
        let meta = std::fs::metadata(abs_path).map_err(|e| BridgeError::FileRead {
            path: abs_path.display().to_string(),
            source: e,
        })?;
        if meta.is_dir() || !self.matches(abs_path) {
            return Ok(None);
        }
        self.record_for(abs_path).map(Some)
    }

    /// True when the path passes the extension allow-list and is not a
    /// shadow config.
    pub fn matches(&self, path: &Path) -> bool {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        if is_shadow_config(file_name) {
            return false;
        }
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => return false,
        };
        self.extensions.iter().any(|allowed| *allowed == ext)
    }

    pub fn is_excluded_dir(&self, dir_name: &str) -> bool {
        self.exclude.iter().any(|excluded| excluded == dir_name)
    }

    fn record_for(&self, abs_path: &Path) -> Result<FileRecord> {
        let meta = std::fs::metadata(abs_path).map_err(|e| BridgeError::FileRead {
            path: abs_path.display().to_string(),
            source: e,
        })?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(|| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            });
        let rel_path = abs_path
            .strip_prefix(&self.root)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| abs_path.to_path_buf());
        let file_name = abs_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(FileRecord {
            abs_path: abs_path.to_path_buf(),
            rel_path,
            file_name,
            last_modified,
        })
    }
}
