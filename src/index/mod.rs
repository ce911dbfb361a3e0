//! File index service: scanner + watcher + debouncer over a project root
//!
//! Maintains the authoritative in-memory index of pipeline files, applies
//! debounced filesystem changes to it under a read/write lock, and
//! publishes effective [`FileChangeEvent`]s to subscribers.

pub mod debounce;
pub mod scanner;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::FileConfig;
use crate::protocol::FileInfo;
use crate::{paths, BridgeError, Result};

pub use debounce::{ChangeCallback, Debouncer, DEFAULT_DEBOUNCE_WINDOW};
pub use scanner::{is_shadow_config, shadow_config_path, Scanner};
pub use watcher::{ChangeKind, FileChangeEvent, IndexWatcher};

/// Window during which a modification echo of our own write is swallowed.
const SELF_WRITE_IGNORE_WINDOW: Duration = Duration::from_secs(2);

/// Indexed file entry, keyed by absolute path
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub file_name: String,
    /// Unix seconds of the last observed modification
    pub last_modified: u64,
}

impl From<&FileRecord> for FileInfo {
    fn from(record: &FileRecord) -> Self {
        Self {
            file_path: record.abs_path.display().to_string(),
            file_name: record.file_name.clone(),
            relative_path: record.rel_path.display().to_string(),
            last_modified: record.last_modified,
        }
    }
}

/// File index service
pub struct FileIndexService {
    root: PathBuf,
    scanner: Scanner,
    exclude: Vec<String>,
    extensions: Vec<String>,
    index: RwLock<HashMap<PathBuf, FileRecord>>,
    change_tx: broadcast::Sender<FileChangeEvent>,
    watcher: Mutex<Option<IndexWatcher>>,
    recently_written: Mutex<HashMap<PathBuf, Instant>>,
}

impl FileIndexService {
    /// Create the service. The project root must exist.
    pub fn new(cfg: &FileConfig) -> Result<Arc<Self>> {
        let root = paths::resolve_path_or_cwd(&cfg.root)?;
        let root = root.canonicalize().map_err(|e| BridgeError::FileNotFound {
            path: format!("project root {}: {}", root.display(), e),
        })?;

        let scanner = Scanner::new(
            root.clone(),
            cfg.exclude.clone(),
            cfg.extensions.clone(),
            cfg.max_depth,
            cfg.max_files,
        );
        let (change_tx, _) = broadcast::channel(100);

        Ok(Arc::new(Self {
            root,
            scanner,
            exclude: cfg.exclude.clone(),
            extensions: cfg.extensions.clone(),
            index: RwLock::new(HashMap::new()),
            change_tx,
            watcher: Mutex::new(None),
            recently_written: Mutex::new(HashMap::new()),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Initial scan followed by watcher startup.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let outcome = self.scanner.scan()?;
        {
            let mut index = self.index.write();
            for record in outcome.records {
                index.insert(record.abs_path.clone(), record);
            }
        }
        let count = self.index.read().len();
        if outcome.truncated {
            tracing::warn!(
                "initial scan found {} files ({})",
                count,
                outcome.limit_reason.as_deref().unwrap_or("truncated")
            );
        } else {
            tracing::info!("initial scan found {} files", count);
        }

        let service = Arc::clone(self);
        let callback: ChangeCallback = Arc::new(move |event| service.apply_change(event));
        let watcher = IndexWatcher::start(
            self.root.clone(),
            self.exclude.clone(),
            self.extensions.clone(),
            DEFAULT_DEBOUNCE_WINDOW,
            callback,
        )?;
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    /// Stop watching; cancels pending debounce timers and releases the OS
    /// watch handles.
    pub fn stop(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }

    /// Subscribe to effective change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Snapshot of the index, sorted by relative path for stable output.
    pub fn file_list(&self) -> Vec<FileRecord> {
        let index = self.index.read();
        let mut records: Vec<FileRecord> = index.values().cloned().collect();
        records.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        records
    }

    pub fn file_count(&self) -> usize {
        self.index.read().len()
    }

    /// Read a pipeline file (or a shadow config, which is readable on
    /// demand even though it is never indexed). Returns the parsed content
    /// plus the paired shadow config when one exists.
    pub fn read_file(&self, file_path: &str) -> Result<(Value, Option<Value>, Option<PathBuf>)> {
        let abs = self.contained_path(file_path)?;
        let file_name = abs
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if is_shadow_config(&file_name) {
            let content = self.read_json(&abs)?;
            return Ok((content, None, None));
        }

        if !self.index.read().contains_key(&abs) {
            return Err(BridgeError::FileNotFound {
                path: abs.display().to_string(),
            });
        }

        let content = self.read_json(&abs)?;
        let config_path = shadow_config_path(&abs);
        let shadow = if config_path.is_file() {
            match self.read_json(&config_path) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("ignoring unreadable shadow config: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let config_path = shadow.is_some().then_some(config_path);
        Ok((content, shadow, config_path))
    }

    /// Persist a pipeline document. The write is recorded so the watcher
    /// echo inside the ignore window does not bounce back to clients.
    pub fn save_file(&self, file_path: &str, content: &Value, indent: Option<usize>) -> Result<()> {
        let abs = self.contained_path(file_path)?;
        self.write_json(&abs, content, indent)?;
        tracing::info!("saved {}", abs.display());
        self.refresh_record(&abs);
        Ok(())
    }

    /// Persist a pipeline file together with its sibling shadow config.
    pub fn save_pair(
        &self,
        pipeline_path: &str,
        pipeline: &Value,
        config: &Value,
        indent: Option<usize>,
    ) -> Result<PathBuf> {
        let abs = self.contained_path(pipeline_path)?;
        let config_path = shadow_config_path(&abs);
        self.write_json(&abs, pipeline, indent)?;
        self.write_json(&config_path, config, indent)?;
        tracing::info!(
            "saved {} with shadow config {}",
            abs.display(),
            config_path.display()
        );
        self.refresh_record(&abs);
        Ok(config_path)
    }

    /// Create a new pipeline file; fails when the target already exists.
    pub fn create_file(
        &self,
        directory: &str,
        file_name: &str,
        content: Option<&Value>,
    ) -> Result<PathBuf> {
        if file_name.is_empty() || file_name.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|'])
        {
            return Err(BridgeError::InvalidRequest {
                reason: format!("illegal file name: {:?}", file_name),
            });
        }
        let dir = self.contained_path(directory)?;
        let abs = dir.join(file_name);
        if abs.exists() {
            return Err(BridgeError::FileNameConflict {
                path: abs.display().to_string(),
            });
        }

        let empty = serde_json::json!({});
        self.write_json(&abs, content.unwrap_or(&empty), None)?;
        tracing::info!("created {}", abs.display());

        if let Ok(Some(record)) = self.scanner.scan_single(&abs) {
            self.index.write().insert(abs.clone(), record);
        }
        Ok(abs)
    }

    /// Apply an effective (debounced) change to the index, then publish it.
    fn apply_change(&self, event: FileChangeEvent) {
        match event.kind {
            ChangeKind::Created => match self.scanner.scan_single(&event.path) {
                Ok(Some(record)) => {
                    self.index.write().insert(event.path.clone(), record);
                    tracing::info!("indexed new file {}", event.path.display());
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("cannot index {}: {}", event.path.display(), e);
                    return;
                }
            },
            ChangeKind::Modified => {
                if self.is_own_write(&event.path) {
                    tracing::debug!("ignoring own write of {}", event.path.display());
                    return;
                }
                let last_modified = match self.scanner.scan_single(&event.path) {
                    Ok(Some(record)) => record.last_modified,
                    _ => return,
                };
                let mut index = self.index.write();
                match index.get_mut(&event.path) {
                    // Timestamp refresh only; content is never cached.
                    Some(record) => record.last_modified = last_modified,
                    None => return,
                }
            }
            ChangeKind::Deleted => {
                let mut index = self.index.write();
                let direct = index.remove(&event.path).is_some();
                let prefix = format!("{}{}", event.path.display(), std::path::MAIN_SEPARATOR);
                let before = index.len();
                index.retain(|path, _| !path.display().to_string().starts_with(&prefix));
                let removed = before - index.len();
                drop(index);
                if !direct && removed == 0 {
                    return;
                }
                if removed > 0 {
                    tracing::info!(
                        "removed {} and {} indexed files beneath it",
                        event.path.display(),
                        removed
                    );
                } else {
                    tracing::info!("removed {}", event.path.display());
                }
            }
        }

        let _ = self.change_tx.send(event);
    }

    fn refresh_record(&self, abs: &Path) {
        if let Ok(Some(record)) = self.scanner.scan_single(abs) {
            self.index.write().insert(abs.to_path_buf(), record);
        }
    }

    fn is_own_write(&self, path: &Path) -> bool {
        let mut written = self.recently_written.lock();
        written.retain(|_, at| at.elapsed() < SELF_WRITE_IGNORE_WINDOW * 2);
        match written.get(path) {
            Some(at) => at.elapsed() < SELF_WRITE_IGNORE_WINDOW,
            None => false,
        }
    }

    fn read_json(&self, abs: &Path) -> Result<Value> {
        let raw = std::fs::read_to_string(abs).map_err(|e| BridgeError::FileRead {
            path: abs.display().to_string(),
            source: e,
        })?;
        // Pipeline documents may carry comments (.jsonc), so parse leniently.
        json5::from_str(&raw).map_err(|e| BridgeError::InvalidPayload {
            message: format!("{}: {}", abs.display(), e),
        })
    }

    fn write_json(&self, abs: &Path, content: &Value, indent: Option<usize>) -> Result<()> {
        let text = to_pretty_json(content, indent)?;
        self.recently_written
            .lock()
            .insert(abs.to_path_buf(), Instant::now());
        if let Err(e) = std::fs::write(abs, text) {
            self.recently_written.lock().remove(abs);
            return Err(BridgeError::FileWrite {
                path: abs.display().to_string(),
                source: e,
            });
        }
        // A raw event for this path may already be in flight; drop it so
        // the write does not echo back after the ignore window.
        if let Some(watcher) = self.watcher.lock().as_ref() {
            watcher.cancel_debounce(&abs.to_path_buf());
        }
        Ok(())
    }

    /// Absolutize and verify the path stays inside the project root.
    fn contained_path(&self, raw: &str) -> Result<PathBuf> {
        let abs = paths::resolve_path_or_cwd(Path::new(raw))?;
        let abs = paths::normalize(&abs);
        if !abs.starts_with(&self.root) {
            return Err(BridgeError::PermissionDenied {
                reason: format!("{} is outside the project root", abs.display()),
            });
        }
        Ok(abs)
    }
}

/// Pretty-print JSON with a configurable indent (default 4 spaces, the
/// format pipeline editors expect).
fn to_pretty_json(value: &Value, indent: Option<usize>) -> Result<String> {
    let indent = match indent {
        Some(n) if n > 0 => n,
        _ => 4,
    };
    let indent_str = " ".repeat(indent);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent_str.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(BridgeError::invalid_payload)?;
    String::from_utf8(buf).map_err(BridgeError::internal)
}
