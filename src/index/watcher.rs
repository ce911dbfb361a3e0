//! Filesystem watcher feeding the index through the debouncer
//!
//! Watches are registered per directory (non-recursive): the project root
//! plus every subdirectory found by the initial walk. When a directory
//! creation is observed, the new directory and all of its nested
//! subdirectories are watched immediately and created events are
//! synthesized for matching files already inside — without this, files
//! under a freshly created directory would go unobserved.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{BridgeError, Result};

use super::debounce::{ChangeCallback, Debouncer};
use super::scanner::is_shadow_config;

/// Kind of an observed file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// Effective change notification, produced once per debounce window
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Running watcher over a project root
pub struct IndexWatcher {
    debouncer: Arc<Debouncer>,
    // Kept alive for the lifetime of the watcher; dropping it closes the
    // OS watch handles.
    _watcher: Arc<Mutex<RecommendedWatcher>>,
    task: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Register watches and start translating raw notifications into
    /// debounced [`FileChangeEvent`]s delivered to `callback`.
    pub fn start(
        root: PathBuf,
        exclude: Vec<String>,
        extensions: Vec<String>,
        window: Duration,
        callback: ChangeCallback,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Runs on notify's own thread; an unbounded send never blocks it.
            let _ = tx.send(res);
        })
        .map_err(|e| BridgeError::Internal {
            message: format!("failed to create filesystem watcher: {}", e),
        })?;
        let watcher = Arc::new(Mutex::new(watcher));

        let extensions: Vec<String> = extensions.iter().map(|e| e.to_lowercase()).collect();

        watcher
            .lock()
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|e| BridgeError::Internal {
                message: format!("failed to watch {}: {}", root.display(), e),
            })?;
        watch_subdirs(&watcher, &root, &exclude);

        let debouncer = Arc::new(Debouncer::new(window));
        let consumer = EventConsumer {
            root: root.clone(),
            exclude,
            extensions,
            watcher: Arc::clone(&watcher),
            debouncer: Arc::clone(&debouncer),
            callback,
        };
        let task = tokio::spawn(consumer.run(rx));

        tracing::info!("file watcher started for {}", root.display());
        Ok(Self {
            debouncer,
            _watcher: watcher,
            task,
        })
    }

    /// Drop a pending debounce timer for a path (used to swallow the echo
    /// of a write the bridge itself performed).
    pub fn cancel_debounce(&self, path: &PathBuf) {
        self.debouncer.cancel(path);
    }

    /// Stop the watcher: cancel all pending timers and release the OS
    /// watch handles.
    pub fn stop(&self) {
        self.debouncer.shutdown();
        self.task.abort();
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EventConsumer {
    root: PathBuf,
    exclude: Vec<String>,
    extensions: Vec<String>,
    watcher: Arc<Mutex<RecommendedWatcher>>,
    debouncer: Arc<Debouncer>,
    callback: ChangeCallback,
}

impl EventConsumer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>) {
        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => self.process(event),
                Err(e) => tracing::error!("watcher error: {}", e),
            }
        }
    }

    fn process(&self, event: Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.on_created(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.on_rename(mode, &event.paths),
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.on_modified(path);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.on_deleted(path);
                }
            }
            _ => {}
        }
    }

    fn on_created(&self, path: &Path) {
        if self.is_under_excluded(path) {
            return;
        }
        if path.is_dir() {
            // Required: watch the new directory (and any nested ones) or
            // files created beneath it will never be observed.
            self.watch_new_dir(path);
            return;
        }
        if self.matches(path) {
            self.emit(ChangeKind::Created, path);
        }
    }

    fn on_modified(&self, path: &Path) {
        if self.is_under_excluded(path) || path.is_dir() || !self.matches(path) {
            return;
        }
        self.emit(ChangeKind::Modified, path);
    }

    fn on_deleted(&self, path: &Path) {
        if self.is_under_excluded(path) {
            return;
        }
        // The path is gone, so a directory cannot be told apart from an
        // extensionless file; both pass through and the index applies a
        // prefix removal.
        if self.matches(path) || path.extension().is_none() {
            self.emit(ChangeKind::Deleted, path);
        }
    }

    fn on_rename(&self, mode: RenameMode, paths: &[PathBuf]) {
        match mode {
            RenameMode::From => {
                for path in paths {
                    self.on_deleted(path);
                }
            }
            RenameMode::To => {
                for path in paths {
                    self.on_created(path);
                }
            }
            RenameMode::Both => {
                if let Some(from) = paths.first() {
                    self.on_deleted(from);
                }
                if let Some(to) = paths.get(1) {
                    self.on_created(to);
                }
            }
            _ => {
                // Ambiguous rename: decide by what exists now.
                for path in paths {
                    if path.exists() {
                        self.on_created(path);
                    } else {
                        self.on_deleted(path);
                    }
                }
            }
        }
    }

    fn watch_new_dir(&self, dir: &Path) {
        let name = dir.file_name().map(|n| n.to_string_lossy().into_owned());
        if let Some(name) = name {
            if self.exclude.iter().any(|e| *e == name) {
                return;
            }
        }
        if let Err(e) = self.watcher.lock().watch(dir, RecursiveMode::NonRecursive) {
            tracing::warn!("failed to watch new directory {}: {}", dir.display(), e);
            return;
        }
        tracing::debug!("watching new directory {}", dir.display());
        watch_subdirs(&self.watcher, dir, &self.exclude);

        // Files may already exist by the time the create event arrives
        // (unpacked archives, editors writing whole trees).
        self.emit_existing_files(dir);
    }

    fn emit_existing_files(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot enumerate {}: {}", dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                if !self.exclude.iter().any(|e| *e == name.to_string_lossy()) {
                    self.emit_existing_files(&path);
                }
            } else if self.matches(&path) {
                self.emit(ChangeKind::Created, &path);
            }
        }
    }

    fn emit(&self, kind: ChangeKind, path: &Path) {
        self.debouncer.debounce(
            FileChangeEvent {
                kind,
                path: path.to_path_buf(),
            },
            Arc::clone(&self.callback),
        );
    }

    fn matches(&self, path: &Path) -> bool {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        if is_shadow_config(file_name) {
            return false;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = format!(".{}", ext.to_lowercase());
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }

    fn is_under_excluded(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            self.exclude.iter().any(|e| *e == name)
        })
    }
}

/// Watch every non-excluded subdirectory beneath `dir`. Individual
/// failures are logged and skipped.
fn watch_subdirs(watcher: &Arc<Mutex<RecommendedWatcher>>, dir: &Path, exclude: &[String]) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("cannot enumerate {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if exclude.iter().any(|e| *e == name.to_string_lossy()) {
            continue;
        }
        if let Err(e) = watcher.lock().watch(&path, RecursiveMode::NonRecursive) {
            tracing::warn!("failed to watch {}: {}", path.display(), e);
            continue;
        }
        watch_subdirs(watcher, &path, exclude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::fs;
    use std::time::Duration;

    fn collect_events() -> (ChangeCallback, Arc<PMutex<Vec<FileChangeEvent>>>) {
        let seen: Arc<PMutex<Vec<FileChangeEvent>>> = Arc::new(PMutex::new(Vec::new()));
        let cb: ChangeCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |ev| seen.lock().push(ev))
        };
        (cb, seen)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn file_creation_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, seen) = collect_events();
        let watcher = IndexWatcher::start(
            dir.path().to_path_buf(),
            vec![],
            vec![".json".into()],
            Duration::from_millis(50),
            cb,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(dir.path().join("a.json"), "{}").unwrap();

        assert!(
            wait_for(|| seen
                .lock()
                .iter()
                .any(|e| e.kind == ChangeKind::Created && e.path.ends_with("a.json")))
            .await
        );
        watcher.stop();
    }

    #[tokio::test]
    async fn files_in_new_subdirectories_are_observed() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, seen) = collect_events();
        let watcher = IndexWatcher::start(
            dir.path().to_path_buf(),
            vec![],
            vec![".json".into()],
            Duration::from_millis(50),
            cb,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        // Give the watcher a beat to register the new directory watch
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(sub.join("deep.json"), "{}").unwrap();

        assert!(
            wait_for(|| seen
                .lock()
                .iter()
                .any(|e| e.kind == ChangeKind::Created && e.path.ends_with("deep.json")))
            .await
        );
        watcher.stop();
    }

    #[tokio::test]
    async fn non_matching_extensions_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let (cb, seen) = collect_events();
        let watcher = IndexWatcher::start(
            dir.path().to_path_buf(),
            vec![],
            vec![".json".into()],
            Duration::from_millis(50),
            cb,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join(".tasks.flow.json"), "{}").unwrap();
        fs::write(dir.path().join("real.json"), "{}").unwrap();

        assert!(
            wait_for(|| seen.lock().iter().any(|e| e.path.ends_with("real.json"))).await
        );
        let seen = seen.lock();
        assert!(!seen.iter().any(|e| e.path.ends_with("notes.txt")));
        assert!(!seen.iter().any(|e| e.path.ends_with(".tasks.flow.json")));
        watcher.stop();
    }
}
