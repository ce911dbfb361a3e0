//! Per-path debouncing of file change events
//!
//! Each path owns a reset-on-repeat timer: a new event for the path aborts
//! and restarts the timer, and only an uninterrupted expiry runs the
//! callback, with the kind of the final event. The pending table lock is
//! held only around insert/cancel/replace, never across callback execution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use super::watcher::{ChangeKind, FileChangeEvent};

/// Default quiet window required after the last event for a path.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Callback invoked with the effective (coalesced) event.
pub type ChangeCallback = Arc<dyn Fn(FileChangeEvent) + Send + Sync>;

struct Pending {
    generation: u64,
    kind: ChangeKind,
    abort: Option<AbortHandle>,
}

struct State {
    pending: HashMap<PathBuf, Pending>,
    next_generation: u64,
    stopped: bool,
}

/// Keyed debouncer over tokio timer tasks.
pub struct Debouncer {
    window: Duration,
    state: Arc<Mutex<State>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Arc::new(Mutex::new(State {
                pending: HashMap::new(),
                next_generation: 0,
                stopped: false,
            })),
        }
    }

    /// Register an event for `path`, restarting its timer.
    pub fn debounce(&self, event: FileChangeEvent, callback: ChangeCallback) {
        let path = event.path.clone();
        let generation = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            match state.pending.get_mut(&path) {
                Some(pending) => {
                    if let Some(abort) = pending.abort.take() {
                        abort.abort();
                    }
                    pending.generation = generation;
                    pending.kind = event.kind;
                }
                None => {
                    state.pending.insert(
                        path.clone(),
                        Pending {
                            generation,
                            kind: event.kind,
                            abort: None,
                        },
                    );
                }
            }
            generation
        };

        let window = self.window;
        let state = Arc::clone(&self.state);
        let timer_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let fired = {
                let mut state = state.lock();
                match state.pending.get(&timer_path) {
                    // A newer event replaced this timer; it no longer speaks
                    // for the path.
                    Some(pending) if pending.generation != generation => None,
                    Some(_) => state.pending.remove(&timer_path).map(|p| p.kind),
                    None => None,
                }
            };

            if let Some(kind) = fired {
                callback(FileChangeEvent {
                    kind,
                    path: timer_path,
                });
            }
        });

        let mut state = self.state.lock();
        if let Some(pending) = state.pending.get_mut(&path) {
            if pending.generation == generation {
                pending.abort = Some(handle.abort_handle());
            }
        }
    }

    /// Drop any pending timer for `path` without firing it.
    pub fn cancel(&self, path: &PathBuf) {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.remove(path) {
            if let Some(abort) = pending.abort {
                abort.abort();
            }
        }
    }

    /// Cancel every pending timer and refuse further events.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        for (_, pending) in state.pending.drain() {
            if let Some(abort) = pending.abort {
                abort.abort();
            }
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(path: &str, kind: ChangeKind) -> FileChangeEvent {
        FileChangeEvent {
            kind,
            path: PathBuf::from(path),
        }
    }

    #[tokio::test]
    async fn many_events_one_callback() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let cb: ChangeCallback = {
            let count = Arc::clone(&count);
            Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        for _ in 0..10 {
            debouncer.debounce(event("/p/a.json", ChangeKind::Modified), Arc::clone(&cb));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[tokio::test]
    async fn final_kind_wins() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb: ChangeCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |ev| seen.lock().push(ev.kind))
        };

        debouncer.debounce(event("/p/a.json", ChangeKind::Created), Arc::clone(&cb));
        debouncer.debounce(event("/p/a.json", ChangeKind::Modified), Arc::clone(&cb));
        debouncer.debounce(event("/p/a.json", ChangeKind::Deleted), Arc::clone(&cb));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock(), vec![ChangeKind::Deleted]);
    }

    #[tokio::test]
    async fn distinct_paths_fire_independently() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let cb: ChangeCallback = {
            let count = Arc::clone(&count);
            Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        debouncer.debounce(event("/p/a.json", ChangeKind::Modified), Arc::clone(&cb));
        debouncer.debounce(event("/p/b.json", ChangeKind::Modified), Arc::clone(&cb));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_discards_pending_timer() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let cb: ChangeCallback = {
            let count = Arc::clone(&count);
            Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        debouncer.debounce(event("/p/a.json", ChangeKind::Modified), Arc::clone(&cb));
        debouncer.cancel(&PathBuf::from("/p/a.json"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));
        let cb: ChangeCallback = {
            let count = Arc::clone(&count);
            Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        debouncer.debounce(event("/p/a.json", ChangeKind::Modified), Arc::clone(&cb));
        debouncer.shutdown();
        debouncer.debounce(event("/p/b.json", ChangeKind::Modified), Arc::clone(&cb));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.pending_len(), 0);
    }
}
