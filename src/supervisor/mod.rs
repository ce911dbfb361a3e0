//! Process supervisor for the bridge binary
//!
//! Runs in the parent shell (the launcher). Owns the full lifecycle of the
//! supervised bridge process: spawn with redirected output, health-check
//! until ready, monitor for unexpected exits, restart within a bounded
//! budget, and shut down gracefully (quit request first, force kill as the
//! fallback). One lock gates every lifecycle transition, so at most one
//! start/stop is ever in flight.

pub mod ports;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};

use crate::{BridgeError, Result};

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    CrashedRestarting,
}

/// Snapshot of one supervised process incarnation. Replaced, not mutated,
/// on every (re)start.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub running: bool,
    /// Restart counter value when this incarnation was spawned
    pub restarts: u32,
    pub started_at: SystemTime,
    pub stopped_at: Option<SystemTime>,
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub exe_path: PathBuf,
    pub project_root: PathBuf,
    pub log_dir: PathBuf,
    /// Passed to the bridge only when the file actually exists
    pub config_path: Option<PathBuf>,
    pub port: u16,
    pub max_restarts: u32,
    pub health_interval: Duration,
    pub quit_timeout: Duration,
    pub exit_wait: Duration,
}

impl SupervisorConfig {
    pub fn new(exe_path: PathBuf, project_root: PathBuf, log_dir: PathBuf, port: u16) -> Self {
        Self {
            exe_path,
            project_root,
            log_dir,
            config_path: None,
            port,
            max_restarts: 3,
            health_interval: Duration::from_millis(500),
            quit_timeout: Duration::from_secs(3),
            exit_wait: Duration::from_secs(3),
        }
    }
}

struct Inner {
    state: SupervisorState,
    handle: Option<ProcessHandle>,
    restart_count: u32,
    restarts_cancelled: bool,
    last_failure: Option<BridgeError>,
    kill_tx: Option<mpsc::Sender<()>>,
    exit_rx: Option<watch::Receiver<bool>>,
}

/// Supervisor for one bridge binary
#[derive(Clone)]
pub struct ProcessSupervisor {
    cfg: Arc<SupervisorConfig>,
    inner: Arc<Mutex<Inner>>,
    http: reqwest::Client,
}

impl ProcessSupervisor {
    /// Fresh supervisor; the restart counter starts at zero and is never
    /// reset for the life of this instance.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg: Arc::new(cfg),
            inner: Arc::new(Mutex::new(Inner {
                state: SupervisorState::Stopped,
                handle: None,
                restart_count: 0,
                restarts_cancelled: false,
                last_failure: None,
                kill_tx: None,
                exit_rx: None,
            })),
            http: reqwest::Client::new(),
        }
    }

    pub async fn state(&self) -> SupervisorState {
        self.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        matches!(self.state().await, SupervisorState::Running)
    }

    pub async fn restart_count(&self) -> u32 {
        self.inner.lock().await.restart_count
    }

    /// Wire code of the most recent terminal failure, if any.
    pub async fn last_failure_code(&self) -> Option<&'static str> {
        self.inner.lock().await.last_failure.as_ref().map(|e| e.code())
    }

    pub async fn process_handle(&self) -> Option<ProcessHandle> {
        self.inner.lock().await.handle.clone()
    }

    /// Spawn the bridge process. Rejects when one is already running.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SupervisorState::Stopped | SupervisorState::CrashedRestarting => {}
            state => {
                return Err(BridgeError::ProcessStartFailed {
                    message: format!("bridge is already {:?}", state),
                });
            }
        }
        inner.state = SupervisorState::Starting;

        let child = match self.spawn_bridge() {
            Ok(child) => child,
            Err(e) => {
                inner.state = SupervisorState::Stopped;
                return Err(e);
            }
        };
        let pid = child.id();

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(false);
        inner.handle = Some(ProcessHandle {
            pid,
            running: true,
            restarts: inner.restart_count,
            started_at: SystemTime::now(),
            stopped_at: None,
        });
        inner.kill_tx = Some(kill_tx);
        inner.exit_rx = Some(exit_rx);
        inner.state = SupervisorState::Running;
        tracing::info!("bridge started, pid {:?}", pid);
        drop(inner);

        let supervisor = self.clone();
        tokio::spawn(supervisor.monitor(child, kill_rx, exit_tx));
        Ok(())
    }

    fn spawn_bridge(&self) -> Result<Child> {
        let cfg = &self.cfg;
        if !cfg.exe_path.is_file() {
            return Err(BridgeError::ProcessStartFailed {
                message: format!("bridge executable not found: {}", cfg.exe_path.display()),
            });
        }

        std::fs::create_dir_all(&cfg.log_dir).map_err(|e| BridgeError::ProcessStartFailed {
            message: format!("cannot create log dir {}: {}", cfg.log_dir.display(), e),
        })?;
        let log_path = cfg.log_dir.join("flowbridge.log");
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| BridgeError::ProcessStartFailed {
                message: format!("cannot open log file {}: {}", log_path.display(), e),
            })?;
        let log_stderr = log_file
            .try_clone()
            .map_err(|e| BridgeError::ProcessStartFailed {
                message: format!("cannot clone log handle: {}", e),
            })?;

        let mut cmd = Command::new(&cfg.exe_path);
        cmd.arg("--port")
            .arg(cfg.port.to_string())
            .arg("--root")
            .arg(&cfg.project_root)
            .arg("--log-dir")
            .arg(&cfg.log_dir);
        if let Some(config_path) = &cfg.config_path {
            if config_path.is_file() {
                cmd.arg("--config").arg(config_path);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_stderr))
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

        cmd.spawn().map_err(|e| BridgeError::ProcessStartFailed {
            message: format!("spawn of {} failed: {}", cfg.exe_path.display(), e),
        })
    }

    /// Blocks on the child's exit; a kill request short-circuits the wait.
    async fn monitor(
        self,
        mut child: Child,
        mut kill_rx: mpsc::Receiver<()>,
        exit_tx: watch::Sender<bool>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx.recv() => {
                tracing::warn!("force terminating bridge process");
                let _ = child.start_kill();
                child.wait().await
            }
        };
        match &status {
            Ok(status) => tracing::info!("bridge process exited: {}", status),
            Err(e) => tracing::error!("waiting for bridge process failed: {}", e),
        }

        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.as_mut() {
            handle.running = false;
            handle.stopped_at = Some(SystemTime::now());
        }
        inner.kill_tx = None;
        let _ = exit_tx.send(true);

        // Deliberate stop: nothing more to do
        if !matches!(inner.state, SupervisorState::Running) {
            inner.state = SupervisorState::Stopped;
            return;
        }
        if inner.restarts_cancelled {
            inner.state = SupervisorState::Stopped;
            return;
        }

        inner.state = SupervisorState::CrashedRestarting;
        if inner.restart_count >= self.cfg.max_restarts {
            tracing::error!(
                "bridge crashed and the restart budget of {} is exhausted; giving up",
                self.cfg.max_restarts
            );
            inner.state = SupervisorState::Stopped;
            inner.last_failure = Some(BridgeError::RestartLimitExceeded {
                limit: self.cfg.max_restarts,
            });
            return;
        }

        inner.restart_count += 1;
        let attempt = inner.restart_count;
        tracing::warn!(
            "bridge exited unexpectedly, restarting ({}/{})",
            attempt,
            self.cfg.max_restarts
        );
        drop(inner);

        // Box the recursive `start` future as a `Send` trait object so the
        // compiler can resolve the `monitor` -> `start` -> `spawn(monitor)`
        // auto-trait inference. The coercion lives in a separate module so it
        // is outside `start`'s opaque-type defining scope. Behaviour is
        // identical to awaiting `start` directly.
        if let Err(e) = boxed_restart::boxed_start(self.clone()).await {
            tracing::error!("automatic restart failed: {}", e);
            let mut inner = self.inner.lock().await;
            inner.state = SupervisorState::Stopped;
            inner.last_failure = Some(e);
        }
    }

    /// Poll `GET /health` until success or the deadline elapses.
    pub async fn wait_for_healthy(&self, timeout: Duration) -> Result<()> {
        let url = format!("http://127.0.0.1:{}/health", self.cfg.port);
        let deadline = Instant::now() + timeout;
        loop {
            let probe = self
                .http
                .get(&url)
                .timeout(Duration::from_secs(1))
                .send()
                .await;
            if matches!(probe, Ok(resp) if resp.status().is_success()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::HealthCheckTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.cfg.health_interval).await;
        }
    }

    /// Graceful stop: quit request, bounded wait, force kill as fallback.
    /// The state is `Stopped` afterwards no matter which path was taken.
    pub async fn stop(&self) -> Result<()> {
        let (kill_tx, mut exit_rx) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SupervisorState::Running
                | SupervisorState::Starting
                | SupervisorState::CrashedRestarting => {}
                _ => {
                    inner.state = SupervisorState::Stopped;
                    return Ok(());
                }
            }
            inner.state = SupervisorState::Stopping;
            (inner.kill_tx.clone(), inner.exit_rx.clone())
        };

        tracing::info!("stopping bridge process");
        let quit_url = format!("http://127.0.0.1:{}/quit", self.cfg.port);
        let quit_ok = matches!(
            self.http
                .post(&quit_url)
                .timeout(self.cfg.quit_timeout)
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        );

        let mut exited = false;
        if quit_ok {
            exited = wait_for_exit(&mut exit_rx, self.cfg.exit_wait).await;
            if exited {
                tracing::info!("bridge exited gracefully");
            } else {
                tracing::warn!("bridge ignored the quit request");
            }
        } else {
            tracing::warn!("quit request failed, force terminating");
        }

        if !exited {
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(()).await;
            }
            if !wait_for_exit(&mut exit_rx, self.cfg.exit_wait).await {
                tracing::error!("bridge did not exit after kill");
            }
        }

        self.inner.lock().await.state = SupervisorState::Stopped;
        Ok(())
    }

    /// Cancel any further restart attempts, then stop. For parent-process
    /// termination.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.lock().await.restarts_cancelled = true;
        self.stop().await
    }
}

mod boxed_restart {
    use super::{ProcessSupervisor, Result};
    use std::future::Future;
    use std::pin::Pin;

    /// Type-erase `start`'s opaque future into a `Send` boxed future, outside
    /// `start`'s defining scope, so the `monitor` -> `start` recursion's
    /// auto-trait inference resolves.
    pub(super) fn boxed_start(
        s: ProcessSupervisor,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move { s.start().await })
    }
}

async fn wait_for_exit(rx: &mut Option<watch::Receiver<bool>>, timeout: Duration) -> bool {
    let Some(rx) = rx.as_mut() else {
        return true;
    };
    let wait = async {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(timeout, wait).await;
    *rx.borrow()
}
