//! Managed backend clients
//!
//! A [`ManagedClient`] owns one backend process of one plugin. The supervisor
//! only needs three things from it: start the process, stop it, and tell
//! whether it has exited since it was last started.
//!
//! [`ProcessClient`] is the implementation for local executables. It spawns
//! the backend, waits for the handshake line on stdout, forwards everything
//! the backend prints afterwards to `tracing`, and watches for exit.

use super::handshake::{parse_handshake, Endpoint};
use async_trait::async_trait;
use sdk::errors::HostError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Environment variable carrying the plugin ID
pub const ENV_PLUGIN_ID: &str = "GF_PLUGIN_ID";
/// Magic cookie a backend checks to know it was started by a host
pub const MAGIC_COOKIE_KEY: &str = "grafana_plugin_type";
pub const MAGIC_COOKIE_VALUE: &str = "datasource";
/// Environment variable listing the app protocol versions the host speaks
pub const ENV_PROTOCOL_VERSIONS: &str = "PLUGIN_PROTOCOL_VERSIONS";
pub const PROTOCOL_VERSIONS: &str = "2";

/// Lifecycle handle of one plugin backend
#[async_trait]
pub trait ManagedClient: Send + Sync {
    /// Start the backend; a no-op while it is already running
    async fn start(&self) -> Result<(), HostError>;

    /// Stop the backend; a no-op when it is not running
    async fn stop(&self) -> Result<(), HostError>;

    /// Whether a started backend has since exited
    fn exited(&self) -> bool;

    /// Where the running backend listens, if known
    fn endpoint(&self) -> Option<Endpoint> {
        None
    }
}

/// Timing and environment of backend processes
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub handshake_timeout: Duration,
    pub stop_grace_period: Duration,
    pub env: BTreeMap<String, String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            stop_grace_period: Duration::from_secs(5),
            env: BTreeMap::new(),
        }
    }
}

struct RunningProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<bool>,
    waiter: JoinHandle<()>,
}

/// Backend running as a local child process
pub struct ProcessClient {
    plugin_id: String,
    executable: PathBuf,
    working_dir: PathBuf,
    settings: ProcessSettings,
    running: Mutex<Option<RunningProcess>>,
    exited: Arc<AtomicBool>,
    endpoint: std::sync::Mutex<Option<Endpoint>>,
}

impl ProcessClient {
    pub fn new(
        plugin_id: impl Into<String>,
        executable: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        settings: ProcessSettings,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            executable: executable.into(),
            working_dir: working_dir.into(),
            settings,
            running: Mutex::new(None),
            exited: Arc::new(AtomicBool::new(false)),
            endpoint: std::sync::Mutex::new(None),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn spawn_error(&self, reason: impl Into<String>) -> HostError {
        HostError::ProcessSpawn {
            plugin_id: self.plugin_id.clone(),
            reason: reason.into(),
        }
    }

    fn handshake_error(&self, reason: impl Into<String>) -> HostError {
        HostError::Handshake {
            plugin_id: self.plugin_id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ManagedClient for ProcessClient {
    async fn start(&self) -> Result<(), HostError> {
        let mut running = self.running.lock().await;
        if let Some(process) = running.as_ref() {
            if !*process.exit_rx.borrow() {
                return Ok(());
            }
        }
        *running = None;

        let plugin_id = self.plugin_id.clone();
        tracing::info!(plugin_id = %plugin_id, executable = %self.executable.display(), "Starting plugin backend");

        let mut child = Command::new(&self.executable)
            .current_dir(&self.working_dir)
            .env(ENV_PLUGIN_ID, &self.plugin_id)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .env(ENV_PROTOCOL_VERSIONS, PROTOCOL_VERSIONS)
            .envs(&self.settings.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.spawn_error("stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(
                plugin_id.clone(),
                "stderr",
                BufReader::new(stderr).lines(),
            ));
        }

        let mut stdout_lines = BufReader::new(stdout).lines();
        let handshake = match timeout(self.settings.handshake_timeout, stdout_lines.next_line()).await {
            Ok(Ok(Some(line))) => parse_handshake(&line).map_err(|e| e.to_string()),
            Ok(Ok(None)) => Err("process exited before the handshake".to_string()),
            Ok(Err(e)) => Err(format!("failed to read handshake: {}", e)),
            Err(_) => Err(format!(
                "no handshake within {:?}",
                self.settings.handshake_timeout
            )),
        };

        let endpoint = match handshake {
            Ok(endpoint) => endpoint,
            Err(reason) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(plugin_id = %plugin_id, "Failed to kill backend after handshake failure: {}", e);
                }
                return Err(self.handshake_error(reason));
            }
        };

        tracing::info!(plugin_id = %plugin_id, %endpoint, "Plugin backend started");
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = Some(endpoint);

        tokio::spawn(forward_lines(plugin_id.clone(), "stdout", stdout_lines));

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exited = Arc::clone(&self.exited);
        exited.store(false, Ordering::SeqCst);

        let waiter = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(plugin_id = %plugin_id, "Failed to kill backend: {}", e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => tracing::info!(plugin_id = %plugin_id, "Plugin backend exited: {}", status),
                Err(e) => tracing::warn!(plugin_id = %plugin_id, "Failed to wait for backend: {}", e),
            }

            exited.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(true);
        });

        *running = Some(RunningProcess {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
            waiter,
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        let Some(mut process) = self.running.lock().await.take() else {
            return Ok(());
        };
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if !*process.exit_rx.borrow() {
            tracing::info!(plugin_id = %self.plugin_id, "Stopping plugin backend");

            let terminated = process.pid.map(terminate).unwrap_or(false);
            let mut exit_rx = process.exit_rx.clone();
            let graceful = terminated
                && timeout(self.settings.stop_grace_period, exit_rx.wait_for(|exited| *exited))
                    .await
                    .is_ok();

            if !graceful {
                tracing::warn!(
                    plugin_id = %self.plugin_id,
                    "Backend did not exit within {:?}, killing it",
                    self.settings.stop_grace_period
                );
                if let Some(kill_tx) = process.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
            }
        }

        process.waiter.await.map_err(|e| HostError::ProcessStop {
            plugin_id: self.plugin_id.clone(),
            reason: e.to_string(),
        })
    }

    fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Ask the process to exit; returns whether the signal was delivered
#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send SIGTERM to {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}

async fn forward_lines<R>(plugin_id: String, stream: &'static str, mut lines: Lines<R>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(plugin_id = %plugin_id, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(plugin_id = %plugin_id, stream, "Stopped reading backend output: {}", e);
                break;
            }
        }
    }
}
