//! Process spawning and exit tracking.
//!
//! [`spawn`] starts a child and hands its `Child` to an exit monitor task. The
//! monitor is the only owner of the child: it reaps it and publishes the exit
//! status through a `watch` channel. Everything else talks to the process by
//! PID and observes its exit through [`ProcessHandle`].

use crate::check::process_exists;
use crate::terminate::{force_kill, terminate_gracefully};
use chrono::{DateTime, Utc};
use fleet_common::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How long to wait for exit after SIGKILL.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything needed to start a service process.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Service name, used in logs and errors.
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal, Unix only.
    pub signal: Option<i32>,
    pub exited_at: DateTime<Utc>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            exited_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Result of [`ProcessHandle::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    AlreadyExited,
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Forced,
}

/// A running (or exited) child process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: String,
    pid: u32,
    started_at: DateTime<Utc>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

/// Spawn a process and start its exit monitor.
///
/// Must be called from within a Tokio runtime. The child's stdout and stderr
/// are forwarded to the log, one record per line.
pub fn spawn(spec: &LaunchSpec) -> ProcessResult<ProcessHandle> {
    info!("Spawning process: {} ({})", spec.id, spec.command);

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(&spec.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    if let Some(ref wd) = spec.working_directory {
        cmd.current_dir(wd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::spawn_failed(&spec.id, e.to_string()))?;

    let pid = child
        .id()
        .ok_or_else(|| ProcessError::spawn_failed(&spec.id, "process exited before its PID was read"))?;

    forward_output(&spec.id, &mut child);

    let (exit_tx, exit_rx) = watch::channel(None);
    spawn_exit_monitor(spec.id.clone(), pid, child, exit_tx);

    info!("Process spawned successfully: {} (PID: {})", spec.id, pid);

    Ok(ProcessHandle {
        id: spec.id.clone(),
        pid,
        started_at: Utc::now(),
        exit_rx,
    })
}

fn forward_output(id: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(id.to_string(), "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(id.to_string(), "stderr", stderr));
    }
}

async fn forward_lines<R>(service: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "service_output", service = %service, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Output stream {} of {} closed: {}", stream, service, e);
                break;
            }
        }
    }
}

fn spawn_exit_monitor(
    id: String,
    pid: u32,
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    tokio::spawn(async move {
        debug!("Exit monitor started for {} (PID: {})", id, pid);

        let info = match child.wait().await {
            Ok(status) => {
                let info = ExitInfo::from_status(status);
                if info.success() {
                    info!("Process {} (PID: {}) exited: {}", id, pid, info);
                } else {
                    warn!("Process {} (PID: {}) exited: {}", id, pid, info);
                }
                info
            }
            Err(e) => {
                error!("Failed to wait for process {} (PID: {}): {}", id, pid, e);
                ExitInfo {
                    code: None,
                    signal: None,
                    exited_at: Utc::now(),
                }
            }
        };

        // Receivers may all be gone already
        let _ = exit_tx.send(Some(info));
    });
}

impl ProcessHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit_rx.borrow().clone()
    }

    /// Wait until the process exits.
    pub async fn exited(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let result = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        // The monitor always publishes before dropping the sender, so a closed
        // channel without a value means the monitor task died.
        result.unwrap_or_else(|| ExitInfo {
            code: None,
            signal: None,
            exited_at: Utc::now(),
        })
    }

    /// Wait up to `timeout` for the process to exit. Returns true if it did.
    pub async fn wait_for_exit(&self, timeout: Duration) -> ProcessResult<bool> {
        let mut rx = self.exit_rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|exit| exit.is_some()))
            .await
            .map(|changed| changed.is_ok());
        match waited {
            Ok(true) => Ok(true),
            Ok(false) => process_exists(self.pid).map(|alive| !alive),
            Err(_) => Ok(false),
        }
    }

    /// Stop the process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// The grace wait ends as soon as the process exits.
    pub async fn terminate(&self, grace: Duration) -> ProcessResult<TerminationOutcome> {
        if self.has_exited() {
            debug!("Process {} (PID: {}) already exited", self.id, self.pid);
            return Ok(TerminationOutcome::AlreadyExited);
        }

        info!("Sending SIGTERM to {} (PID: {})", self.id, self.pid);
        if let Err(e) = terminate_gracefully(self.pid) {
            warn!("Failed to send SIGTERM to {}: {}", self.id, e);
        }

        if self.wait_for_exit(grace).await? {
            info!("Process terminated gracefully: {}", self.id);
            return Ok(TerminationOutcome::Graceful);
        }

        warn!(
            "Graceful shutdown timed out for {} (PID: {}) after {:?}, force killing",
            self.id, self.pid, grace
        );
        if let Err(e) = force_kill(self.pid) {
            error!("Force kill failed for {} (PID: {}): {}", self.id, self.pid, e);
        }

        if self.wait_for_exit(FORCE_KILL_TIMEOUT).await? {
            info!("Process terminated after force kill: {}", self.id);
            return Ok(TerminationOutcome::Forced);
        }

        Err(ProcessError::timeout(
            &self.id,
            format!(
                "stop (did not exit after grace period {:?} + force-kill timeout {:?})",
                grace, FORCE_KILL_TIMEOUT
            ),
        ))
    }
}
