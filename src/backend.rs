/// Process backend: the seam between the pool's bookkeeping and the OS.
///
/// The pool never touches processes directly; it goes through this
/// trait, so tests can drive the whole lifecycle with a fake backend
/// and no real child processes.
use std::collections::HashMap;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::role::WORKER_ENV;
use crate::signals::ControlMessage;

/// Asynchronous notifications about worker processes, delivered to the
/// supervisor's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// The OS reports the worker running.
    Online(u32),
    /// The worker terminated, cleanly or not.
    Exit {
        pid: u32,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The grace timer for this worker fired.
    GraceExpired(u32),
}

/// Errors creating a worker process.
#[derive(Debug)]
pub enum SpawnError {
    /// Could not resolve the path of the running executable.
    Exe { source: std::io::Error },
    /// The OS refused to create the process.
    Spawn { source: std::io::Error },
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::Exe { source } => {
                write!(f, "failed to resolve current executable: {}", source)
            }
            SpawnError::Spawn { source } => {
                write!(f, "failed to spawn worker process: {}", source)
            }
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::Exe { source } => Some(source),
            SpawnError::Spawn { source } => Some(source),
        }
    }
}

/// Operations the pool needs from the OS, per worker.
///
/// All control operations are fire-and-forget: completions come back
/// later as [`PoolEvent`]s on the channel handed to `spawn`.
pub trait ProcessBackend: Send {
    /// Start one worker process. `Online`/`Exit` events for it are
    /// reported asynchronously on `events`.
    fn spawn(&mut self, events: &mpsc::UnboundedSender<PoolEvent>) -> Result<u32, SpawnError>;

    /// Deliver the structured shutdown message to a worker.
    fn send_shutdown(&mut self, pid: u32);

    /// SIGKILL a worker. An already-dead pid is a harmless no-op.
    fn force_kill(&mut self, pid: u32);

    /// Relay the info signal (SIGUSR2) to a worker.
    fn relay_info(&self, pid: u32);
}

/// Real backend: re-executes the current binary with the worker env
/// marker set, keeping each child's stdin piped for control messages.
pub struct OsBackend {
    stdins: HashMap<u32, ChildStdin>,
}

impl OsBackend {
    pub fn new() -> Self {
        Self {
            stdins: HashMap::new(),
        }
    }
}

impl Default for OsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend for OsBackend {
    fn spawn(&mut self, events: &mpsc::UnboundedSender<PoolEvent>) -> Result<u32, SpawnError> {
        let exe = std::env::current_exe().map_err(|e| SpawnError::Exe { source: e })?;

        let mut child = Command::new(&exe)
            .args(std::env::args_os().skip(1))
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| SpawnError::Spawn { source: e })?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(SpawnError::Spawn {
                    source: std::io::Error::other("spawned worker exited before pid was read"),
                })
            }
        };

        if let Some(stdin) = child.stdin.take() {
            self.stdins.insert(pid, stdin);
        }

        let tx = events.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let (code, signal) = match &status {
                Ok(status) => {
                    use std::os::unix::process::ExitStatusExt;
                    (status.code(), status.signal())
                }
                Err(_) => (None, None),
            };
            let _ = tx.send(PoolEvent::Exit { pid, code, signal });
        });

        // No separate readiness handshake: the process table is the
        // source of truth, so a successful spawn reports online.
        let _ = events.send(PoolEvent::Online(pid));
        Ok(pid)
    }

    fn send_shutdown(&mut self, pid: u32) {
        let Some(mut stdin) = self.stdins.remove(&pid) else {
            debug!(pid, "no stdin pipe for worker, skipping shutdown message");
            return;
        };
        let Ok(mut line) = serde_json::to_string(&ControlMessage::Shutdown) else {
            return;
        };
        line.push('\n');
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(pid, error = %e, "failed to deliver shutdown message");
            }
        });
    }

    fn force_kill(&mut self, pid: u32) {
        self.stdins.remove(&pid);
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => debug!(pid, "sent SIGKILL"),
            Err(Errno::ESRCH) => debug!(pid, "worker already gone, kill skipped"),
            Err(e) => debug!(pid, error = %e, "failed to kill worker"),
        }
    }

    fn relay_info(&self, pid: u32) {
        match kill(Pid::from_raw(pid as i32), Signal::SIGUSR2) {
            Ok(()) => {}
            Err(Errno::ESRCH) => debug!(pid, "worker already gone, info relay skipped"),
            Err(e) => debug!(pid, error = %e, "failed to relay info signal"),
        }
    }
}
