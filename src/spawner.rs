//! Backend process spawner.
//!
//! Launches the backend with piped stdio, a cleared environment plus
//! [`ALLOWED_ENV_VARS`], and `kill_on_drop(true)` so the process never
//! outlives its session.  Stderr is drained line by line into
//! the log (target `backend_stderr`) so a chatty backend cannot fill the pipe
//! and stall.  [`monitor_exit`] reports process exit so the host can route it
//! into the adapter's disconnect path.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the backend process.
///
/// Everything else is stripped with `env_clear()`.  The session id is
/// injected separately as `AGENT_BRIDGE_SESSION_ID`.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TERM",
    "SSL_CERT_FILE",
    "CODEX_HOME",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Configuration ────────────────────────────────────────────────────────────

/// Parameters for launching a backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Backend executable (e.g. `codex`).
    pub backend_bin: String,
    /// Arguments (e.g. `["app-server"]`).
    pub backend_args: Vec<String>,
    /// Working directory of the child.
    pub cwd: PathBuf,
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A running backend process with its stdio split out.
#[derive(Debug)]
pub struct BackendProcess {
    /// Child handle; dropping it kills the process.
    pub child: Child,
    /// Backend stdin, for the adapter's writer.
    pub stdin: ChildStdin,
    /// Backend stdout, for the adapter's reader.
    pub stdout: ChildStdout,
    /// Stderr drain task.
    pub stderr_task: JoinHandle<()>,
}

/// How the backend process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal or unknown.
    pub exit_code: Option<i32>,
    /// Human-readable description.
    pub reason: String,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Launch the backend for `session_id`.
///
/// # Errors
///
/// - `AppError::Init("failed to spawn backend: …")` on OS spawn failure.
/// - `AppError::Init("failed to capture backend …")` if a pipe is missing.
pub fn spawn_backend(config: &SpawnConfig, session_id: &str) -> Result<BackendProcess> {
    let mut cmd = Command::new(&config.backend_bin);
    cmd.args(&config.backend_args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("AGENT_BRIDGE_SESSION_ID", session_id);

    cmd.current_dir(&config.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Init(format!(
            "failed to spawn backend '{}': {err}",
            config.backend_bin
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Init("failed to capture backend stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Init("failed to capture backend stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Init("failed to capture backend stderr".into()))?;

    info!(
        session_id,
        backend = %config.backend_bin,
        args = ?config.backend_args,
        cwd = %config.cwd.display(),
        pid = child.id(),
        "backend process spawned"
    );

    Ok(BackendProcess {
        child,
        stdin,
        stdout,
        stderr_task: drain_stderr(session_id.to_owned(), stderr),
    })
}

/// Log every stderr line until the pipe closes.
fn drain_stderr(session_id: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "backend_stderr", session_id, "{line}");
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(target: "backend_stderr", session_id, %err, "stderr read failed");
                    break;
                }
            }
        }
    })
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Await child exit and report it on `exit_tx`.
///
/// When `cancel` fires first the child is killed and nothing is reported;
/// the caller is already tearing down.
#[must_use]
pub fn monitor_exit(
    session_id: String,
    mut child: Child,
    exit_tx: oneshot::Sender<ProcessExit>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let exit = match result {
                    Ok(status) => {
                        let exit_code = status.code();
                        let reason = exit_code.map_or_else(
                            || "backend terminated by signal".to_owned(),
                            |c| format!("backend exited with code {c}"),
                        );
                        ProcessExit { exit_code, reason }
                    }
                    Err(err) => {
                        warn!(session_id, %err, "error waiting for backend process");
                        ProcessExit {
                            exit_code: None,
                            reason: format!("wait error: {err}"),
                        }
                    }
                };
                info!(session_id, exit_code = ?exit.exit_code, "backend process exited");
                if exit_tx.send(exit).is_err() {
                    debug!(session_id, "exit receiver dropped");
                }
            }
            () = cancel.cancelled() => {
                info!(session_id, "exit monitor cancelled, killing backend");
                child.kill().await.ok();
            }
        }
    })
}
