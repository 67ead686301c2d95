#![forbid(unsafe_code)]

//! `agent-bridge` — runs one coding-agent backend session over stdio.
//!
//! Spawns the backend, drives the adapter, reads browser commands as NDJSON
//! from stdin, and writes browser events as NDJSON to stdout.  Logs go to
//! stderr.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{Stdin, Stdout};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::adapter::{spawn_adapter, Adapter, AdapterHandle, AdapterOutput};
use agent_bridge::browser::{BrowserCommand, BrowserEvent};
use agent_bridge::models::session::PermissionMode;
use agent_bridge::rpc::codec::{Frame, RpcCodec};
use agent_bridge::spawner::{monitor_exit, spawn_backend};
use agent_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Coding-agent backend to browser session bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for the backend thread (defaults to the current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Model to request, overriding `default_model`.
    #[arg(long)]
    model: Option<String>,

    /// Resume an existing backend thread instead of starting a new one.
    #[arg(long)]
    resume: Option<String>,

    /// Permission mode, overriding the configured one.
    #[arg(long)]
    permission_mode: Option<String>,

    /// Browser-facing session id (random when omitted).
    #[arg(long)]
    session_id: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(model) = args.model {
        config.default_model = model;
    }
    if let Some(mode) = args.permission_mode {
        mode.parse::<PermissionMode>()?;
        config.permission_mode = mode;
    }

    let cwd = match args.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|err| AppError::Config(format!("cannot determine working directory: {err}")))?,
    };
    let cwd = cwd
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid working directory: {err}")))?;

    let session_id = args
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(session_id, cwd = %cwd.display(), "agent-bridge starting");

    // ── Spawn backend and adapter ───────────────────────
    let process = spawn_backend(&config.spawn_config(&cwd), &session_id)?;
    let mut options = config.adapter_options(&session_id, cwd.to_string_lossy())?;
    options.resume_thread_id = args.resume;

    let Adapter {
        handle,
        mut output,
        task,
    } = spawn_adapter(options, process.stdout, process.stdin);

    let cancel = CancellationToken::new();
    let (exit_tx, exit_rx) = oneshot::channel();
    let monitor = monitor_exit(session_id.clone(), process.child, exit_tx, cancel.clone());
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Ok(exit) = exit_rx.await {
                handle.shutdown(&exit.reason).await;
            }
        });
    }

    let (notice_tx, mut notice_rx) = mpsc::channel::<BrowserEvent>(16);
    let input = tokio::spawn(forward_commands(
        tokio::io::stdin(),
        handle.clone(),
        notice_tx,
        cancel.clone(),
    ));

    // ── Event loop ──────────────────────────────────────
    let mut sink = FramedWrite::new(tokio::io::stdout(), RpcCodec::new());
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut signalled = false;
    let mut init_error = None;

    loop {
        tokio::select! {
            out = output.recv() => match out {
                Some(AdapterOutput::Browser(event)) => write_event(&mut sink, &event).await?,
                Some(AdapterOutput::SessionMeta(meta)) => {
                    info!(session_id = %meta.session_id, thread_id = ?meta.thread_id, model = %meta.model, "session ready");
                }
                Some(AdapterOutput::InitFailed { message }) => {
                    error!(%message, "backend initialization failed");
                    init_error = Some(message);
                }
                Some(AdapterOutput::Disconnected { reason }) => {
                    info!(%reason, "session ended");
                    break;
                }
                None => break,
            },
            Some(notice) = notice_rx.recv() => write_event(&mut sink, &notice).await?,
            () = &mut signal, if !signalled => {
                signalled = true;
                info!("shutdown signal received");
                handle.shutdown("bridge shutting down").await;
            }
        }
    }

    // ── Teardown ────────────────────────────────────────
    cancel.cancel();
    input.abort();
    if let Err(err) = task.await {
        warn!(%err, "adapter task ended abnormally");
    }
    if let Err(err) = monitor.await {
        warn!(%err, "exit monitor ended abnormally");
    }
    process.stderr_task.abort();

    match init_error {
        Some(message) => Err(AppError::Init(message)),
        None => Ok(()),
    }
}

/// Read browser commands from stdin until EOF, then shut the adapter down.
async fn forward_commands(
    stdin: Stdin,
    handle: AdapterHandle,
    notices: mpsc::Sender<BrowserEvent>,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(stdin, RpcCodec::new());
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = lines.next() => frame,
        };
        let line = match frame {
            Some(Ok(Frame::Line(line))) => line,
            Some(Ok(Frame::Skipped(reason))) => {
                warn!(%reason, "skipping unreadable browser line");
                continue;
            }
            Some(Err(err)) => {
                warn!(%err, "browser input failed");
                break;
            }
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command: BrowserCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "ignoring malformed browser command");
                continue;
            }
        };
        debug!(kind = command.kind(), "browser command");

        match handle.send_browser_message(command).await {
            Ok(()) => {}
            Err(AppError::Unsupported(message)) => {
                let _ = notices.send(BrowserEvent::Error { message }).await;
            }
            Err(err) => {
                warn!(%err, "adapter rejected browser command");
                return;
            }
        }
    }
    handle.shutdown("browser input closed").await;
}

async fn write_event(sink: &mut FramedWrite<Stdout, RpcCodec>, event: &BrowserEvent) -> Result<()> {
    let line = serde_json::to_string(event)
        .map_err(|err| AppError::Rpc(format!("failed to serialise browser event: {err}")))?;
    sink.send(line).await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
