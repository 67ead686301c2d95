//! Backend ↔ browser session adapter.
//!
//! One adapter serves one browser session backed by one backend process.
//! [`spawn_adapter`] wires the backend's stdio into a reader task, a writer
//! task, and a single session actor; the actor owns every piece of mutable
//! session state (pending calls, approvals, translation buffers, the queue
//! of early browser commands) so none of it is shared or locked.
//!
//! # Lifecycle
//!
//! ```text
//! Initializing ──(initialize, initialized, thread/start|resume)──► Ready
//!      │                                                            │
//!      └──────────────(stream closed / shutdown / failure)──────────┴─► Disconnected
//! ```
//!
//! While initializing, `user_message` and `permission_response` commands
//! are queued and flushed in arrival order once the thread is open; other
//! commands are dropped.  Disconnection runs exactly once: pending calls
//! fail, pending approvals are withdrawn, and `cli_disconnected` is emitted.

pub mod approval;
pub mod translate;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::browser::{BrowserCommand, BrowserEvent, SessionSnapshot};
use crate::models::item::AgentItem;
use crate::models::session::{PermissionMode, SessionMeta};
use crate::rpc::correlator::{CallOutcome, Correlator, Dispatch, PendingCall};
use crate::rpc::message::{RequestId, RpcMessage};
use crate::rpc::reader::{run_reader, Inbound};
use crate::rpc::writer::run_writer;
use crate::{AppError, Result};

use self::approval::{build_permission_request, ApprovalBook, ApprovalKind};
use self::translate::Translator;

// ── Backend methods ──────────────────────────────────────────────────────────

const METHOD_INITIALIZE: &str = "initialize";
const METHOD_INITIALIZED: &str = "initialized";
const METHOD_THREAD_START: &str = "thread/start";
const METHOD_THREAD_RESUME: &str = "thread/resume";
const METHOD_TURN_START: &str = "turn/start";
const METHOD_TURN_INTERRUPT: &str = "turn/interrupt";

/// Backend kind reported in the session snapshot.
pub const BACKEND_TYPE: &str = "codex";

// ── Public types ─────────────────────────────────────────────────────────────

/// Parameters for one adapter instance.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Browser-facing session id.
    pub session_id: String,
    /// Requested model; `None` lets the backend choose.
    pub model: Option<String>,
    /// Working directory for the thread.
    pub cwd: String,
    /// Permission mode; decides the backend approval policy.
    pub permission_mode: PermissionMode,
    /// Resume this backend thread instead of starting a new one.
    pub resume_thread_id: Option<String>,
    /// Backend sandbox policy name.
    pub sandbox: String,
    /// Name announced in `clientInfo`.
    pub client_name: String,
    /// Upper bound on waiting for any single backend response.
    pub call_timeout: Option<Duration>,
    /// Capacity of the internal bounded channels.
    pub channel_capacity: usize,
}

impl AdapterOptions {
    /// Options with defaults for everything but the session id and cwd.
    #[must_use]
    pub fn new(session_id: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model: None,
            cwd: cwd.into(),
            permission_mode: PermissionMode::Default,
            resume_thread_id: None,
            sandbox: "workspace-write".to_owned(),
            client_name: "agent-bridge".to_owned(),
            call_timeout: None,
            channel_capacity: 256,
        }
    }
}

/// Connection state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Handshake or thread negotiation in progress.
    Initializing,
    /// Thread open; commands are forwarded.
    Ready,
    /// Backend gone; terminal.
    Disconnected,
}

/// Everything the adapter reports to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOutput {
    /// Event for the browser.
    Browser(BrowserEvent),
    /// Session metadata is known (emitted once the thread is open).
    SessionMeta(SessionMeta),
    /// Handshake or thread negotiation failed.
    InitFailed {
        /// Failure description.
        message: String,
    },
    /// The adapter is disconnected; nothing follows.
    Disconnected {
        /// Why.
        reason: String,
    },
}

#[derive(Debug)]
enum Control {
    Command(BrowserCommand),
    Shutdown { reason: String },
}

/// Cloneable handle for feeding the adapter.
#[derive(Debug, Clone)]
pub struct AdapterHandle {
    session_id: String,
    control: mpsc::Sender<Control>,
    state: watch::Receiver<AdapterState>,
}

impl AdapterHandle {
    /// Browser-facing session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    /// Whether the thread is open and commands are forwarded immediately.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == AdapterState::Ready
    }

    /// Wait until the adapter leaves [`AdapterState::Initializing`].
    pub async fn wait_initialized(&mut self) -> AdapterState {
        match self
            .state
            .wait_for(|s| *s != AdapterState::Initializing)
            .await
        {
            Ok(state) => *state,
            Err(_) => AdapterState::Disconnected,
        }
    }

    /// Hand a browser command to the adapter.
    ///
    /// # Errors
    ///
    /// - [`AppError::Unsupported`] for runtime model or permission-mode
    ///   switches, which this backend cannot apply to an open thread.
    /// - [`AppError::Disconnected`] if the adapter has stopped.
    pub async fn send_browser_message(&self, command: BrowserCommand) -> Result<()> {
        match &command {
            BrowserCommand::SetModel { model } => {
                warn!(session_id = %self.session_id, model, "runtime model switch not supported");
                return Err(AppError::Unsupported(format!(
                    "cannot switch model to '{model}' on an open thread"
                )));
            }
            BrowserCommand::SetPermissionMode { mode } => {
                warn!(session_id = %self.session_id, mode, "runtime permission mode switch not supported");
                return Err(AppError::Unsupported(format!(
                    "cannot switch permission mode to '{mode}' on an open thread"
                )));
            }
            _ => {}
        }
        self.control
            .send(Control::Command(command))
            .await
            .map_err(|_| {
                AppError::Disconnected(format!("session '{}' adapter stopped", self.session_id))
            })
    }

    /// Disconnect the adapter.  Safe to call repeatedly.
    pub async fn shutdown(&self, reason: &str) {
        let request = Control::Shutdown {
            reason: reason.to_owned(),
        };
        if self.control.send(request).await.is_err() {
            debug!(session_id = %self.session_id, "shutdown: adapter already stopped");
        }
    }
}

/// A running adapter.
#[derive(Debug)]
pub struct Adapter {
    /// Command handle.
    pub handle: AdapterHandle,
    /// Everything the adapter emits, in order.
    pub output: mpsc::Receiver<AdapterOutput>,
    /// Actor task; finishes after disconnection.
    pub task: JoinHandle<()>,
}

/// Start an adapter over a backend's stdout (`reader`) and stdin (`writer`).
///
/// The handshake begins immediately.  Must be called within a tokio runtime.
#[must_use]
pub fn spawn_adapter<R, W>(options: AdapterOptions, reader: R, writer: W) -> Adapter
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let capacity = options.channel_capacity.max(1);
    let session_id = options.session_id.clone();
    let cancel = CancellationToken::new();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Value>(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(capacity);
    let (control_tx, control_rx) = mpsc::channel::<Control>(capacity);
    let (output_tx, output_rx) = mpsc::channel::<AdapterOutput>(capacity);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();
    let (state_tx, state_rx) = watch::channel(AdapterState::Initializing);

    {
        let session_id = session_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_writer(session_id.clone(), writer, outbound_rx, cancel).await {
                warn!(session_id, %err, "backend writer stopped");
            }
        });
    }
    {
        let session_id = session_id.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_reader(session_id.clone(), reader, inbound_tx, cancel).await {
                warn!(session_id, %err, "backend reader stopped");
            }
        });
    }

    let actor = SessionActor {
        rpc: Correlator::new(session_id.clone(), outbound_tx),
        meta: SessionMeta {
            session_id: session_id.clone(),
            thread_id: None,
            model: options.model.clone().unwrap_or_default(),
            cwd: options.cwd.clone(),
            permission_mode: options.permission_mode,
        },
        translator: Translator::new(session_id.clone()),
        approvals: ApprovalBook::new(),
        queued: VecDeque::new(),
        in_flight: HashMap::new(),
        state: AdapterState::Initializing,
        init_failed: false,
        active_turn: None,
        turn_started_at: None,
        num_turns: 0,
        output: output_tx,
        completions: completion_tx,
        state_tx,
        options,
    };

    let task = tokio::spawn(async move {
        actor.run(inbound_rx, control_rx, completion_rx).await;
        cancel.cancel();
    });

    Adapter {
        handle: AdapterHandle {
            session_id,
            control: control_tx,
            state: state_rx,
        },
        output: output_rx,
        task,
    }
}

// ── Actor ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPurpose {
    Initialize,
    OpenThread,
    StartTurn,
    InterruptTurn,
}

/// Out-of-band call events; answers themselves arrive with the inbound
/// stream so they are handled in wire order.
#[derive(Debug)]
enum Completion {
    /// The request could not be written.
    SendFailed { purpose: CallPurpose, err: AppError },
    /// The per-call timer for `id` ran out.
    Expired { id: i64 },
}

#[derive(Debug)]
struct InFlight {
    purpose: CallPurpose,
    call: PendingCall,
}

struct SessionActor {
    options: AdapterOptions,
    rpc: Correlator,
    meta: SessionMeta,
    translator: Translator,
    approvals: ApprovalBook,
    queued: VecDeque<BrowserCommand>,
    in_flight: HashMap<i64, InFlight>,
    state: AdapterState,
    init_failed: bool,
    active_turn: Option<String>,
    turn_started_at: Option<Instant>,
    num_turns: u32,
    output: mpsc::Sender<AdapterOutput>,
    completions: mpsc::UnboundedSender<Completion>,
    state_tx: watch::Sender<AdapterState>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut inbound_rx: mpsc::Receiver<Inbound>,
        mut control_rx: mpsc::Receiver<Control>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(session_id = %self.options.session_id, "adapter starting handshake");
        self.start_handshake().await;

        while self.state != AdapterState::Disconnected {
            tokio::select! {
                biased;

                Some(done) = completion_rx.recv() => self.on_completion(done).await,

                inbound = inbound_rx.recv() => match inbound {
                    Some(Inbound::Message(msg)) => self.on_peer_message(msg).await,
                    Some(Inbound::Closed { reason }) => self.disconnect(&reason).await,
                    None => self.disconnect("backend reader stopped").await,
                },

                control = control_rx.recv() => match control {
                    Some(Control::Command(command)) => self.on_command(command).await,
                    Some(Control::Shutdown { reason }) => self.disconnect(&reason).await,
                    None => self.disconnect("adapter handle dropped").await,
                },
            }
        }

        debug_assert_eq!(self.rpc.pending_len(), 0, "pending calls left after disconnect");
        debug_assert!(self.in_flight.is_empty(), "tracked calls left after disconnect");
        debug_assert!(self.approvals.is_empty(), "approvals left after disconnect");
        info!(session_id = %self.options.session_id, "adapter stopped");
    }

    // ── Outbound calls ───────────────────────────────────────────────────────

    async fn start_handshake(&mut self) {
        let name = self.options.client_name.clone();
        let params = json!({
            "clientInfo": {
                "name": name,
                "title": name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "experimentalApi": true },
        });
        self.issue(METHOD_INITIALIZE, params, CallPurpose::Initialize)
            .await;
    }

    async fn open_thread(&mut self) {
        let mut params = json!({
            "cwd": self.options.cwd,
            "approvalPolicy": self.options.permission_mode.approval_policy(),
            "sandbox": self.options.sandbox,
        });
        if let Some(model) = self.options.model.as_ref().filter(|m| !m.is_empty()) {
            params["model"] = json!(model);
        }
        let method = match &self.options.resume_thread_id {
            Some(thread_id) => {
                params["threadId"] = json!(thread_id);
                METHOD_THREAD_RESUME
            }
            None => METHOD_THREAD_START,
        };
        self.issue(method, params, CallPurpose::OpenThread).await;
    }

    /// Send a call and track it until its answer arrives.  A failed send is
    /// reported through the completion channel like any other outcome.
    async fn issue(&mut self, method: &str, params: Value, purpose: CallPurpose) {
        match self.rpc.call(method, params).await {
            Ok(call) => self.track(call, purpose),
            Err(err) => {
                let _ = self.completions.send(Completion::SendFailed { purpose, err });
            }
        }
    }

    fn track(&mut self, call: PendingCall, purpose: CallPurpose) {
        let id = call.id();
        if let Some(limit) = self.options.call_timeout {
            let completions = self.completions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                // Receiver gone means the actor already stopped.
                let _ = completions.send(Completion::Expired { id });
            });
        }
        self.in_flight.insert(id, InFlight { purpose, call });
    }

    async fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::SendFailed { purpose, err } => self.on_outcome(purpose, Err(err)).await,
            Completion::Expired { id } => {
                // Already answered calls are gone from the map.
                let Some(InFlight { purpose, call }) = self.in_flight.remove(&id) else {
                    return;
                };
                self.rpc.abandon(id);
                let limit = self.options.call_timeout.unwrap_or_default();
                let err = AppError::Rpc(format!("{} timed out after {limit:?}", call.method()));
                self.on_outcome(purpose, Err(err)).await;
            }
        }
    }

    async fn on_resolved(&mut self, id: i64) {
        let Some(InFlight { purpose, call }) = self.in_flight.remove(&id) else {
            return;
        };
        self.on_outcome(purpose, call.take_resolved()).await;
    }

    async fn on_outcome(&mut self, purpose: CallPurpose, outcome: CallOutcome) {
        match (purpose, outcome) {
            (CallPurpose::Initialize, Ok(_)) => {
                if let Err(err) = self.rpc.notify(METHOD_INITIALIZED, json!({})).await {
                    self.fail_init(&format!("initialize failed: {err}")).await;
                    return;
                }
                debug!(session_id = %self.options.session_id, "handshake complete, opening thread");
                self.open_thread().await;
            }
            (CallPurpose::OpenThread, Ok(result)) => self.become_ready(&result).await,
            (CallPurpose::Initialize | CallPurpose::OpenThread, Err(err)) => {
                self.fail_init(&format!("backend initialization failed: {err}"))
                    .await;
            }
            (CallPurpose::StartTurn, Ok(result)) => {
                if let Some(turn_id) = result.pointer("/turn/id").and_then(Value::as_str) {
                    debug!(session_id = %self.options.session_id, turn_id, "turn started");
                    self.active_turn = Some(turn_id.to_owned());
                }
            }
            (CallPurpose::StartTurn, Err(err)) => {
                warn!(session_id = %self.options.session_id, %err, "turn/start failed");
                if self.active_turn.is_none() {
                    self.turn_started_at = None;
                }
                if self.state == AdapterState::Ready {
                    self.emit(BrowserEvent::Error {
                        message: format!("failed to start turn: {err}"),
                    })
                    .await;
                }
            }
            (CallPurpose::InterruptTurn, Ok(_)) => {
                debug!(session_id = %self.options.session_id, "turn interrupted");
            }
            (CallPurpose::InterruptTurn, Err(err)) => {
                warn!(session_id = %self.options.session_id, %err, "turn/interrupt failed");
            }
        }
    }

    async fn become_ready(&mut self, result: &Value) {
        let Some(thread_id) = result
            .pointer("/thread/id")
            .or_else(|| result.get("threadId"))
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            self.fail_init("backend initialization failed: thread response has no id")
                .await;
            return;
        };

        if let Some(model) = result
            .get("model")
            .or_else(|| result.pointer("/thread/model"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
        {
            self.meta.model = model.to_owned();
        }
        if let Some(cwd) = result
            .get("cwd")
            .or_else(|| result.pointer("/thread/cwd"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
        {
            self.meta.cwd = cwd.to_owned();
        }
        self.meta.thread_id = Some(thread_id.clone());
        self.translator.set_model(self.meta.model.clone());
        self.set_state(AdapterState::Ready);

        info!(
            session_id = %self.options.session_id,
            thread_id,
            model = %self.meta.model,
            cwd = %self.meta.cwd,
            "backend thread open"
        );

        let snapshot = SessionSnapshot {
            session_id: self.meta.session_id.clone(),
            backend_type: BACKEND_TYPE.to_owned(),
            thread_id,
            model: self.meta.model.clone(),
            cwd: self.meta.cwd.clone(),
            permission_mode: self.meta.permission_mode.as_str().to_owned(),
            ..SessionSnapshot::default()
        };
        self.emit(BrowserEvent::SessionInit { session: snapshot })
            .await;
        self.send_output(AdapterOutput::SessionMeta(self.meta.clone()))
            .await;
        self.emit(BrowserEvent::CliConnected).await;

        if !self.queued.is_empty() {
            debug!(session_id = %self.options.session_id, count = self.queued.len(), "flushing queued commands");
        }
        while let Some(command) = self.queued.pop_front() {
            self.dispatch_command(command).await;
            if self.state != AdapterState::Ready {
                break;
            }
        }
    }

    // ── Browser commands ─────────────────────────────────────────────────────

    async fn on_command(&mut self, command: BrowserCommand) {
        match self.state {
            AdapterState::Ready => self.dispatch_command(command).await,
            AdapterState::Initializing if command.is_queueable() => {
                debug!(session_id = %self.options.session_id, kind = command.kind(), "queueing command until thread is open");
                self.queued.push_back(command);
            }
            AdapterState::Initializing => {
                debug!(session_id = %self.options.session_id, kind = command.kind(), "dropping command before thread is open");
            }
            AdapterState::Disconnected => {
                debug!(session_id = %self.options.session_id, kind = command.kind(), "dropping command after disconnect");
            }
        }
    }

    async fn dispatch_command(&mut self, command: BrowserCommand) {
        let kind = command.kind();
        match command {
            BrowserCommand::UserMessage { content, images } => {
                let mut input = vec![json!({ "type": "text", "text": content })];
                input.extend(
                    images
                        .iter()
                        .map(|image| json!({ "type": "image", "url": image.data_url() })),
                );
                let params = json!({
                    "threadId": self.meta.thread_id,
                    "input": input,
                });
                if self.turn_started_at.is_none() {
                    self.turn_started_at = Some(Instant::now());
                }
                self.issue(METHOD_TURN_START, params, CallPurpose::StartTurn)
                    .await;
            }
            BrowserCommand::PermissionResponse {
                request_id,
                behavior,
            } => {
                let pending = match self.approvals.take(&request_id) {
                    Ok(pending) => pending,
                    Err(err) => {
                        warn!(session_id = %self.options.session_id, %err, "ignoring permission response");
                        return;
                    }
                };
                let decision = behavior.decision();
                info!(
                    session_id = %self.options.session_id,
                    request_id,
                    kind = ?pending.kind,
                    tool_use_id = %pending.tool_use_id,
                    decision,
                    "approval answered"
                );
                if let Err(err) = self
                    .rpc
                    .respond(&pending.peer_id, json!({ "decision": decision }))
                    .await
                {
                    warn!(session_id = %self.options.session_id, %err, "failed to deliver approval decision");
                }
            }
            BrowserCommand::Interrupt => {
                let Some(turn_id) = self.active_turn.clone() else {
                    debug!(session_id = %self.options.session_id, "interrupt with no active turn");
                    return;
                };
                let params = json!({
                    "threadId": self.meta.thread_id,
                    "turnId": turn_id,
                });
                self.issue(METHOD_TURN_INTERRUPT, params, CallPurpose::InterruptTurn)
                    .await;
            }
            BrowserCommand::SetModel { .. } | BrowserCommand::SetPermissionMode { .. } => {
                warn!(session_id = %self.options.session_id, kind, "runtime switch ignored");
            }
        }
    }

    // ── Backend messages ─────────────────────────────────────────────────────

    async fn on_peer_message(&mut self, msg: RpcMessage) {
        match self.rpc.dispatch(msg) {
            Dispatch::Resolved { id } => self.on_resolved(id).await,
            Dispatch::Discarded { .. } => {}
            Dispatch::Request { id, method, params } => {
                self.on_peer_request(id, &method, &params).await;
            }
            Dispatch::Notification { method, params } => {
                self.on_notification(&method, &params).await;
            }
        }
    }

    async fn on_peer_request(&mut self, id: RequestId, method: &str, params: &Value) {
        let Some(kind) = ApprovalKind::from_method(method) else {
            warn!(session_id = %self.options.session_id, method, %id, "auto-accepting unrecognized backend request");
            if let Err(err) = self.rpc.respond(&id, json!({ "decision": "accept" })).await {
                warn!(session_id = %self.options.session_id, %err, "failed to answer backend request");
            }
            return;
        };

        let request = build_permission_request(kind, params);
        info!(
            session_id = %self.options.session_id,
            request_id = %request.request_id,
            tool_name = %request.tool_name,
            "approval requested"
        );
        self.approvals.register(&request, id, kind);
        self.emit(BrowserEvent::PermissionRequest { request }).await;
    }

    async fn on_notification(&mut self, method: &str, params: &Value) {
        let events = match method {
            "item/started" => match parse_item(params) {
                Some(item) => self.translator.item_started(&item),
                None => Vec::new(),
            },
            "item/completed" => match parse_item(params) {
                Some(item) => self.translator.item_completed(&item),
                None => Vec::new(),
            },
            "item/agentMessage/delta" => {
                let (item_id, delta) = delta_fields(params);
                self.translator.agent_delta(item_id, delta)
            }
            "item/reasoning/summaryTextDelta" | "item/reasoning/textDelta" => {
                let (item_id, delta) = delta_fields(params);
                self.translator.reasoning_delta(item_id, delta);
                Vec::new()
            }
            "item/commandExecution/outputDelta" => {
                trace!(session_id = %self.options.session_id, "command output delta");
                Vec::new()
            }
            "turn/started" => {
                if let Some(turn_id) = params.pointer("/turn/id").and_then(Value::as_str) {
                    self.active_turn = Some(turn_id.to_owned());
                }
                if self.turn_started_at.is_none() {
                    self.turn_started_at = Some(Instant::now());
                }
                Vec::new()
            }
            "turn/completed" => {
                let duration_ms = self
                    .turn_started_at
                    .take()
                    .map_or(0, |t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX));
                self.num_turns = self.num_turns.saturating_add(1);
                self.active_turn = None;
                self.translator
                    .turn_completed(params, duration_ms, self.num_turns)
            }
            "thread/tokenUsage/updated" => self.translator.token_usage(params).into_iter().collect(),
            "thread/started" => {
                if self.meta.thread_id.is_none() {
                    if let Some(thread_id) = params.pointer("/thread/id").and_then(Value::as_str) {
                        self.meta.thread_id = Some(thread_id.to_owned());
                    }
                }
                Vec::new()
            }
            "thread/compacted" => self.translator.compaction_finished(false),
            other => {
                debug!(session_id = %self.options.session_id, method = other, "ignoring backend notification");
                Vec::new()
            }
        };

        for event in events {
            self.emit(event).await;
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    async fn fail_init(&mut self, message: &str) {
        if self.state == AdapterState::Disconnected {
            return;
        }
        error!(session_id = %self.options.session_id, message, "adapter initialization failed");
        self.init_failed = true;
        self.emit(BrowserEvent::Error {
            message: message.to_owned(),
        })
        .await;
        self.send_output(AdapterOutput::InitFailed {
            message: message.to_owned(),
        })
        .await;
        self.disconnect(message).await;
    }

    async fn disconnect(&mut self, reason: &str) {
        if self.state == AdapterState::Disconnected {
            return;
        }
        let was_initializing = self.state == AdapterState::Initializing;
        self.set_state(AdapterState::Disconnected);
        self.rpc.mark_disconnected();
        self.rpc.cancel_all(reason);
        self.in_flight.clear();
        self.translator.reset();
        self.active_turn = None;

        if was_initializing && !self.init_failed {
            let message = format!("backend disconnected during initialization: {reason}");
            self.emit(BrowserEvent::Error {
                message: message.clone(),
            })
            .await;
            self.send_output(AdapterOutput::InitFailed { message }).await;
        }

        if !self.queued.is_empty() {
            warn!(session_id = %self.options.session_id, count = self.queued.len(), "dropping queued commands on disconnect");
            self.queued.clear();
        }

        if !self.approvals.is_empty() {
            info!(session_id = %self.options.session_id, count = self.approvals.len(), "withdrawing pending approvals");
        }
        for (request_id, pending) in self.approvals.drain() {
            debug!(
                session_id = %self.options.session_id,
                request_id,
                kind = ?pending.kind,
                tool_use_id = %pending.tool_use_id,
                "approval cancelled"
            );
            self.emit(BrowserEvent::PermissionCancelled { request_id })
                .await;
        }

        info!(session_id = %self.options.session_id, reason, "backend disconnected");
        self.emit(BrowserEvent::CliDisconnected).await;
        self.send_output(AdapterOutput::Disconnected {
            reason: reason.to_owned(),
        })
        .await;
    }

    fn set_state(&mut self, state: AdapterState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    async fn emit(&self, event: BrowserEvent) {
        self.send_output(AdapterOutput::Browser(event)).await;
    }

    async fn send_output(&self, output: AdapterOutput) {
        if self.output.send(output).await.is_err() {
            trace!(session_id = %self.options.session_id, "output receiver dropped");
        }
    }
}

fn parse_item(params: &Value) -> Option<AgentItem> {
    let raw = params.get("item")?.clone();
    match AgentItem::decode_lenient(raw) {
        Ok(item) => Some(item),
        Err(err) => {
            warn!(%err, "unreadable backend item");
            None
        }
    }
}

fn delta_fields(params: &Value) -> (&str, &str) {
    (
        params.get("itemId").and_then(Value::as_str).unwrap_or_default(),
        params.get("delta").and_then(Value::as_str).unwrap_or_default(),
    )
}
