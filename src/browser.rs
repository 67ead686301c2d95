//! Browser-facing session protocol.
//!
//! Events flow adapter → browser and commands flow browser → adapter.  Both
//! are JSON objects discriminated by a `type` field.
//!
//! | Event `type`          | Meaning                                          |
//! |-----------------------|--------------------------------------------------|
//! | `session_init`        | Thread is open; full session snapshot            |
//! | `session_update`      | Only the session fields that changed             |
//! | `status_change`       | `compacting` or cleared (`null`)                 |
//! | `assistant`           | Complete assistant message with content blocks   |
//! | `stream_event`        | Incremental rendering primitive                  |
//! | `result`              | Turn completion summary                          |
//! | `permission_request`  | Backend asks the user to approve an action       |
//! | `permission_cancelled`| A pending approval can no longer be answered     |
//! | `error`               | Adapter-level failure surfaced to the user       |
//! | `cli_connected`       | Backend ready                                    |
//! | `cli_disconnected`    | Backend gone                                     |

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Events ────────────────────────────────────────────────────────────────────

/// Event emitted to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEvent {
    /// Initial session snapshot.
    SessionInit {
        /// Normalized session state.
        session: SessionSnapshot,
    },
    /// Partial session update.
    SessionUpdate {
        /// Changed fields only.
        session: SessionPatch,
    },
    /// Session activity status.
    StatusChange {
        /// `Some("compacting")` or `None` when cleared.
        status: Option<String>,
    },
    /// Complete assistant message.
    Assistant {
        /// The message.
        message: AssistantMessage,
        /// Always `None` for this backend; kept for protocol parity.
        parent_tool_use_id: Option<String>,
    },
    /// Incremental rendering primitive.
    StreamEvent {
        /// The primitive.
        event: StreamEvent,
        /// Always `None` for this backend; kept for protocol parity.
        parent_tool_use_id: Option<String>,
    },
    /// Turn completion summary.
    Result {
        /// Summary payload.
        data: TurnResult,
    },
    /// Approval request.
    PermissionRequest {
        /// Normalized request.
        request: PermissionRequest,
    },
    /// A pending approval was withdrawn.
    PermissionCancelled {
        /// Synthesized approval id.
        request_id: String,
    },
    /// Adapter-level error.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// Backend connected and ready.
    CliConnected,
    /// Backend disconnected.
    CliDisconnected,
}

impl BrowserEvent {
    /// Convenience constructor for [`BrowserEvent::Assistant`].
    #[must_use]
    pub fn assistant(message: AssistantMessage) -> Self {
        Self::Assistant {
            message,
            parent_tool_use_id: None,
        }
    }

    /// Convenience constructor for [`BrowserEvent::StreamEvent`].
    #[must_use]
    pub fn stream(event: StreamEvent) -> Self {
        Self::StreamEvent {
            event,
            parent_tool_use_id: None,
        }
    }
}

/// Session snapshot sent with `session_init`.
///
/// Fields the backend does not report are filled with empty defaults so the
/// browser can treat every backend kind alike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Browser-facing session id.
    pub session_id: String,
    /// Backend kind; always `codex` here.
    pub backend_type: String,
    /// Backend thread id.
    pub thread_id: String,
    /// Model in use.
    pub model: String,
    /// Working directory.
    pub cwd: String,
    /// Permission mode wire name.
    #[serde(rename = "permissionMode")]
    pub permission_mode: String,
    /// Available tools.
    pub tools: Vec<String>,
    /// Configured MCP servers.
    pub mcp_servers: Vec<Value>,
    /// Available slash commands.
    pub slash_commands: Vec<String>,
    /// Accumulated cost.
    pub total_cost_usd: f64,
    /// Completed turns.
    pub num_turns: u32,
    /// Context-window utilization in percent.
    pub context_used_percent: u8,
    /// Whether compaction is in progress.
    pub is_compacting: bool,
}

/// Changed session fields for `session_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// New model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// New context utilization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used_percent: Option<u8>,
    /// New completed-turn count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
}

/// One block of assistant content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Prose.
    Text {
        /// Text.
        text: String,
    },
    /// Tool invocation announcement.
    ToolUse {
        /// Item id of the invocation.
        id: String,
        /// Normalized tool name.
        name: String,
        /// Structured input.
        input: Value,
    },
    /// Tool outcome.
    ToolResult {
        /// Item id of the invocation this answers.
        tool_use_id: String,
        /// Output text.
        content: String,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// Model reasoning.
    Thinking {
        /// Reasoning text.
        thinking: String,
    },
}

/// A complete assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Message id (derived from the item id).
    pub id: String,
    /// Always `assistant`.
    pub role: String,
    /// Model that produced it.
    pub model: String,
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Stop reason, when known.
    pub stop_reason: Option<String>,
}

impl AssistantMessage {
    /// Build a message with one content block.
    #[must_use]
    pub fn single(id: impl Into<String>, model: impl Into<String>, block: ContentBlock) -> Self {
        Self {
            id: id.into(),
            role: "assistant".to_owned(),
            model: model.into(),
            content: vec![block],
            stop_reason: None,
        }
    }
}

/// Incremental rendering primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A streamed message begins.
    MessageStart {
        /// Message skeleton (`id`, `role`, `model`).
        message: Value,
    },
    /// A content block opens.
    ContentBlockStart {
        /// Block index within the message.
        index: u32,
        /// Initial block content.
        content_block: ContentBlock,
    },
    /// A content block grows.
    ContentBlockDelta {
        /// Block index within the message.
        index: u32,
        /// Appended content.
        delta: Delta,
    },
    /// A content block closes.
    ContentBlockStop {
        /// Block index within the message.
        index: u32,
    },
    /// A streamed message ends.
    MessageStop,
}

/// Appended content for [`StreamEvent::ContentBlockDelta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// Text fragment.
    TextDelta {
        /// Fragment.
        text: String,
    },
}

/// Token usage reported with a turn result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Prompt tokens served from cache.
    pub cache_read_input_tokens: u64,
}

/// Turn completion summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    /// `success` or `error_during_execution`.
    pub subtype: String,
    /// Whether the turn failed.
    pub is_error: bool,
    /// Error message, if any.
    pub result: Option<String>,
    /// Wall-clock duration of the turn.
    pub duration_ms: u64,
    /// Completed turns so far in this session.
    pub num_turns: u32,
    /// Backend-reported stop status.
    pub stop_reason: Option<String>,
    /// Last reported token usage.
    pub usage: Usage,
    /// Browser-facing session id.
    pub session_id: String,
}

/// Normalized approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Synthesized approval id; echo it back in `permission_response`.
    pub request_id: String,
    /// Normalized tool name (`Bash`, `Edit`, `mcp:<server>:<tool>`).
    pub tool_name: String,
    /// Structured tool input.
    pub input: Value,
    /// Human-readable description.
    pub description: String,
    /// Item id of the action awaiting approval.
    pub tool_use_id: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Command sent by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserCommand {
    /// Start a turn with user input.
    UserMessage {
        /// Message text.
        content: String,
        /// Attached images.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
    },
    /// Answer a pending approval.
    PermissionResponse {
        /// Synthesized approval id from `permission_request`.
        request_id: String,
        /// User decision.
        behavior: Behavior,
    },
    /// Stop the active turn.
    Interrupt,
    /// Switch model at runtime.
    SetModel {
        /// Model name.
        model: String,
    },
    /// Switch permission mode at runtime.
    SetPermissionMode {
        /// Mode wire name.
        mode: String,
    },
}

impl BrowserCommand {
    /// Whether the command may wait in the queue until the thread is open.
    #[must_use]
    pub fn is_queueable(&self) -> bool {
        matches!(
            self,
            Self::UserMessage { .. } | Self::PermissionResponse { .. }
        )
    }

    /// Wire name of the command kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::PermissionResponse { .. } => "permission_response",
            Self::Interrupt => "interrupt",
            Self::SetModel { .. } => "set_model",
            Self::SetPermissionMode { .. } => "set_permission_mode",
        }
    }
}

/// Image attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64 payload.
    pub data: String,
}

impl ImageAttachment {
    /// `data:` URL form accepted by the backend.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// User decision on an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Approve.
    Allow,
    /// Reject.
    Deny,
}

impl Behavior {
    /// Backend decision for this behavior.
    #[must_use]
    pub fn decision(self) -> &'static str {
        match self {
            Self::Allow => "accept",
            Self::Deny => "decline",
        }
    }
}
