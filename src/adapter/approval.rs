//! Backend approval requests ↔ browser permission prompts.
//!
//! The backend asks for approval with a JSON-RPC *request*; the browser
//! answers with a `permission_response` carrying a synthesized id.  The
//! [`ApprovalBook`] maps that synthesized id back to the backend's request id
//! so the answer lands on the right call.  An entry is removed exactly once:
//! when the browser answers, or when the session tears down.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::browser::PermissionRequest;
use crate::rpc::message::RequestId;
use crate::{AppError, Result};

/// Backend method asking to run a shell command.
pub const METHOD_COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
/// Backend method asking to apply a patch.
pub const METHOD_FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
/// Backend method asking to call an MCP tool.
pub const METHOD_MCP_APPROVAL: &str = "item/mcpToolCall/requestApproval";

/// Which kind of action the backend wants approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    /// Shell command.
    CommandExecution,
    /// File modification.
    FileChange,
    /// MCP tool call.
    McpToolCall,
}

impl ApprovalKind {
    /// Classify a backend request method; `None` for anything that is not
    /// an approval request.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            METHOD_COMMAND_APPROVAL => Some(Self::CommandExecution),
            METHOD_FILE_CHANGE_APPROVAL => Some(Self::FileChange),
            METHOD_MCP_APPROVAL => Some(Self::McpToolCall),
            _ => None,
        }
    }
}

/// An approval awaiting the browser's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    /// Backend's id for the approval request; the answer goes here.
    pub peer_id: RequestId,
    /// Kind of action.
    pub kind: ApprovalKind,
    /// Item id of the action, when the backend supplied one.
    pub tool_use_id: String,
}

/// Synthesized approval id → backend request.
#[derive(Debug, Default)]
pub struct ApprovalBook {
    pending: HashMap<String, PendingApproval>,
}

impl ApprovalBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an approval the browser has been asked about.
    pub fn register(&mut self, request: &PermissionRequest, peer_id: RequestId, kind: ApprovalKind) {
        debug!(request_id = %request.request_id, %peer_id, ?kind, "approval registered");
        self.pending.insert(
            request.request_id.clone(),
            PendingApproval {
                peer_id,
                kind,
                tool_use_id: request.tool_use_id.clone(),
            },
        );
    }

    /// Remove and return the entry for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the id is unknown or was already
    /// answered.
    pub fn take(&mut self, request_id: &str) -> Result<PendingApproval> {
        self.pending.remove(request_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "approval '{request_id}' is unknown or already answered"
            ))
        })
    }

    /// Remove every entry, returning them ordered by synthesized id.
    pub fn drain(&mut self) -> Vec<(String, PendingApproval)> {
        let mut entries: Vec<(String, PendingApproval)> = self.pending.drain().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of unanswered approvals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no approval is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `request_id` is awaiting a decision.
    #[must_use]
    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

/// Build the browser prompt for a backend approval request.
///
/// The description prefers the backend's stated reason and falls back to a
/// summary of the action.
#[must_use]
pub fn build_permission_request(kind: ApprovalKind, params: &Value) -> PermissionRequest {
    let reason = str_field(params, "reason").filter(|r| !r.trim().is_empty());
    let tool_use_id = str_field(params, "itemId").unwrap_or_default();

    let (tool_name, input, fallback) = match kind {
        ApprovalKind::CommandExecution => {
            let command = command_text(params.get("command"));
            (
                "Bash".to_owned(),
                json!({
                    "command": command,
                    "cwd": params.get("cwd").cloned().unwrap_or(Value::Null),
                }),
                format!("Run command: {command}"),
            )
        }
        ApprovalKind::FileChange => {
            let changes = params.get("changes").cloned().unwrap_or(Value::Null);
            let paths = change_paths(&changes);
            let fallback = if paths.is_empty() {
                "Apply file changes".to_owned()
            } else {
                format!("Modify files: {}", paths.join(", "))
            };
            let mut input = json!({ "changes": changes });
            if let Some(first) = paths.first() {
                input["file_path"] = json!(first);
            }
            if let Some(root) = params.get("grantRoot").filter(|r| !r.is_null()) {
                input["grant_root"] = root.clone();
            }
            ("Edit".to_owned(), input, fallback)
        }
        ApprovalKind::McpToolCall => {
            let server = str_field(params, "server").unwrap_or_default();
            let tool = str_field(params, "tool").unwrap_or_default();
            (
                format!("mcp:{server}:{tool}"),
                params.get("arguments").cloned().unwrap_or_else(|| json!({})),
                format!("Call tool {server}/{tool}"),
            )
        }
    };

    PermissionRequest {
        request_id: format!("approval-{}", uuid::Uuid::new_v4()),
        tool_name,
        input,
        description: reason.unwrap_or(fallback),
        tool_use_id,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

fn str_field(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Command text from a string or argv array.
fn command_text(command: Option<&Value>) -> String {
    match command {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// File paths from either `[{path, ...}]` or `{path: change}`.
fn change_paths(changes: &Value) -> Vec<String> {
    match changes {
        Value::Array(list) => list
            .iter()
            .filter_map(|c| c.get("path").and_then(Value::as_str))
            .map(str::to_owned)
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}
