//! Backend-reported work items.
//!
//! Items arrive inside `item/started` and `item/completed` notifications as
//! `{"type": "<kind>", "id": "...", ...}`.  Each item id is minted by the
//! backend and stays stable across the started → delta → completed events
//! of one logical item.

use serde::Deserialize;
use serde_json::Value;

/// A unit of backend work within a turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AgentItem {
    /// Assistant prose.
    AgentMessage {
        /// Item id.
        id: String,
        /// Final text, when the backend supplies it.
        #[serde(default)]
        text: Option<String>,
    },
    /// A shell command run by the agent.
    CommandExecution {
        /// Item id.
        id: String,
        /// Command line, as a string or argv.
        #[serde(default)]
        command: Option<CommandLine>,
        /// Working directory of the command.
        #[serde(default)]
        cwd: Option<String>,
        /// Lifecycle status (`inProgress`, `completed`, `failed`, `declined`).
        #[serde(default)]
        status: Option<String>,
        /// Process exit code once finished.
        #[serde(default)]
        exit_code: Option<i64>,
        /// Interleaved stdout and stderr.
        #[serde(default)]
        aggregated_output: Option<String>,
        /// Separate stdout, for backends that split the streams.
        #[serde(default)]
        stdout: Option<String>,
        /// Separate stderr, for backends that split the streams.
        #[serde(default)]
        stderr: Option<String>,
    },
    /// A patch applied to one or more files.
    FileChange {
        /// Item id.
        id: String,
        /// Per-file changes.
        #[serde(default)]
        changes: Vec<FileChange>,
        /// Lifecycle status.
        #[serde(default)]
        status: Option<String>,
    },
    /// A call into an MCP server tool.
    McpToolCall {
        /// Item id.
        id: String,
        /// MCP server name.
        #[serde(default)]
        server: String,
        /// Tool name on that server.
        #[serde(default)]
        tool: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: Value,
        /// Lifecycle status.
        #[serde(default)]
        status: Option<String>,
        /// Tool result payload.
        #[serde(default)]
        result: Option<Value>,
        /// Tool error payload.
        #[serde(default)]
        error: Option<Value>,
    },
    /// A web search.
    WebSearch {
        /// Item id.
        id: String,
        /// Search query.
        #[serde(default)]
        query: String,
    },
    /// Model reasoning.
    Reasoning {
        /// Item id.
        id: String,
        /// Reasoning summary, if already available.
        #[serde(default)]
        summary: Option<TextParts>,
        /// Full reasoning text, if exposed.
        #[serde(default)]
        content: Option<TextParts>,
    },
    /// Context-window compaction.
    ContextCompaction {
        /// Item id.
        id: String,
    },
    /// Echo of the user's own input.
    UserMessage {
        /// Item id.
        id: String,
    },
    /// Any kind this adapter does not translate.
    #[serde(other)]
    Unknown,
}

impl AgentItem {
    /// Item id, if the kind carries one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::AgentMessage { id, .. }
            | Self::CommandExecution { id, .. }
            | Self::FileChange { id, .. }
            | Self::McpToolCall { id, .. }
            | Self::WebSearch { id, .. }
            | Self::Reasoning { id, .. }
            | Self::ContextCompaction { id }
            | Self::UserMessage { id } => Some(id.as_str()),
            Self::Unknown => None,
        }
    }

    /// Decode `raw`, falling back to just its `type` and `id` when a field
    /// is malformed, so the item's lifecycle still reaches the browser.
    ///
    /// # Errors
    ///
    /// Returns the strict decode error when not even `type` and `id` can be
    /// read.
    pub fn decode_lenient(raw: Value) -> Result<Self, serde_json::Error> {
        match serde_json::from_value::<Self>(raw.clone()) {
            Ok(item) => Ok(item),
            Err(err) => {
                let (Some(kind), Some(id)) = (raw.get("type"), raw.get("id")) else {
                    return Err(err);
                };
                serde_json::from_value(serde_json::json!({ "type": kind, "id": id }))
                    .map_err(|_| err)
            }
        }
    }

    /// Whether this item is announced to the browser as a tool invocation.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        matches!(
            self,
            Self::CommandExecution { .. }
                | Self::FileChange { .. }
                | Self::McpToolCall { .. }
                | Self::WebSearch { .. }
        )
    }
}

/// Command line as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// Shell string.
    Text(String),
    /// Argument vector.
    Argv(Vec<String>),
}

impl CommandLine {
    /// Render as a single shell-like string.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Argv(args) => args.join(" "),
        }
    }
}

/// Text that may arrive as one string or as a list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TextParts {
    /// Single string.
    One(String),
    /// Segments joined with blank lines.
    Many(Vec<String>),
}

impl TextParts {
    /// Concatenate into one string.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::One(s) => s.clone(),
            Self::Many(parts) => parts.join("\n\n"),
        }
    }
}

/// One file touched by a [`AgentItem::FileChange`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileChange {
    /// Path of the file.
    #[serde(default)]
    pub path: String,
    /// Change kind: a bare string (`add`) or an object (`{"type": "add"}`).
    #[serde(default)]
    pub kind: Value,
    /// Unified diff, when provided.
    #[serde(default)]
    pub diff: Option<String>,
}

impl FileChange {
    /// Change kind as a plain word (`add`, `delete`, `update`).
    #[must_use]
    pub fn kind_name(&self) -> &str {
        self.kind
            .as_str()
            .or_else(|| self.kind.get("type").and_then(Value::as_str))
            .unwrap_or("update")
    }
}
