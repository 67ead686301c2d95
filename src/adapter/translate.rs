//! Backend item/turn/usage notifications → browser events.
//!
//! [`Translator`] is pure bookkeeping: every method takes one backend event
//! and returns the browser events it produces, in order.  The session actor
//! owns one instance and is the only caller, so per-item ordering follows
//! arrival order on the backend stream.
//!
//! | Backend event                 | Browser events                                   |
//! |-------------------------------|--------------------------------------------------|
//! | agent message started         | `message_start`, text `content_block_start`      |
//! | agent message delta           | `content_block_delta`                            |
//! | agent message completed       | `content_block_stop`, `message_stop`, `assistant`|
//! | tool item started             | `assistant` with `tool_use`                      |
//! | tool item completed           | backfilled `tool_use` if needed, `tool_result`   |
//! | reasoning started             | thinking `content_block_start`                   |
//! | reasoning completed           | `assistant` with `thinking`, `content_block_stop`|
//! | compaction started / done     | `status_change`                                  |
//! | turn completed                | `result`, `session_update`                       |
//! | token usage                   | `session_update` (changed fields only)           |

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::browser::{
    AssistantMessage, BrowserEvent, ContentBlock, Delta, SessionPatch, StreamEvent, TurnResult,
    Usage,
};
use crate::models::item::{AgentItem, CommandLine, TextParts};

/// Status value the backend reports for a successful turn.
const TURN_COMPLETED: &str = "completed";

/// Per-session translation state.
#[derive(Debug, Default)]
pub struct Translator {
    session_id: String,
    model: String,
    /// Streaming text per agent-message item id.
    agent_text: HashMap<String, String>,
    /// Reasoning text per reasoning item id.
    reasoning: HashMap<String, String>,
    /// Item ids whose tool invocation has been announced.
    announced: HashSet<String>,
    usage: Usage,
    context_used_percent: Option<u8>,
    compacting: bool,
}

impl Translator {
    /// Create a translator for one session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Model name stamped on emitted assistant messages.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Last usage reported by the backend.
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Whether a tool invocation announcement is outstanding for `item_id`.
    #[must_use]
    pub fn is_announced(&self, item_id: &str) -> bool {
        self.announced.contains(item_id)
    }

    /// Handle `item/started`.
    pub fn item_started(&mut self, item: &AgentItem) -> Vec<BrowserEvent> {
        match item {
            AgentItem::AgentMessage { id, .. } => {
                self.agent_text.insert(id.clone(), String::new());
                self.open_text_block(id)
            }
            AgentItem::Reasoning { id, summary, .. } => {
                let seed = summary.as_ref().map(TextParts::joined).unwrap_or_default();
                self.reasoning.insert(id.clone(), seed.clone());
                vec![BrowserEvent::stream(StreamEvent::ContentBlockStart {
                    index: 0,
                    content_block: ContentBlock::Thinking { thinking: seed },
                })]
            }
            AgentItem::ContextCompaction { .. } => {
                self.compacting = true;
                vec![BrowserEvent::StatusChange {
                    status: Some("compacting".to_owned()),
                }]
            }
            tool if tool.is_tool() => self.announce(tool).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Handle `item/agentMessage/delta`.
    ///
    /// A delta for an item whose start was never seen opens the block first.
    pub fn agent_delta(&mut self, item_id: &str, delta: &str) -> Vec<BrowserEvent> {
        let mut events = Vec::new();
        if !self.agent_text.contains_key(item_id) {
            self.agent_text.insert(item_id.to_owned(), String::new());
            events.extend(self.open_text_block(item_id));
        }
        if let Some(buf) = self.agent_text.get_mut(item_id) {
            buf.push_str(delta);
        }
        events.push(BrowserEvent::stream(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta {
                text: delta.to_owned(),
            },
        }));
        events
    }

    /// Handle a reasoning summary or full-text delta.  Nothing is emitted
    /// until the item completes.
    pub fn reasoning_delta(&mut self, item_id: &str, delta: &str) {
        self.reasoning
            .entry(item_id.to_owned())
            .or_default()
            .push_str(delta);
    }

    /// Handle `item/completed`.
    pub fn item_completed(&mut self, item: &AgentItem) -> Vec<BrowserEvent> {
        match item {
            AgentItem::AgentMessage { id, text } => {
                let streamed = self.agent_text.remove(id);
                let mut events = Vec::new();
                if streamed.is_some() {
                    events.push(BrowserEvent::stream(StreamEvent::ContentBlockStop { index: 0 }));
                    events.push(BrowserEvent::stream(StreamEvent::MessageStop));
                }
                // The backend's final text is authoritative; the accumulator
                // only fills in when the completion carries none.
                let text = text
                    .clone()
                    .filter(|t| !t.is_empty())
                    .or(streamed)
                    .unwrap_or_default();
                events.push(BrowserEvent::assistant(AssistantMessage::single(
                    id.clone(),
                    self.model.clone(),
                    ContentBlock::Text { text },
                )));
                events
            }
            AgentItem::Reasoning {
                id,
                summary,
                content,
            } => {
                let accumulated = self.reasoning.remove(id).unwrap_or_default();
                let text = if accumulated.trim().is_empty() {
                    summary
                        .as_ref()
                        .or(content.as_ref())
                        .map(TextParts::joined)
                        .unwrap_or_default()
                } else {
                    accumulated
                };
                let mut events = Vec::new();
                if !text.trim().is_empty() {
                    events.push(BrowserEvent::assistant(AssistantMessage::single(
                        id.clone(),
                        self.model.clone(),
                        ContentBlock::Thinking { thinking: text },
                    )));
                }
                events.push(BrowserEvent::stream(StreamEvent::ContentBlockStop { index: 0 }));
                events
            }
            AgentItem::ContextCompaction { .. } => self.compaction_finished(true),
            tool if tool.is_tool() => {
                let Some(id) = tool.id() else {
                    return Vec::new();
                };
                let mut events: Vec<BrowserEvent> = Vec::new();
                if self.is_announced(id) {
                    self.announced.remove(id);
                } else {
                    debug!(session_id = %self.session_id, item_id = id, "backfilling tool announcement");
                    events.extend(self.announce(tool));
                    self.announced.remove(id);
                }
                let (content, is_error) = tool_result(tool);
                events.push(BrowserEvent::assistant(AssistantMessage::single(
                    format!("{id}-result"),
                    self.model.clone(),
                    ContentBlock::ToolResult {
                        tool_use_id: id.to_owned(),
                        content,
                        is_error,
                    },
                )));
                events
            }
            _ => Vec::new(),
        }
    }

    /// Handle the end of a compaction.
    ///
    /// With `force` unset (thread-level `thread/compacted`), nothing is
    /// emitted unless a compaction item had started.
    pub fn compaction_finished(&mut self, force: bool) -> Vec<BrowserEvent> {
        if !force && !self.compacting {
            return Vec::new();
        }
        self.compacting = false;
        vec![BrowserEvent::StatusChange { status: None }]
    }

    /// Handle `turn/completed`.
    pub fn turn_completed(
        &mut self,
        params: &Value,
        duration_ms: u64,
        num_turns: u32,
    ) -> Vec<BrowserEvent> {
        let turn: TurnPayload = params
            .get("turn")
            .cloned()
            .and_then(|t| serde_json::from_value(t).ok())
            .unwrap_or_default();
        let status = turn.status.unwrap_or_default();
        let success = status == TURN_COMPLETED;
        let error = turn.error.and_then(|e| match e {
            Value::String(s) => Some(s),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
        });

        vec![
            BrowserEvent::Result {
                data: TurnResult {
                    subtype: if success {
                        "success".to_owned()
                    } else {
                        "error_during_execution".to_owned()
                    },
                    is_error: !success,
                    result: error,
                    duration_ms,
                    num_turns,
                    stop_reason: Some(status).filter(|s| !s.is_empty()),
                    usage: self.usage,
                    session_id: self.session_id.clone(),
                },
            },
            BrowserEvent::SessionUpdate {
                session: SessionPatch {
                    num_turns: Some(num_turns),
                    ..SessionPatch::default()
                },
            },
        ]
    }

    /// Handle `thread/tokenUsage/updated`.
    ///
    /// Utilization is `(input + output) / window`, from the last turn's
    /// breakdown when present, else the running total; clamped to 0..=100.
    /// Returns `None` when nothing browser-visible changed.
    pub fn token_usage(&mut self, params: &Value) -> Option<BrowserEvent> {
        let payload: TokenUsagePayload = params
            .get("tokenUsage")
            .cloned()
            .and_then(|t| serde_json::from_value(t).ok())?;
        let breakdown = payload.last.or(payload.total)?;

        self.usage = Usage {
            input_tokens: breakdown.input_tokens,
            output_tokens: breakdown.output_tokens,
            cache_read_input_tokens: breakdown.cached_input_tokens,
        };

        let window = payload.model_context_window.filter(|w| *w > 0)?;
        let used = breakdown.input_tokens.saturating_add(breakdown.output_tokens);
        let percent = context_percent(used, window);

        if self.context_used_percent == Some(percent) {
            return None;
        }
        self.context_used_percent = Some(percent);
        Some(BrowserEvent::SessionUpdate {
            session: SessionPatch {
                context_used_percent: Some(percent),
                ..SessionPatch::default()
            },
        })
    }

    /// Drop all per-item state; used on disconnect.
    pub fn reset(&mut self) {
        self.agent_text.clear();
        self.reasoning.clear();
        self.announced.clear();
        self.compacting = false;
    }

    fn open_text_block(&self, item_id: &str) -> Vec<BrowserEvent> {
        vec![
            BrowserEvent::stream(StreamEvent::MessageStart {
                message: json!({
                    "id": item_id,
                    "role": "assistant",
                    "model": self.model,
                }),
            }),
            BrowserEvent::stream(StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Text {
                    text: String::new(),
                },
            }),
        ]
    }

    /// Emit the tool-use announcement unless one is already out for this id.
    fn announce(&mut self, item: &AgentItem) -> Option<BrowserEvent> {
        let id = item.id()?;
        if !self.announced.insert(id.to_owned()) {
            return None;
        }
        let (name, input) = tool_use(item);
        Some(BrowserEvent::assistant(AssistantMessage::single(
            id,
            self.model.clone(),
            ContentBlock::ToolUse {
                id: id.to_owned(),
                name,
                input,
            },
        )))
    }
}

/// Percentage of `window` used by `used` tokens, rounded and clamped to 100.
#[must_use]
pub fn context_percent(used: u64, window: u64) -> u8 {
    if window == 0 {
        return 0;
    }
    let percent = used.saturating_mul(100).saturating_add(window / 2) / window;
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Normalized tool name and input for an announcement.
fn tool_use(item: &AgentItem) -> (String, Value) {
    match item {
        AgentItem::CommandExecution { command, cwd, .. } => (
            "Bash".to_owned(),
            json!({
                "command": command.as_ref().map(CommandLine::display).unwrap_or_default(),
                "cwd": cwd,
            }),
        ),
        AgentItem::FileChange { changes, .. } => {
            let all_added = !changes.is_empty() && changes.iter().all(|c| c.kind_name() == "add");
            let name = if all_added { "Write" } else { "Edit" };
            let listed: Vec<Value> = changes
                .iter()
                .map(|c| json!({"path": c.path, "kind": c.kind_name()}))
                .collect();
            (
                name.to_owned(),
                json!({
                    "file_path": changes.first().map(|c| c.path.clone()).unwrap_or_default(),
                    "changes": listed,
                }),
            )
        }
        AgentItem::McpToolCall {
            server,
            tool,
            arguments,
            ..
        } => (format!("mcp:{server}:{tool}"), arguments.clone()),
        AgentItem::WebSearch { query, .. } => ("WebSearch".to_owned(), json!({ "query": query })),
        _ => ("Unknown".to_owned(), Value::Null),
    }
}

/// Output text and failure flag for a completed tool item.
fn tool_result(item: &AgentItem) -> (String, bool) {
    match item {
        AgentItem::CommandExecution {
            status,
            exit_code,
            aggregated_output,
            stdout,
            stderr,
            ..
        } => {
            let mut text = aggregated_output.clone().unwrap_or_else(|| {
                [stdout, stderr]
                    .into_iter()
                    .filter_map(|s| s.as_deref())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            });
            let failed_exit = exit_code.is_some_and(|code| code != 0);
            if let Some(code) = exit_code.filter(|code| *code != 0) {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                let _ = write!(text, "Exit code: {code}");
            }
            (text, failed_exit || is_failed_status(status.as_deref()))
        }
        AgentItem::FileChange {
            changes, status, ..
        } => {
            let text = if changes.is_empty() {
                "No file changes".to_owned()
            } else {
                changes
                    .iter()
                    .map(|c| format!("{}: {}", c.kind_name(), c.path))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            (text, is_failed_status(status.as_deref()))
        }
        AgentItem::McpToolCall {
            status,
            result,
            error,
            ..
        } => {
            if let Some(error) = error.as_ref().filter(|e| !e.is_null()) {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| value_text(error), str::to_owned);
                return (message, true);
            }
            let text = result.as_ref().map(mcp_result_text).unwrap_or_default();
            (text, is_failed_status(status.as_deref()))
        }
        AgentItem::WebSearch { query, .. } => (format!("Searched: {query}"), false),
        _ => (String::new(), false),
    }
}

fn is_failed_status(status: Option<&str>) -> bool {
    matches!(status, Some("failed" | "declined"))
}

/// Text of an MCP result: the joined `content[].text` entries when present.
fn mcp_result_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        value_text(result)
    } else {
        texts.join("\n")
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TurnPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenUsagePayload {
    #[serde(default)]
    total: Option<TokenBreakdown>,
    #[serde(default)]
    last: Option<TokenBreakdown>,
    #[serde(default)]
    model_context_window: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBreakdown {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
