//! Event types for the agent JSON event protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical events decoded from a protocol-emitting agent's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A conversation thread started; carries the real session token.
    ThreadStarted { thread_id: String },
    /// The agent compacted its context window.
    ContextCompacted,
    TurnStarted,
    TurnCompleted { usage: Usage },
    /// The turn failed. The run is over as far as the lifecycle is concerned.
    TurnFailed { message: Option<String> },
    ItemStarted(Item),
    ItemUpdated(Item),
    ItemCompleted(Item),
    /// Stream-level error reported by the agent (not necessarily fatal).
    Error { message: String },
    /// A well-formed event whose type this decoder does not know.
    Unrecognized { event_type: String, payload: Value },
    /// The line was not a protocol event (plain text, invalid JSON, ...).
    Empty,
}

impl Event {
    /// Wire-level `type` string, `None` for [`Event::Empty`].
    pub fn event_type(&self) -> Option<&str> {
        Some(match self {
            Self::ThreadStarted { .. } => "thread.started",
            Self::ContextCompacted => "context_compacted",
            Self::TurnStarted => "turn.started",
            Self::TurnCompleted { .. } => "turn.completed",
            Self::TurnFailed { .. } => "turn.failed",
            Self::ItemStarted(_) => "item.started",
            Self::ItemUpdated(_) => "item.updated",
            Self::ItemCompleted(_) => "item.completed",
            Self::Error { .. } => "error",
            Self::Unrecognized { event_type, .. } => event_type.as_str(),
            Self::Empty => return None,
        })
    }

    /// Label used when the event is written to the transcript.
    ///
    /// Item events are logged under their normalized item category so that
    /// consumers see one vocabulary regardless of which raw item type the
    /// agent used.
    pub fn log_label(&self) -> Option<&str> {
        match self {
            Self::ItemStarted(item) | Self::ItemUpdated(item) | Self::ItemCompleted(item) => {
                Some(item.kind.label())
            }
            other => other.event_type(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The item carried by an `item.*` event.
    pub const fn item(&self) -> Option<&Item> {
        match self {
            Self::ItemStarted(item) | Self::ItemUpdated(item) | Self::ItemCompleted(item) => {
                Some(item)
            }
            _ => None,
        }
    }
}

/// Displayable unit of agent work carried by `item.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub id: Option<String>,
    pub kind: ItemKind,
    /// Reasoning or assistant text.
    pub text: Option<String>,
    /// Shell command for command executions.
    pub command: Option<String>,
    /// Combined output of a command execution.
    pub aggregated_output: Option<String>,
    pub exit_code: Option<i32>,
    /// Free-form status (`in_progress`, `completed`, `failed`, ...).
    pub status: Option<String>,
}

/// Normalized item category.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ItemKind {
    #[default]
    AgentMessage,
    Reasoning,
    CommandExecution,
    FileChange,
    ToolCall,
    WebSearch,
    TodoList,
    Error,
    Other(String),
}

impl ItemKind {
    /// Collapse the raw item `type` strings agents emit into one category.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "agent_message" | "assistant_message" | "assistant" | "message" => {
                Self::AgentMessage
            }
            "reasoning" | "thinking" => Self::Reasoning,
            "command_execution" | "local_shell_call" | "exec_command" => Self::CommandExecution,
            "file_change" | "patch_apply" => Self::FileChange,
            "mcp_tool_call" | "tool_call" | "function_call" => Self::ToolCall,
            "web_search" => Self::WebSearch,
            "todo_list" | "plan_update" => Self::TodoList,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Stable transcript label for this category.
    pub fn label(&self) -> &str {
        match self {
            Self::AgentMessage => "assistant",
            Self::Reasoning => "reasoning",
            Self::CommandExecution => "command",
            Self::FileChange => "file_change",
            Self::ToolCall => "tool_call",
            Self::WebSearch => "web_search",
            Self::TodoList => "todo_list",
            Self::Error => "error",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

/// Token usage statistics reported on `turn.completed`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}
