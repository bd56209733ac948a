//! Database models for the drover supervisor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use drover_core::db::unix_timestamp;

/// Identity of a supervised agent: a name unique within an opaque scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    pub scope: String,
    pub name: String,
}

impl AgentId {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Agent flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Emits the line-delimited JSON event protocol on stdout.
    Codex,
    /// Plain output; transcript is captured but not decoded.
    Claude,
}

impl AgentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
        }
    }

    /// Whether stdout carries protocol events worth decoding.
    pub const fn emits_events(&self) -> bool {
        matches!(self, Self::Codex)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codex" => Ok(Self::Codex),
            "claude" => Ok(Self::Claude),
            other => Err(format!("unknown agent kind: {other}")),
        }
    }
}

/// Agent status enum.
///
/// `Archived` is never stored in the `status` column; it is derived from
/// `archived_at` being set on a `complete` or `failed` agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Busy,
    Waiting,
    Complete,
    Failed,
    Archived,
}

impl AgentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Waiting => "waiting",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Archived)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "busy" => Ok(Self::Busy),
            "waiting" => Ok(Self::Waiting),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Agent record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentRow {
    pub scope: String,
    pub name: String,
    pub kind: String,
    pub task: String,
    pub session_token: String,
    pub status: String,
    pub pid: Option<i64>,
    pub run_seq: i64,
    pub owner_pid: Option<i64>,
    pub model: Option<String>,
    pub working_directory: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub archived_at: Option<i64>,
}

impl AgentRow {
    pub fn id(&self) -> AgentId {
        AgentId::new(self.scope.clone(), self.name.clone())
    }

    /// Effective status, with `archived` layered over `complete`/`failed`.
    pub fn status(&self) -> AgentStatus {
        if self.archived_at.is_some() {
            return AgentStatus::Archived;
        }
        self.status.parse().unwrap_or(AgentStatus::Failed)
    }

    /// Stored status, ignoring the archive flag.
    pub fn base_status(&self) -> AgentStatus {
        self.status.parse().unwrap_or(AgentStatus::Failed)
    }

    pub fn kind(&self) -> AgentKind {
        self.kind.parse().unwrap_or(AgentKind::Claude)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.and_then(|p| u32::try_from(p).ok())
    }

    /// Pid of the process supervising the current run.
    pub fn owner_pid(&self) -> Option<u32> {
        self.owner_pid.and_then(|p| u32::try_from(p).ok())
    }
}

/// Fields required to register a new agent.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub task: String,
    pub session_token: String,
    pub model: Option<String>,
    pub working_directory: Option<String>,
}

/// Transcript entry from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub scope: String,
    pub agent: String,
    pub event_type: String,
    pub command: Option<String>,
    pub content: Option<String>,
    pub exit_code: Option<i64>,
    pub raw: Option<String>,
    pub created_at: i64,
}

/// A transcript entry about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub scope: String,
    pub agent: String,
    pub event_type: String,
    pub command: Option<String>,
    pub content: Option<String>,
    pub exit_code: Option<i32>,
    pub raw: Option<String>,
    pub created_at: i64,
}

impl NewLogEntry {
    /// Start an entry for `agent` stamped with the current time.
    pub fn new(agent: &AgentId, event_type: impl Into<String>) -> Self {
        Self {
            scope: agent.scope.clone(),
            agent: agent.name.clone(),
            event_type: event_type.into(),
            command: None,
            content: None,
            exit_code: None,
            raw: None,
            created_at: unix_timestamp(),
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: Option<String>) -> Self {
        self.command = command;
        self
    }

    #[must_use]
    pub const fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    #[must_use]
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// Message record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub scope: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub kind: String,
    pub body: String,
    pub created_at: i64,
}

/// A message about to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub scope: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub kind: String,
    pub body: String,
}

impl NewMessage {
    pub fn from_agent(agent: &AgentId, kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scope: agent.scope.clone(),
            from_agent: agent.name.clone(),
            to_agent: None,
            kind: kind.into(),
            body: body.into(),
        }
    }
}

/// Filter for listing messages. `None` fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub scope: String,
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub kind: Option<String>,
    /// Only messages after this id, in `(created_at, id)` order.
    pub since_id: Option<i64>,
    pub limit: u32,
}
