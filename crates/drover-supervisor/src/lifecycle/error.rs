//! Supervisor errors.

use crate::storage::{AgentId, AgentStatus, DatabaseError};
use crate::subprocess::LaunchError;

/// Errors from supervisor operations. Each displays as one human-readable
/// cause.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Agent already exists: {id}")]
    AlreadyExists { id: AgentId },

    #[error("Agent not found: {id}")]
    NotFound { id: AgentId },

    #[error("Cannot {operation} agent {id} while it is {from}")]
    InvalidTransition {
        id: AgentId,
        from: AgentStatus,
        operation: &'static str,
    },

    #[error("Agent {id} has no running process")]
    NotRunning { id: AgentId },

    #[error("Agent {id} still has a live run (pid {pid})")]
    StillRunning { id: AgentId, pid: u32 },

    #[error("Agent {id} was moved to {status} before its run finished")]
    Preempted { id: AgentId, status: AgentStatus },

    #[error("Launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("Storage error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Agent process failed ({status})")]
    ExitedWithFailure { code: Option<i32>, status: String },

    #[error("Agent turn failed: {}", message.as_deref().unwrap_or("no details reported"))]
    TurnFailed { message: Option<String> },

    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
