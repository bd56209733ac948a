//! Command lines for each agent flavor.

use std::path::PathBuf;

use drover_core::config::AgentsConfig;

use crate::storage::{AgentKind, AgentRow};

/// Which turn of the conversation a run drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// First run: the agent's task.
    Initial,
    /// Continue the stored session with a new prompt.
    Resume { text: String },
}

/// Program and arguments for one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn build(agents: &AgentsConfig, agent: &AgentRow, turn: &Turn) -> Self {
        match agent.kind() {
            AgentKind::Codex => codex(agents, agent, turn),
            AgentKind::Claude => claude(agents, agent, turn),
        }
    }
}

/// `codex [args] exec --json [-m model] <task>` or
/// `codex [args] exec --json [-m model] resume <token> <text>`.
fn codex(agents: &AgentsConfig, agent: &AgentRow, turn: &Turn) -> AgentCommand {
    let mut args = agents.codex_args.clone();
    args.extend(["exec".to_string(), "--json".to_string()]);
    if let Some(model) = &agent.model {
        args.extend(["-m".to_string(), model.clone()]);
    }
    match turn {
        Turn::Initial => args.push(agent.task.clone()),
        Turn::Resume { text } => {
            args.extend(["resume".to_string(), agent.session_token.clone(), text.clone()]);
        }
    }
    AgentCommand {
        program: agents.codex_bin.clone(),
        args,
    }
}

/// `claude [args] -p --session-id <token> [--model m] <task>` or
/// `claude [args] -p --resume <token> [--model m] <text>`.
fn claude(agents: &AgentsConfig, agent: &AgentRow, turn: &Turn) -> AgentCommand {
    let mut args = agents.claude_args.clone();
    args.push("-p".to_string());
    let prompt = match turn {
        Turn::Initial => {
            args.extend(["--session-id".to_string(), agent.session_token.clone()]);
            agent.task.clone()
        }
        Turn::Resume { text } => {
            args.extend(["--resume".to_string(), agent.session_token.clone()]);
            text.clone()
        }
    };
    if let Some(model) = &agent.model {
        args.extend(["--model".to_string(), model.clone()]);
    }
    args.push(prompt);
    AgentCommand {
        program: agents.claude_bin.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: AgentKind, model: Option<&str>) -> AgentRow {
        AgentRow {
            scope: "proj:main".to_string(),
            name: "alice".to_string(),
            kind: kind.as_str().to_string(),
            task: "fix the flaky test".to_string(),
            session_token: "tok-1".to_string(),
            status: "busy".to_string(),
            pid: None,
            run_seq: 0,
            owner_pid: None,
            model: model.map(String::from),
            working_directory: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
            archived_at: None,
        }
    }

    #[test]
    fn codex_initial_run() {
        let cmd = AgentCommand::build(&AgentsConfig::default(), &row(AgentKind::Codex, None), &Turn::Initial);
        assert_eq!(cmd.program, PathBuf::from("codex"));
        assert_eq!(cmd.args, ["exec", "--json", "fix the flaky test"]);
    }

    #[test]
    fn codex_resume_uses_session_token() {
        let agents = AgentsConfig {
            codex_args: vec!["--sandbox".to_string(), "workspace-write".to_string()],
            ..AgentsConfig::default()
        };
        let turn = Turn::Resume {
            text: "now add a test".to_string(),
        };
        let cmd = AgentCommand::build(&agents, &row(AgentKind::Codex, Some("o4-mini")), &turn);
        assert_eq!(
            cmd.args,
            [
                "--sandbox",
                "workspace-write",
                "exec",
                "--json",
                "-m",
                "o4-mini",
                "resume",
                "tok-1",
                "now add a test"
            ]
        );
    }

    #[test]
    fn claude_initial_pins_session_id() {
        let cmd = AgentCommand::build(&AgentsConfig::default(), &row(AgentKind::Claude, None), &Turn::Initial);
        assert_eq!(cmd.program, PathBuf::from("claude"));
        assert_eq!(cmd.args, ["-p", "--session-id", "tok-1", "fix the flaky test"]);
    }

    #[test]
    fn claude_resume() {
        let turn = Turn::Resume {
            text: "continue".to_string(),
        };
        let cmd = AgentCommand::build(&AgentsConfig::default(), &row(AgentKind::Claude, Some("opus")), &turn);
        assert_eq!(cmd.args, ["-p", "--resume", "tok-1", "--model", "opus", "continue"]);
    }
}
