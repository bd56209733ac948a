//! CLI agent subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use tracing::{info, warn};

use crate::lifecycle::{SpawnRequest, Supervisor, SupervisorError, Turn, spawn_liveness_sweep};
use crate::storage::{AgentId, AgentKind, AgentRow, AgentStatus, AgentStore, LogEntry};
use crate::subprocess::{LaunchMode, LaunchSpec, launch};

/// Agent subcommand actions.
#[derive(Subcommand, Debug)]
pub enum AgentAction {
    /// Register a new agent and run its task
    Spawn {
        /// Agent name, unique within the scope
        name: String,
        /// Task handed to the agent
        task: String,
        /// Agent flavor
        #[arg(short, long, default_value = "codex")]
        kind: AgentKind,
        /// Model override passed to the agent CLI
        #[arg(short, long)]
        model: Option<String>,
        /// Working directory for the agent process
        #[arg(short = 'd', long)]
        working_dir: Option<PathBuf>,
        /// Return immediately and let a background worker drive the run
        #[arg(long)]
        detach: bool,
    },
    /// Resume an idle agent's session with a new prompt
    Prompt {
        name: String,
        text: String,
        /// Return immediately and let a background worker drive the run
        #[arg(long)]
        detach: bool,
    },
    /// Post a question from a busy agent and mark it waiting
    Ask { name: String, question: String },
    /// Send SIGINT to a running agent and mark it waiting
    Interrupt { name: String },
    /// Terminate an agent's process and delete the agent
    Kill { name: String },
    /// Archive a finished agent
    Archive { name: String },
    /// Restore an archived agent
    Unarchive { name: String },
    /// Print an agent's transcript
    Logs {
        name: String,
        /// Only entries after this log entry ID
        #[arg(long)]
        since: Option<i64>,
        /// Maximum entries to print (0 for all)
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    /// List agents in the scope
    Status {
        /// List agents in every scope
        #[arg(long)]
        all: bool,
    },
    /// Fail busy agents whose process has died
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C
        #[arg(long)]
        watch: bool,
    },
    /// Drive one run of an already registered agent (used by --detach)
    #[command(hide = true)]
    Worker {
        name: String,
        /// Resume with this prompt instead of running the initial task
        #[arg(long)]
        prompt: Option<String>,
    },
}

/// How to re-exec this binary as a background worker.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    /// Global flags the worker needs to reach the same database and state.
    pub global_args: Vec<String>,
}

impl WorkerLaunch {
    fn args(&self, scope: &str, name: &str, prompt: Option<&str>) -> Vec<String> {
        let mut args = self.global_args.clone();
        args.extend(["--scope", scope, "worker", name].map(String::from));
        if let Some(text) = prompt {
            args.extend(["--prompt".to_string(), text.to_string()]);
        }
        args
    }
}

/// Execute an agent subcommand within `scope`.
pub async fn run<S: AgentStore>(
    supervisor: &Supervisor<S>,
    scope: &str,
    worker: &WorkerLaunch,
    sweep_interval: Duration,
    action: AgentAction,
) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let id = |name: &str| AgentId::new(scope, name);

    match action {
        AgentAction::Spawn {
            name,
            task,
            kind,
            model,
            working_dir,
            detach,
        } => {
            let request = SpawnRequest {
                agent: id(&name),
                kind,
                task,
                model,
                working_directory: working_dir,
            };
            if detach {
                let row = supervisor.register(&request).await?;
                let pid = start_worker(supervisor, worker, &row, None).await?;
                writeln!(out, "{} started (worker pid {pid})", request.agent)?;
            } else {
                let agent = request.agent.clone();
                let result = supervisor.spawn(request).await.map(|(_, status)| status);
                report(&mut out, &agent, result)?;
            }
        }
        AgentAction::Prompt { name, text, detach } => {
            let agent = id(&name);
            if detach {
                let row = supervisor.prepare_prompt(&agent).await?;
                let pid = start_worker(supervisor, worker, &row, Some(&text)).await?;
                writeln!(out, "{agent} resumed (worker pid {pid})")?;
            } else {
                report(&mut out, &agent, supervisor.prompt(&agent, &text).await)?;
            }
        }
        AgentAction::Ask { name, question } => {
            let agent = id(&name);
            let message_id = supervisor.ask(&agent, &question).await?;
            writeln!(out, "{agent} waiting (message {message_id})")?;
        }
        AgentAction::Interrupt { name } => {
            let agent = id(&name);
            supervisor.interrupt(&agent).await?;
            writeln!(out, "{agent} interrupted")?;
        }
        AgentAction::Kill { name } => {
            let agent = id(&name);
            supervisor.kill(&agent).await?;
            writeln!(out, "{agent} killed")?;
        }
        AgentAction::Archive { name } => {
            let agent = id(&name);
            supervisor.archive(&agent).await?;
            writeln!(out, "{agent} archived")?;
        }
        AgentAction::Unarchive { name } => {
            let agent = id(&name);
            supervisor.unarchive(&agent).await?;
            writeln!(out, "{agent} unarchived")?;
        }
        AgentAction::Logs { name, since, limit } => {
            let agent = id(&name);
            supervisor.agent(&agent).await?;
            for entry in supervisor.logs(&agent, since, limit).await? {
                write_entry(&mut out, &entry)?;
            }
        }
        AgentAction::Status { all } => {
            let rows = supervisor.agents((!all).then_some(scope)).await?;
            if rows.is_empty() {
                writeln!(out, "No agents found.")?;
            } else {
                writeln!(
                    out,
                    "{:<24}  {:<16}  {:<7}  {:<9}  {:>7}  TASK",
                    "SCOPE", "NAME", "KIND", "STATUS", "PID"
                )?;
                for row in &rows {
                    write_row(&mut out, row)?;
                }
            }
        }
        AgentAction::Sweep { watch } => {
            let reaped = supervisor.sweep().await?;
            for agent in &reaped {
                writeln!(out, "{agent} failed (process gone)")?;
            }
            if watch {
                let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                let handle = spawn_liveness_sweep(supervisor.clone(), sweep_interval, shutdown_rx);
                tokio::signal::ctrl_c().await?;
                info!("Received Ctrl+C shutdown signal");
                if shutdown_tx.send(true).is_err() {
                    warn!("Liveness sweep already stopped");
                }
                if let Err(e) = handle.await {
                    warn!(error = %e, "Liveness sweep task failed");
                }
            }
        }
        AgentAction::Worker { name, prompt } => {
            let agent = id(&name);
            let row = supervisor.agent(&agent).await?;
            if row.status() != AgentStatus::Busy {
                return Err(SupervisorError::InvalidTransition {
                    id: agent,
                    from: row.status(),
                    operation: "run",
                }
                .into());
            }
            let turn = prompt.map_or(Turn::Initial, |text| Turn::Resume { text });
            supervisor.run_turn(&row, turn).await?;
        }
    }
    Ok(())
}

/// Re-exec this binary as a detached worker for the run prepared on `row`.
async fn start_worker<S: AgentStore>(
    supervisor: &Supervisor<S>,
    worker: &WorkerLaunch,
    row: &AgentRow,
    prompt: Option<&str>,
) -> anyhow::Result<u32> {
    let agent = &row.id();
    let spec = LaunchSpec::new(&worker.program, LaunchMode::StartDetached).args(worker.args(
        &agent.scope,
        &agent.name,
        prompt,
    ));
    match launch(spec).await {
        Ok(launched) => {
            info!(agent = %agent, pid = launched.pid(), "Detached worker started");
            Ok(launched.pid())
        }
        Err(e) => Err(supervisor
            .record_launch_failure(agent, row.run_seq, e.into())
            .await
            .into()),
    }
}

fn report(
    out: &mut impl Write,
    agent: &AgentId,
    result: Result<AgentStatus, SupervisorError>,
) -> anyhow::Result<()> {
    let status = result?;
    writeln!(out, "{agent} {status}")?;
    Ok(())
}

fn write_row(out: &mut impl Write, row: &AgentRow) -> io::Result<()> {
    let pid = row.pid().map_or_else(|| "-".to_string(), |p| p.to_string());
    writeln!(
        out,
        "{:<24}  {:<16}  {:<7}  {:<9}  {:>7}  {}",
        row.scope,
        row.name,
        row.kind,
        row.status(),
        pid,
        first_line(&row.task)
    )
}

fn write_entry(out: &mut impl Write, entry: &LogEntry) -> io::Result<()> {
    match entry.event_type.as_str() {
        "stdout" | "stderr" => write!(out, "{}", entry.content.as_deref().unwrap_or("")),
        label => {
            let mut line = format!("[{} {label}]", entry.id);
            if let Some(command) = &entry.command {
                line.push_str(&format!(" $ {command}"));
            }
            if let Some(code) = entry.exit_code {
                line.push_str(&format!(" (exit {code})"));
            }
            if let Some(content) = &entry.content {
                line.push(' ');
                line.push_str(first_line(content));
            }
            writeln!(out, "{line}")
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn worker_args_carry_globals_and_prompt() {
        let worker = WorkerLaunch {
            program: PathBuf::from("/usr/bin/drover"),
            global_args: vec!["--db-path".to_string(), "/tmp/d.db".to_string()],
        };
        assert_eq!(
            worker.args("proj:main", "alice", Some("go on")),
            ["--db-path", "/tmp/d.db", "--scope", "proj:main", "worker", "alice", "--prompt", "go on"]
        );
        assert_eq!(
            worker.args("proj:main", "bob", None),
            ["--db-path", "/tmp/d.db", "--scope", "proj:main", "worker", "bob"]
        );
    }

    #[test]
    fn event_entries_print_one_line() {
        let entry = LogEntry {
            id: 7,
            scope: "proj:main".to_string(),
            agent: "alice".to_string(),
            event_type: "command".to_string(),
            command: Some("cargo test".to_string()),
            content: Some("ok\nmore".to_string()),
            exit_code: Some(0),
            raw: None,
            created_at: 0,
        };
        let mut buf = Vec::new();
        write_entry(&mut buf, &entry).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "[7 command] $ cargo test (exit 0) ok\n");
    }

    #[test]
    fn raw_chunks_print_verbatim() {
        let entry = LogEntry {
            id: 1,
            scope: "s".to_string(),
            agent: "a".to_string(),
            event_type: "stdout".to_string(),
            command: None,
            content: Some("partial".to_string()),
            exit_code: None,
            raw: None,
            created_at: 0,
        };
        let mut buf = Vec::new();
        write_entry(&mut buf, &entry).unwrap();
        assert_eq!(buf, b"partial");
    }
}
