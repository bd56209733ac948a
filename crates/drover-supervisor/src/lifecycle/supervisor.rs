//! The agent lifecycle state machine.
//!
//! [`Supervisor`] is the only writer of agent rows. It:
//! - registers agents and drives their runs (launch, drain, finalize)
//! - applies explicit commands (ask, archive, interrupt, kill)
//! - reconciles protocol-level and exit-code-level completion with a
//!   guarded `busy -> complete|failed` transition, so the first signal wins
//! - publishes every persisted log entry and message on a broadcast feed

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use drover_core::config::{AgentsConfig, Config};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::command::{AgentCommand, Turn};
use super::error::{Result, SupervisorError};
use super::error_file::{clear_launch_error, read_launch_error, write_launch_error};
use super::scratch::{ScratchHome, codex_home_source};
use crate::storage::{
    AgentId, AgentKind, AgentRow, AgentStatus, AgentStore, DatabaseError, LogEntry, Message,
    MessageFilter, NewAgent, NewLogEntry, NewMessage,
};
use crate::subprocess::signal::{self, Signal};
use crate::subprocess::{
    LaunchError, LaunchMode, LaunchSpec, Launched, MuxConfig, inherited_env_with, launch,
};
use crate::transcript::{DrainSummary, FeedItem, FeedSender, FeedSource, TranscriptDrain, publish};

/// Broadcast buffer for the wakeup feed.
const FEED_CAPACITY: usize = 256;

/// Message kind for synthetic exit notifications.
pub const EXIT_MESSAGE_KIND: &str = "exit";

/// Message kind for questions posted by `ask`.
pub const QUESTION_MESSAGE_KIND: &str = "question";

/// Resolved per-invocation settings for a [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub agents: AgentsConfig,
    pub mux: MuxConfig,
    /// Root of the launch-error side channel.
    pub state_dir: PathBuf,
    /// Grace period between SIGTERM and SIGKILL on `kill`.
    pub terminate_timeout: Duration,
    pub feed_capacity: usize,
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Self {
        let state_dir = config
            .supervisor
            .state_dir
            .clone()
            .or_else(drover_core::config::state_dir)
            .unwrap_or_else(|| std::env::temp_dir().join("drover"));

        Self {
            agents: config.agents.clone(),
            mux: MuxConfig::from_config(&config.supervisor),
            state_dir,
            terminate_timeout: Duration::from_secs(config.supervisor.terminate_timeout_secs),
            feed_capacity: FEED_CAPACITY,
        }
    }
}

/// A request to register and run a new agent.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub agent: AgentId,
    pub kind: AgentKind,
    pub task: String,
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
}

/// Drives agent lifecycles against an [`AgentStore`].
#[derive(Clone)]
pub struct Supervisor<S> {
    store: S,
    options: Arc<SupervisorOptions>,
    feed: FeedSender,
}

impl<S: AgentStore> Supervisor<S> {
    pub fn new(store: S, options: SupervisorOptions) -> Self {
        let (feed, _) = broadcast::channel(options.feed_capacity.max(1));
        Self {
            store,
            options: Arc::new(options),
            feed,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Subscribe to newly persisted log entries and messages.
    ///
    /// Slow subscribers that fall more than the feed capacity behind lose
    /// items; the rows themselves remain readable from storage.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedItem> {
        self.feed.subscribe()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn agent(&self, id: &AgentId) -> Result<AgentRow> {
        self.store
            .find_agent(id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound { id: id.clone() })
    }

    pub async fn agents(&self, scope: Option<&str>) -> Result<Vec<AgentRow>> {
        Ok(self.store.list_agents(scope).await?)
    }

    pub async fn logs(&self, id: &AgentId, since_id: Option<i64>, limit: u32) -> Result<Vec<LogEntry>> {
        Ok(self.store.list_log_entries_since(id, since_id, limit).await?)
    }

    pub async fn messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        Ok(self.store.list_messages(filter).await?)
    }

    /// Text of the agent's last launch failure, if any.
    pub async fn launch_error(&self, id: &AgentId) -> Result<Option<String>> {
        Ok(read_launch_error(&self.options.state_dir, id).await?)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Register a new agent in `busy` with a locally minted session token.
    pub async fn register(&self, request: &SpawnRequest) -> Result<AgentRow> {
        if self.store.find_agent(&request.agent).await?.is_some() {
            return Err(SupervisorError::AlreadyExists {
                id: request.agent.clone(),
            });
        }

        let row = self
            .store
            .create_agent(&NewAgent {
                id: request.agent.clone(),
                kind: request.kind,
                task: request.task.clone(),
                session_token: uuid::Uuid::new_v4().to_string(),
                model: request.model.clone(),
                working_directory: request
                    .working_directory
                    .as_ref()
                    .map(|p| p.display().to_string()),
            })
            .await?;

        info!(agent = %request.agent, kind = %request.kind, "Agent registered");
        Ok(row)
    }

    /// Register an agent and run its task to completion.
    ///
    /// Returns the new agent's identity and its status after the run.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<(AgentId, AgentStatus)> {
        let row = self.register(&request).await?;
        let status = self.run_turn(&row, Turn::Initial).await?;
        Ok((row.id(), status))
    }

    /// Move an idle agent back to `busy` for a new prompt.
    ///
    /// Accepts `complete`, `failed`, `waiting` and archived agents; clears
    /// the completion and archive timestamps. Refused while the previous
    /// run's child or supervising process is still alive.
    pub async fn prepare_prompt(&self, id: &AgentId) -> Result<AgentRow> {
        let row = self.agent(id).await?;
        if row.status() == AgentStatus::Busy {
            return Err(SupervisorError::InvalidTransition {
                id: id.clone(),
                from: AgentStatus::Busy,
                operation: "prompt",
            });
        }
        self.ensure_run_released(&row).await?;

        if !self.store.resume_agent(id).await? {
            let current = self.agent(id).await?;
            if let Some(pid) = current.pid().or_else(|| current.owner_pid()) {
                return Err(SupervisorError::StillRunning { id: id.clone(), pid });
            }
            return Err(SupervisorError::InvalidTransition {
                id: id.clone(),
                from: current.status(),
                operation: "prompt",
            });
        }
        info!(agent = %id, from = %row.status(), run = row.run_seq + 1, "Agent resumed");
        self.agent(id).await
    }

    /// Fail with `StillRunning` while the row's previous run is alive, and
    /// drop the pids of a run that died without releasing them.
    async fn ensure_run_released(&self, row: &AgentRow) -> Result<()> {
        let id = row.id();
        if let Some(pid) = row.pid().filter(|&pid| signal::is_alive(pid)) {
            return Err(SupervisorError::StillRunning { id, pid });
        }
        if let Some(owner) = row.owner_pid().filter(|&pid| signal::is_alive(pid)) {
            return Err(SupervisorError::StillRunning { id, pid: owner });
        }
        if row.pid.is_some() || row.owner_pid.is_some() {
            warn!(
                agent = %id,
                pid = ?row.pid(),
                owner = ?row.owner_pid(),
                "Releasing pids of a run that died unsupervised"
            );
            self.store.release_run(&id, row.run_seq).await?;
        }
        Ok(())
    }

    /// Resume an agent's session with `text` and run it to completion.
    pub async fn prompt(&self, id: &AgentId, text: &str) -> Result<AgentStatus> {
        let row = self.prepare_prompt(id).await?;
        self.run_turn(
            &row,
            Turn::Resume {
                text: text.to_string(),
            },
        )
        .await
    }

    /// Launch run `row.run_seq` for a `busy` agent and supervise it until
    /// the child exits and its transcript is fully persisted.
    ///
    /// Returns the agent's status after the run. A failed run is reported
    /// as an error whose cause is, in order of precedence, the transcript
    /// persistence failure, the abnormal exit, or the agent's `turn.failed`.
    pub async fn run_turn(&self, row: &AgentRow, turn: Turn) -> Result<AgentStatus> {
        let id = row.id();
        let run = row.run_seq;
        let kind = row.kind();
        clear_launch_error(&self.options.state_dir, &id).await;

        let command = AgentCommand::build(&self.options.agents, row, &turn);
        let scratch = if kind == AgentKind::Codex {
            let source = codex_home_source(self.options.agents.codex_home.as_deref());
            match ScratchHome::prepare(source.as_deref()) {
                Ok(scratch) => Some(scratch),
                Err(e) => {
                    return Err(self
                        .record_launch_failure(&id, run, SupervisorError::Io(e))
                        .await);
                }
            }
        } else {
            None
        };

        let mut spec = LaunchSpec::new(command.program, LaunchMode::Capture)
            .args(command.args)
            .current_dir(row.working_directory.as_ref().map(PathBuf::from))
            .mux(self.options.mux);
        if let Some(scratch) = &scratch {
            spec = spec.env(inherited_env_with([(
                "CODEX_HOME",
                scratch.path().display().to_string(),
            )]));
        }

        let mut launched = match launch(spec).await {
            Ok(launched) => launched,
            Err(e) => return Err(self.record_launch_failure(&id, run, e.into()).await),
        };
        let pid = launched.pid();
        match self.store.claim_run(&id, run, pid, std::process::id()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(agent = %id, pid, run, "Run superseded before its child was recorded");
                abandon(&mut launched).await;
                return Err(self.preempted(&id).await);
            }
            Err(e) => {
                abandon(&mut launched).await;
                return Err(self.record_launch_failure(&id, run, e.into()).await);
            }
        }
        info!(agent = %id, pid, run, kind = %kind, ?turn, "Agent run started");

        let output = launched.take_output();
        let drain = async {
            match output {
                Some(rx) => {
                    TranscriptDrain::new(&self.store, &id, run, kind.emits_events(), &self.feed)
                        .run(rx)
                        .await
                }
                None => Ok(DrainSummary::default()),
            }
        };
        // The child pid is dropped as soon as it is reaped; the run stays
        // owned by this process until it is finalized.
        let wait = async {
            let waited = launched.wait().await;
            if let Err(e) = self.store.clear_agent_pid(&id, pid).await {
                warn!(agent = %id, pid, error = %e, "Failed to clear pid");
            }
            waited
        };
        let (drained, waited) = tokio::join!(drain, wait);
        drop(scratch);

        let result = self.finalize_run(&id, run, drained, waited).await;
        if let Err(e) = self.store.release_run(&id, run).await {
            warn!(agent = %id, run, error = %e, "Failed to release run");
        }
        result
    }

    /// Commit the run's outcome once the transcript is persisted.
    async fn finalize_run(
        &self,
        id: &AgentId,
        run: i64,
        drained: std::result::Result<DrainSummary, DatabaseError>,
        waited: std::result::Result<ExitStatus, LaunchError>,
    ) -> Result<AgentStatus> {
        let summary = match drained {
            Ok(summary) => summary,
            Err(e) => {
                let detail = format!("transcript persistence failed: {e}");
                if let Err(fe) = self.finalize(id, run, AgentStatus::Failed, &detail).await {
                    error!(agent = %id, error = %fe, "Failed to record run failure");
                }
                return Err(SupervisorError::Persistence(e));
            }
        };

        if summary.finalized {
            let detail = summary
                .failure_message
                .clone()
                .unwrap_or_else(|| "turn failed".to_string());
            self.post_exit(id, AgentStatus::Failed, &detail).await;
        }

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                self.record_run_failure(id, run, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        if !status.success() {
            self.record_run_failure(id, run, &format!("exited with {status}"))
                .await?;
            return Err(SupervisorError::ExitedWithFailure {
                code: status.code(),
                status: status.to_string(),
            });
        }

        let won = self
            .finalize(id, run, AgentStatus::Complete, "exited 0")
            .await?;
        if summary.turn_failed {
            return Err(SupervisorError::TurnFailed {
                message: summary.failure_message,
            });
        }
        if won {
            return Ok(AgentStatus::Complete);
        }

        // ask/interrupt leave the agent waiting; anything else that beat a
        // clean exit is reported as the run's failure.
        let current = self.agent(id).await?;
        if current.run_seq != run || current.base_status() != AgentStatus::Waiting {
            return Err(SupervisorError::Preempted {
                id: id.clone(),
                status: current.status(),
            });
        }
        Ok(current.status())
    }

    /// Guarded `busy -> outcome` for run `run`; posts the exit notification
    /// when this call won. Returns whether it won.
    async fn finalize(
        &self,
        id: &AgentId,
        run: i64,
        outcome: AgentStatus,
        detail: &str,
    ) -> std::result::Result<bool, DatabaseError> {
        let won = self.store.finalize_if_busy(id, run, outcome).await?;
        if won {
            info!(agent = %id, run, status = %outcome, detail, "Agent finalized");
            self.post_exit(id, outcome, detail).await;
        }
        Ok(won)
    }

    async fn record_run_failure(&self, id: &AgentId, run: i64, detail: &str) -> Result<()> {
        if let Err(e) = write_launch_error(&self.options.state_dir, id, detail).await {
            warn!(agent = %id, error = %e, "Failed to write launch error file");
        }
        self.finalize(id, run, AgentStatus::Failed, detail).await?;
        Ok(())
    }

    /// Record a launch of run `run` that never produced a supervised child,
    /// then hand the cause back to the caller.
    pub async fn record_launch_failure(
        &self,
        id: &AgentId,
        run: i64,
        cause: SupervisorError,
    ) -> SupervisorError {
        error!(agent = %id, run, error = %cause, "Agent launch failed");
        let detail = cause.to_string();
        if let Err(e) = write_launch_error(&self.options.state_dir, id, &detail).await {
            warn!(agent = %id, error = %e, "Failed to write launch error file");
        }
        if let Err(e) = self.finalize(id, run, AgentStatus::Failed, &detail).await {
            warn!(agent = %id, error = %e, "Failed to mark launch failure");
        }
        cause
    }

    /// Error for a run whose agent moved on without it.
    async fn preempted(&self, id: &AgentId) -> SupervisorError {
        match self.store.find_agent(id).await {
            Ok(Some(row)) => SupervisorError::Preempted {
                id: id.clone(),
                status: row.status(),
            },
            Ok(None) => SupervisorError::NotFound { id: id.clone() },
            Err(e) => e.into(),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Post a question from a busy agent and move it to `waiting`. The child
    /// process is left alone.
    pub async fn ask(&self, id: &AgentId, question: &str) -> Result<i64> {
        let row = self.agent(id).await?;
        if !self
            .store
            .transition_status(id, &[AgentStatus::Busy], AgentStatus::Waiting)
            .await?
        {
            return Err(SupervisorError::InvalidTransition {
                id: id.clone(),
                from: row.status(),
                operation: "ask",
            });
        }
        info!(agent = %id, "Agent waiting on a question");
        self.post_message(&NewMessage::from_agent(id, QUESTION_MESSAGE_KIND, question))
            .await
    }

    /// Archive a `complete` or `failed` agent. Archiving twice is a no-op.
    pub async fn archive(&self, id: &AgentId) -> Result<()> {
        let row = self.agent(id).await?;
        match row.status() {
            AgentStatus::Archived => Ok(()),
            AgentStatus::Complete | AgentStatus::Failed => {
                if self.store.set_agent_archived(id, true).await? {
                    info!(agent = %id, "Agent archived");
                    Ok(())
                } else {
                    let current = self.agent(id).await?;
                    Err(SupervisorError::InvalidTransition {
                        id: id.clone(),
                        from: current.status(),
                        operation: "archive",
                    })
                }
            }
            from @ (AgentStatus::Busy | AgentStatus::Waiting) => {
                Err(SupervisorError::InvalidTransition {
                    id: id.clone(),
                    from,
                    operation: "archive",
                })
            }
        }
    }

    /// Clear the archive flag, restoring `complete` or `failed`.
    pub async fn unarchive(&self, id: &AgentId) -> Result<()> {
        let row = self.agent(id).await?;
        match row.status() {
            AgentStatus::Archived => {
                self.store.set_agent_archived(id, false).await?;
                info!(agent = %id, status = %row.base_status(), "Agent unarchived");
                Ok(())
            }
            AgentStatus::Complete | AgentStatus::Failed => Ok(()),
            from @ (AgentStatus::Busy | AgentStatus::Waiting) => {
                Err(SupervisorError::InvalidTransition {
                    id: id.clone(),
                    from,
                    operation: "unarchive",
                })
            }
        }
    }

    /// Send SIGINT to the agent's child and mark it `waiting`. Supervision
    /// of the run continues until the child's streams close.
    pub async fn interrupt(&self, id: &AgentId) -> Result<()> {
        let row = self.agent(id).await?;
        let pid = row
            .pid()
            .ok_or_else(|| SupervisorError::NotRunning { id: id.clone() })?;

        match signal::send_signal(pid, Signal::Interrupt) {
            Ok(()) => {}
            Err(e) if signal::is_no_such_process(&e) => {
                return Err(SupervisorError::NotRunning { id: id.clone() });
            }
            Err(e) => {
                return Err(SupervisorError::Signal {
                    pid,
                    reason: e.to_string(),
                });
            }
        }

        if self
            .store
            .transition_status(id, &[AgentStatus::Busy], AgentStatus::Waiting)
            .await?
        {
            info!(agent = %id, pid, "Agent interrupted");
        }
        Ok(())
    }

    /// Terminate the agent's child if it has one, post an exit message and
    /// delete the agent.
    pub async fn kill(&self, id: &AgentId) -> Result<()> {
        let row = self.agent(id).await?;

        if let Some(pid) = row.pid() {
            signal::terminate(pid, self.options.terminate_timeout)
                .await
                .map_err(|e| SupervisorError::Signal {
                    pid,
                    reason: e.to_string(),
                })?;
        }

        self.post_message(&NewMessage::from_agent(
            id,
            EXIT_MESSAGE_KIND,
            format!("{} killed", id.name),
        ))
        .await?;
        self.store.delete_agent(id).await?;
        info!(agent = %id, pid = ?row.pid(), "Agent killed");
        Ok(())
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Fail every `busy` agent whose recorded pid is no longer running and
    /// whose supervising process is gone too. Returns the agents this sweep
    /// finalized.
    pub async fn sweep(&self) -> Result<Vec<AgentId>> {
        let mut reaped = Vec::new();

        for row in self.store.list_live_agents().await? {
            let Some(pid) = row.pid() else {
                continue;
            };
            if signal::is_alive(pid) {
                continue;
            }

            let id = row.id();
            if let Some(owner) = row.owner_pid().filter(|&owner| signal::is_alive(owner)) {
                debug!(agent = %id, pid, owner, "Child exited; run still supervised");
                continue;
            }

            warn!(agent = %id, pid, "Agent process is gone without finalizing");
            let detail = format!("process {pid} is no longer running");
            if !self.store.fail_dead_run(&id, row.run_seq, pid).await? {
                continue;
            }
            info!(
                agent = %id,
                run = row.run_seq,
                status = %AgentStatus::Failed,
                detail = %detail,
                "Agent finalized"
            );
            self.post_exit(&id, AgentStatus::Failed, &detail).await;

            let entry = NewLogEntry::new(&id, EXIT_MESSAGE_KIND).with_content(detail);
            let entry_id = self.store.append_log_entry(&entry).await?;
            publish(
                &self.feed,
                FeedItem {
                    agent: id.clone(),
                    source: FeedSource::LogEntry,
                    id: entry_id,
                    event_type: entry.event_type,
                },
            );
            reaped.push(id);
        }

        Ok(reaped)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    async fn post_message(&self, message: &NewMessage) -> Result<i64> {
        let id = self.store.append_message(message).await?;
        publish(
            &self.feed,
            FeedItem {
                agent: AgentId::new(message.scope.clone(), message.from_agent.clone()),
                source: FeedSource::Message,
                id,
                event_type: message.kind.clone(),
            },
        );
        Ok(id)
    }

    /// Exit notifications are best effort; a failure is logged, not raised.
    async fn post_exit(&self, id: &AgentId, status: AgentStatus, detail: &str) {
        let body = format!("{} {status}: {detail}", id.name);
        if let Err(e) = self
            .post_message(&NewMessage::from_agent(id, EXIT_MESSAGE_KIND, body))
            .await
        {
            warn!(agent = %id, error = %e, "Failed to post exit notification");
        }
    }
}

/// Kill and reap a child that no run will supervise.
async fn abandon(launched: &mut Launched) {
    let pid = launched.pid();
    match signal::send_signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(e) if signal::is_no_such_process(&e) => {}
        Err(e) => warn!(pid, error = %e, "Failed to kill abandoned child"),
    }
    if let Err(e) = launched.wait().await {
        warn!(pid, error = %e, "Failed to reap abandoned child");
    }
}

impl<S> std::fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
