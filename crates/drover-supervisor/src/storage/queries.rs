//! Agent queries for the drover supervisor.

use drover_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{AgentId, AgentRow, AgentStatus, NewAgent};

impl Database {
    // =========================================================================
    // Agent queries
    // =========================================================================

    /// Register a new agent in `busy` state.
    pub async fn create_agent(&self, new: &NewAgent) -> Result<AgentRow, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            r"
            INSERT INTO agents (scope, name, kind, task, session_token, status, model,
                                working_directory, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'busy', ?, ?, ?, ?)
            ",
        )
        .bind(&new.id.scope)
        .bind(&new.id.name)
        .bind(new.kind.as_str())
        .bind(&new.task)
        .bind(&new.session_token)
        .bind(&new.model)
        .bind(&new.working_directory)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_agent(&new.id).await
    }

    /// Get an agent by identity.
    pub async fn get_agent(&self, id: &AgentId) -> Result<AgentRow, DatabaseError> {
        self.find_agent(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Agent {id}")))
    }

    /// Get an agent by identity, `None` if it does not exist.
    pub async fn find_agent(&self, id: &AgentId) -> Result<Option<AgentRow>, DatabaseError> {
        let row = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE scope = ? AND name = ?")
            .bind(&id.scope)
            .bind(&id.name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// List agents, optionally restricted to one scope.
    pub async fn list_agents(&self, scope: Option<&str>) -> Result<Vec<AgentRow>, DatabaseError> {
        let rows = if let Some(scope) = scope {
            sqlx::query_as::<_, AgentRow>(
                "SELECT * FROM agents WHERE scope = ? ORDER BY created_at, name",
            )
            .bind(scope)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, AgentRow>("SELECT * FROM agents ORDER BY scope, created_at, name")
                .fetch_all(self.pool())
                .await?
        };
        Ok(rows)
    }

    /// Busy agents that have a recorded pid, i.e. the ones a liveness sweep
    /// should probe.
    pub async fn list_live_agents(&self) -> Result<Vec<AgentRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, AgentRow>(
            "SELECT * FROM agents WHERE status = 'busy' AND pid IS NOT NULL ORDER BY scope, name",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Delete an agent. Returns whether a row was removed.
    pub async fn delete_agent(&self, id: &AgentId) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM agents WHERE scope = ? AND name = ?")
            .bind(&id.scope)
            .bind(&id.name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the live child of run `run` and the process supervising it.
    ///
    /// Returns `false` when the agent is gone or has moved on to a newer run.
    pub async fn claim_run(
        &self,
        id: &AgentId,
        run: i64,
        pid: u32,
        owner_pid: u32,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE agents SET pid = ?, owner_pid = ?, updated_at = ?
            WHERE scope = ? AND name = ? AND run_seq = ?
            ",
        )
        .bind(i64::from(pid))
        .bind(i64::from(owner_pid))
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .bind(run)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear the recorded pid, but only if it is still `pid`. A newer run
    /// may already have replaced it.
    pub async fn clear_agent_pid(&self, id: &AgentId, pid: u32) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE agents SET pid = NULL, updated_at = ? WHERE scope = ? AND name = ? AND pid = ?",
        )
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .bind(i64::from(pid))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop the child and owner pids of run `run` once it is finalized.
    pub async fn release_run(&self, id: &AgentId, run: i64) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE agents SET pid = NULL, owner_pid = NULL, updated_at = ?
            WHERE scope = ? AND name = ? AND run_seq = ?
            ",
        )
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .bind(run)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the session token (placeholder replaced by the real one).
    pub async fn set_session_token(&self, id: &AgentId, token: &str) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "UPDATE agents SET session_token = ?, updated_at = ? WHERE scope = ? AND name = ?",
        )
        .bind(token)
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Guarded status change: set `to` only if the current stored status is
    /// one of `from` and the agent is not archived.
    ///
    /// Returns `true` if this call won the transition. Entering `complete` or
    /// `failed` also stamps `completed_at`.
    pub async fn transition_status(
        &self,
        id: &AgentId,
        from: &[AgentStatus],
        to: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        if to == AgentStatus::Archived {
            return Err(DatabaseError::Query(
                "archived is a flag, not a stored status".to_string(),
            ));
        }
        if from.is_empty() {
            return Ok(false);
        }

        let now = unix_timestamp();
        let completed_at = matches!(to, AgentStatus::Complete | AgentStatus::Failed).then_some(now);
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r"
            UPDATE agents
            SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at)
            WHERE scope = ? AND name = ? AND archived_at IS NULL AND status IN ({placeholders})
            "
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(now)
            .bind(completed_at)
            .bind(&id.scope)
            .bind(&id.name);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    /// First-writer-wins finalization of run `run`: `busy` to
    /// `complete`/`failed`. A newer run of the same agent is never touched.
    pub async fn finalize_if_busy(
        &self,
        id: &AgentId,
        run: i64,
        outcome: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        if !matches!(outcome, AgentStatus::Complete | AgentStatus::Failed) {
            return Err(DatabaseError::Query(format!(
                "{outcome} is not a terminal status"
            )));
        }
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE agents SET status = ?, completed_at = ?, updated_at = ?
            WHERE scope = ? AND name = ? AND run_seq = ?
              AND status = 'busy' AND archived_at IS NULL
            ",
        )
        .bind(outcome.as_str())
        .bind(now)
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .bind(run)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail run `run` whose child `pid` died unsupervised, releasing its
    /// pids. Loses if the owning run already released `pid`.
    pub async fn fail_dead_run(
        &self,
        id: &AgentId,
        run: i64,
        pid: u32,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE agents
            SET status = 'failed', completed_at = ?, pid = NULL, owner_pid = NULL, updated_at = ?
            WHERE scope = ? AND name = ? AND run_seq = ? AND pid = ?
              AND status = 'busy' AND archived_at IS NULL
            ",
        )
        .bind(now)
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .bind(run)
        .bind(i64::from(pid))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Start a new run for a `complete`, `failed`, `waiting` or archived
    /// agent: back to `busy`, `run_seq` bumped, completion and archive
    /// timestamps cleared.
    ///
    /// Refused while a previous run still holds a child or owner pid.
    pub async fn resume_agent(&self, id: &AgentId) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            UPDATE agents
            SET status = 'busy', run_seq = run_seq + 1, completed_at = NULL, archived_at = NULL,
                updated_at = ?
            WHERE scope = ? AND name = ? AND status IN ('complete', 'failed', 'waiting')
              AND pid IS NULL AND owner_pid IS NULL
            ",
        )
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the archive flag on a `complete`/`failed` agent.
    ///
    /// Archiving an already archived agent keeps the original timestamp and
    /// still reports success.
    pub async fn set_agent_archived(
        &self,
        id: &AgentId,
        archived: bool,
    ) -> Result<bool, DatabaseError> {
        let now = unix_timestamp();
        let archived_at = archived.then_some(now);

        let result = sqlx::query(
            r"
            UPDATE agents
            SET archived_at = CASE WHEN ? IS NULL THEN NULL ELSE COALESCE(archived_at, ?) END,
                updated_at = ?
            WHERE scope = ? AND name = ? AND status IN ('complete', 'failed')
            ",
        )
        .bind(archived_at)
        .bind(archived_at)
        .bind(now)
        .bind(&id.scope)
        .bind(&id.name)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::models::AgentKind;

    fn new_agent(name: &str) -> NewAgent {
        NewAgent {
            id: AgentId::new("proj:main", name),
            kind: AgentKind::Codex,
            task: "fix the build".to_string(),
            session_token: "placeholder".to_string(),
            model: None,
            working_directory: Some("/tmp".to_string()),
        }
    }

    async fn db_with_agent(name: &str) -> (Database, AgentId) {
        let db = Database::open_in_memory().await.unwrap();
        let agent = db.create_agent(&new_agent(name)).await.unwrap();
        (db, agent.id())
    }

    #[tokio::test]
    async fn create_and_get_agent() {
        let (db, id) = db_with_agent("alice").await;
        let agent = db.get_agent(&id).await.unwrap();

        assert_eq!(agent.name, "alice");
        assert_eq!(agent.kind(), AgentKind::Codex);
        assert_eq!(agent.status(), AgentStatus::Busy);
        assert!(agent.pid.is_none());
        assert!(agent.completed_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_name_in_scope_is_rejected() {
        let (db, _) = db_with_agent("alice").await;
        assert!(db.create_agent(&new_agent("alice")).await.is_err());

        let mut other_scope = new_agent("alice");
        other_scope.id.scope = "proj:feature".to_string();
        assert!(db.create_agent(&other_scope).await.is_ok());
    }

    #[tokio::test]
    async fn get_missing_agent_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        let err = db.get_agent(&AgentId::new("s", "ghost")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn turn_failed_then_exit_zero_stays_failed() {
        let (db, id) = db_with_agent("alice").await;

        assert!(db.finalize_if_busy(&id, 0, AgentStatus::Failed).await.unwrap());
        assert!(!db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap());

        let agent = db.get_agent(&id).await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Failed);
        assert!(agent.completed_at.is_some());
    }

    #[tokio::test]
    async fn exit_zero_then_stray_failure_stays_complete() {
        let (db, id) = db_with_agent("alice").await;

        assert!(db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap());
        assert!(!db.finalize_if_busy(&id, 0, AgentStatus::Failed).await.unwrap());

        assert_eq!(db.get_agent(&id).await.unwrap().status(), AgentStatus::Complete);
    }

    #[tokio::test]
    async fn resume_clears_completion_and_archive() {
        let (db, id) = db_with_agent("alice").await;
        db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap();
        assert!(db.set_agent_archived(&id, true).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().status(), AgentStatus::Archived);

        assert!(db.resume_agent(&id).await.unwrap());

        let agent = db.get_agent(&id).await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Busy);
        assert!(agent.completed_at.is_none());
        assert!(agent.archived_at.is_none());
    }

    #[tokio::test]
    async fn resume_rejects_busy() {
        let (db, id) = db_with_agent("alice").await;
        assert!(!db.resume_agent(&id).await.unwrap());
    }

    #[tokio::test]
    async fn archive_guard() {
        let (db, id) = db_with_agent("alice").await;
        assert!(!db.set_agent_archived(&id, true).await.unwrap());

        db.transition_status(&id, &[AgentStatus::Busy], AgentStatus::Waiting)
            .await
            .unwrap();
        assert!(!db.set_agent_archived(&id, true).await.unwrap());

        db.transition_status(&id, &[AgentStatus::Waiting], AgentStatus::Failed)
            .await
            .unwrap();
        assert!(db.set_agent_archived(&id, true).await.unwrap());
        let first = db.get_agent(&id).await.unwrap().archived_at;
        assert!(db.set_agent_archived(&id, true).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().archived_at, first);
    }

    #[tokio::test]
    async fn unarchive_restores_terminal_status() {
        let (db, id) = db_with_agent("alice").await;
        db.finalize_if_busy(&id, 0, AgentStatus::Failed).await.unwrap();
        db.set_agent_archived(&id, true).await.unwrap();

        assert!(db.set_agent_archived(&id, false).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().status(), AgentStatus::Failed);
    }

    #[tokio::test]
    async fn archived_agent_cannot_be_finalized() {
        let (db, id) = db_with_agent("alice").await;
        db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap();
        db.set_agent_archived(&id, true).await.unwrap();

        assert!(
            !db.transition_status(&id, &[AgentStatus::Complete], AgentStatus::Failed)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn clear_pid_only_matches_current_pid() {
        let (db, id) = db_with_agent("alice").await;
        assert!(db.claim_run(&id, 0, 100, 1).await.unwrap());

        assert!(!db.clear_agent_pid(&id, 99).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().pid(), Some(100));
        assert!(db.clear_agent_pid(&id, 100).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().pid(), None);
    }

    #[tokio::test]
    async fn live_agents_are_busy_with_pid() {
        let (db, alice) = db_with_agent("alice").await;
        let bob = db.create_agent(&new_agent("bob")).await.unwrap().id();
        db.create_agent(&new_agent("carol")).await.unwrap();

        db.claim_run(&alice, 0, 10, 1).await.unwrap();
        db.claim_run(&bob, 0, 11, 1).await.unwrap();
        db.finalize_if_busy(&bob, 0, AgentStatus::Complete).await.unwrap();

        let live = db.list_live_agents().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "alice");
    }

    #[tokio::test]
    async fn session_token_overwritten() {
        let (db, id) = db_with_agent("alice").await;
        db.set_session_token(&id, "thread-42").await.unwrap();
        assert_eq!(db.get_agent(&id).await.unwrap().session_token, "thread-42");
    }

    #[tokio::test]
    async fn delete_agent_reports_removal() {
        let (db, id) = db_with_agent("alice").await;
        assert!(db.delete_agent(&id).await.unwrap());
        assert!(!db.delete_agent(&id).await.unwrap());
        assert!(db.find_agent(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_starts_a_new_run() {
        let (db, id) = db_with_agent("alice").await;
        assert_eq!(db.get_agent(&id).await.unwrap().run_seq, 0);
        db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap();

        assert!(db.resume_agent(&id).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().run_seq, 1);
    }

    #[tokio::test]
    async fn stale_run_cannot_finalize_newer_run() {
        let (db, id) = db_with_agent("alice").await;
        db.transition_status(&id, &[AgentStatus::Busy], AgentStatus::Waiting)
            .await
            .unwrap();
        assert!(db.resume_agent(&id).await.unwrap());

        assert!(!db.finalize_if_busy(&id, 0, AgentStatus::Complete).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().status(), AgentStatus::Busy);
        assert!(db.finalize_if_busy(&id, 1, AgentStatus::Complete).await.unwrap());
    }

    #[tokio::test]
    async fn resume_refused_while_a_run_holds_pids() {
        let (db, id) = db_with_agent("alice").await;
        db.claim_run(&id, 0, 100, 1).await.unwrap();
        db.transition_status(&id, &[AgentStatus::Busy], AgentStatus::Waiting)
            .await
            .unwrap();
        assert!(!db.resume_agent(&id).await.unwrap());

        db.clear_agent_pid(&id, 100).await.unwrap();
        assert!(!db.resume_agent(&id).await.unwrap());

        assert!(db.release_run(&id, 0).await.unwrap());
        assert!(db.resume_agent(&id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_rejects_superseded_run() {
        let (db, id) = db_with_agent("alice").await;
        db.finalize_if_busy(&id, 0, AgentStatus::Failed).await.unwrap();
        db.resume_agent(&id).await.unwrap();

        assert!(!db.claim_run(&id, 0, 100, 1).await.unwrap());
        assert!(db.claim_run(&id, 1, 100, 1).await.unwrap());
        let agent = db.get_agent(&id).await.unwrap();
        assert_eq!(agent.pid(), Some(100));
        assert_eq!(agent.owner_pid(), Some(1));
    }

    #[tokio::test]
    async fn dead_run_fails_only_while_its_pid_is_recorded() {
        let (db, id) = db_with_agent("alice").await;
        db.claim_run(&id, 0, 100, 1).await.unwrap();

        assert!(!db.fail_dead_run(&id, 0, 99).await.unwrap());
        db.clear_agent_pid(&id, 100).await.unwrap();
        assert!(!db.fail_dead_run(&id, 0, 100).await.unwrap());
        assert_eq!(db.get_agent(&id).await.unwrap().status(), AgentStatus::Busy);

        db.claim_run(&id, 0, 101, 1).await.unwrap();
        assert!(db.fail_dead_run(&id, 0, 101).await.unwrap());
        let agent = db.get_agent(&id).await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Failed);
        assert!(agent.pid.is_none());
        assert!(agent.owner_pid.is_none());
    }

    #[tokio::test]
    async fn finalize_rejects_non_terminal_outcome() {
        let (db, id) = db_with_agent("alice").await;
        assert!(db.finalize_if_busy(&id, 0, AgentStatus::Waiting).await.is_err());
    }
}
