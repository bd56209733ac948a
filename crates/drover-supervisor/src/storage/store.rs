//! The storage contract consumed by the supervisor.

use std::future::Future;

use super::db::{Database, DatabaseError};
use super::models::{
    AgentId, AgentRow, AgentStatus, LogEntry, Message, MessageFilter, NewAgent, NewLogEntry,
    NewMessage,
};

/// CRUD-style accessors the lifecycle code needs from persistent storage.
///
/// Every status mutation is a single guarded statement, so a store needs no
/// locking beyond its own per-statement atomicity.
pub trait AgentStore: Clone + Send + Sync + 'static {
    fn create_agent(
        &self,
        new: &NewAgent,
    ) -> impl Future<Output = Result<AgentRow, DatabaseError>> + Send;

    fn find_agent(
        &self,
        id: &AgentId,
    ) -> impl Future<Output = Result<Option<AgentRow>, DatabaseError>> + Send;

    fn list_agents(
        &self,
        scope: Option<&str>,
    ) -> impl Future<Output = Result<Vec<AgentRow>, DatabaseError>> + Send;

    fn list_live_agents(&self) -> impl Future<Output = Result<Vec<AgentRow>, DatabaseError>> + Send;

    fn delete_agent(&self, id: &AgentId) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    /// Record run `run`'s child and supervising process; `false` if the
    /// agent has moved on to another run.
    fn claim_run(
        &self,
        id: &AgentId,
        run: i64,
        pid: u32,
        owner_pid: u32,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn clear_agent_pid(
        &self,
        id: &AgentId,
        pid: u32,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn release_run(
        &self,
        id: &AgentId,
        run: i64,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn set_session_token(
        &self,
        id: &AgentId,
        token: &str,
    ) -> impl Future<Output = Result<(), DatabaseError>> + Send;

    /// Compare-and-set on status; `true` if this call applied the change.
    fn transition_status(
        &self,
        id: &AgentId,
        from: &[AgentStatus],
        to: AgentStatus,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn resume_agent(&self, id: &AgentId) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn set_agent_archived(
        &self,
        id: &AgentId,
        archived: bool,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    fn append_log_entry(
        &self,
        entry: &NewLogEntry,
    ) -> impl Future<Output = Result<i64, DatabaseError>> + Send;

    fn list_log_entries_since(
        &self,
        agent: &AgentId,
        since_id: Option<i64>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<LogEntry>, DatabaseError>> + Send;

    fn append_message(
        &self,
        message: &NewMessage,
    ) -> impl Future<Output = Result<i64, DatabaseError>> + Send;

    fn list_messages(
        &self,
        filter: &MessageFilter,
    ) -> impl Future<Output = Result<Vec<Message>, DatabaseError>> + Send;

    /// First-writer-wins finalization of run `run`: `busy` to `outcome`.
    fn finalize_if_busy(
        &self,
        id: &AgentId,
        run: i64,
        outcome: AgentStatus,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;

    /// Fail run `run` whose child `pid` died without being finalized.
    fn fail_dead_run(
        &self,
        id: &AgentId,
        run: i64,
        pid: u32,
    ) -> impl Future<Output = Result<bool, DatabaseError>> + Send;
}

impl AgentStore for Database {
    async fn create_agent(&self, new: &NewAgent) -> Result<AgentRow, DatabaseError> {
        Self::create_agent(self, new).await
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<AgentRow>, DatabaseError> {
        Self::find_agent(self, id).await
    }

    async fn list_agents(&self, scope: Option<&str>) -> Result<Vec<AgentRow>, DatabaseError> {
        Self::list_agents(self, scope).await
    }

    async fn list_live_agents(&self) -> Result<Vec<AgentRow>, DatabaseError> {
        Self::list_live_agents(self).await
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<bool, DatabaseError> {
        Self::delete_agent(self, id).await
    }

    async fn claim_run(
        &self,
        id: &AgentId,
        run: i64,
        pid: u32,
        owner_pid: u32,
    ) -> Result<bool, DatabaseError> {
        Self::claim_run(self, id, run, pid, owner_pid).await
    }

    async fn clear_agent_pid(&self, id: &AgentId, pid: u32) -> Result<bool, DatabaseError> {
        Self::clear_agent_pid(self, id, pid).await
    }

    async fn release_run(&self, id: &AgentId, run: i64) -> Result<bool, DatabaseError> {
        Self::release_run(self, id, run).await
    }

    async fn set_session_token(&self, id: &AgentId, token: &str) -> Result<(), DatabaseError> {
        Self::set_session_token(self, id, token).await
    }

    async fn transition_status(
        &self,
        id: &AgentId,
        from: &[AgentStatus],
        to: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        Self::transition_status(self, id, from, to).await
    }

    async fn resume_agent(&self, id: &AgentId) -> Result<bool, DatabaseError> {
        Self::resume_agent(self, id).await
    }

    async fn set_agent_archived(&self, id: &AgentId, archived: bool) -> Result<bool, DatabaseError> {
        Self::set_agent_archived(self, id, archived).await
    }

    async fn append_log_entry(&self, entry: &NewLogEntry) -> Result<i64, DatabaseError> {
        Self::append_log_entry(self, entry).await
    }

    async fn list_log_entries_since(
        &self,
        agent: &AgentId,
        since_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        Self::list_log_entries_since(self, agent, since_id, limit).await
    }

    async fn append_message(&self, message: &NewMessage) -> Result<i64, DatabaseError> {
        Self::append_message(self, message).await
    }

    async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, DatabaseError> {
        Self::list_messages(self, filter).await
    }

    async fn finalize_if_busy(
        &self,
        id: &AgentId,
        run: i64,
        outcome: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        Self::finalize_if_busy(self, id, run, outcome).await
    }

    async fn fail_dead_run(&self, id: &AgentId, run: i64, pid: u32) -> Result<bool, DatabaseError> {
        Self::fail_dead_run(self, id, run, pid).await
    }
}
