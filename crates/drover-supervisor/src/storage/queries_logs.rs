//! Transcript and message queries.
//!
//! Both tables are append-only and paginated by a `(created_at, id)` cursor:
//! `created_at` has one-second resolution, so `id` (the insertion sequence)
//! breaks ties between entries written in the same second.

use drover_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::{AgentId, LogEntry, Message, MessageFilter, NewLogEntry, NewMessage};

impl Database {
    // =========================================================================
    // Log entry queries
    // =========================================================================

    /// Append a transcript entry. Returns its id.
    pub async fn append_log_entry(&self, entry: &NewLogEntry) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            r"
            INSERT INTO log_entries (scope, agent, event_type, command, content, exit_code, raw,
                                     created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&entry.scope)
        .bind(&entry.agent)
        .bind(&entry.event_type)
        .bind(&entry.command)
        .bind(&entry.content)
        .bind(entry.exit_code)
        .bind(&entry.raw)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List an agent's transcript entries after the entry `since_id`, in
    /// `(created_at, id)` order. `None` starts from the beginning and a
    /// `limit` of 0 means no limit.
    pub async fn list_log_entries_since(
        &self,
        agent: &AgentId,
        since_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let limit = if limit == 0 { u32::MAX } else { limit };
        let cursor = match since_id {
            Some(id) => Some(self.log_cursor(id).await?),
            None => None,
        };

        let rows = match cursor {
            None => {
                sqlx::query_as::<_, LogEntry>(
                    r"
                    SELECT * FROM log_entries
                    WHERE scope = ? AND agent = ?
                    ORDER BY created_at, id
                    LIMIT ?
                    ",
                )
                .bind(&agent.scope)
                .bind(&agent.name)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            Some((created_at, id)) => {
                sqlx::query_as::<_, LogEntry>(
                    r"
                    SELECT * FROM log_entries
                    WHERE scope = ? AND agent = ? AND (created_at, id) > (?, ?)
                    ORDER BY created_at, id
                    LIMIT ?
                    ",
                )
                .bind(&agent.scope)
                .bind(&agent.name)
                .bind(created_at)
                .bind(id)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(rows)
    }

    /// Resolve a cursor id to its `(created_at, id)` position. An unknown id
    /// sorts before every entry.
    async fn log_cursor(&self, id: i64) -> Result<(i64, i64), DatabaseError> {
        let created_at: Option<i64> =
            sqlx::query_scalar("SELECT created_at FROM log_entries WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok((created_at.unwrap_or(i64::MIN), id))
    }

    // =========================================================================
    // Message queries
    // =========================================================================

    /// Append a message. Returns its id.
    pub async fn append_message(&self, message: &NewMessage) -> Result<i64, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            r"
            INSERT INTO messages (scope, from_agent, to_agent, kind, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&message.scope)
        .bind(&message.from_agent)
        .bind(&message.to_agent)
        .bind(&message.kind)
        .bind(&message.body)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List messages in a scope matching `filter`, oldest first.
    pub async fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>, DatabaseError> {
        let (cursor_at, cursor_id) = match filter.since_id {
            Some(id) => {
                let created_at: Option<i64> =
                    sqlx::query_scalar("SELECT created_at FROM messages WHERE id = ?")
                        .bind(id)
                        .fetch_optional(self.pool())
                        .await?;
                (created_at.unwrap_or(i64::MIN), id)
            }
            None => (i64::MIN, i64::MIN),
        };
        let limit = if filter.limit == 0 { u32::MAX } else { filter.limit };

        let rows = sqlx::query_as::<_, Message>(
            r"
            SELECT * FROM messages
            WHERE scope = ?
              AND (? IS NULL OR from_agent = ?)
              AND (? IS NULL OR to_agent = ?)
              AND (? IS NULL OR kind = ?)
              AND (created_at, id) > (?, ?)
            ORDER BY created_at, id
            LIMIT ?
            ",
        )
        .bind(&filter.scope)
        .bind(&filter.from_agent)
        .bind(&filter.from_agent)
        .bind(&filter.to_agent)
        .bind(&filter.to_agent)
        .bind(&filter.kind)
        .bind(&filter.kind)
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
