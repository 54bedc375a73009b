//! Conversation session persistence (SQLite).
//!
//! Maps a thread identity to the reasoning agent's session token so later
//! replies in the same thread resume the same agent context. Writes are
//! awaited before returning — a crash after a successful call never loses
//! the session pointer.

use crate::error::Result;
use sqlx::{Row as _, SqlitePool};

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Save or update a session mapping. Upsert keyed by thread identity:
    /// an existing row only has its session token and update timestamp
    /// overwritten.
    pub async fn save(
        &self,
        thread_id: &str,
        session_id: &str,
        channel: &str,
        target: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (thread_id, agent_session_id, channel, target) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(thread_id) DO UPDATE SET \
                 agent_session_id = excluded.agent_session_id, \
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(thread_id)
        .bind(session_id)
        .bind(channel)
        .bind(target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the agent session token for a thread.
    pub async fn get(&self, thread_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT agent_session_id FROM sessions WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("agent_session_id")).transpose()?)
    }

    /// Get the channel a thread's session was created in.
    pub async fn get_channel(&self, thread_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT channel FROM sessions WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("channel")).transpose()?)
    }

    /// Delete a single session mapping.
    pub async fn delete(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Purge sessions whose last update is strictly older than `days` days.
    /// Returns the number of rows deleted.
    pub async fn delete_older_than(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE datetime(updated_at) < datetime('now', ?)",
        )
        .bind(format!("-{days} days"))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Total number of tracked sessions.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }
}
