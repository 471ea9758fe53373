//! Session log queries.

use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::{LogLevel, SessionLog};
use super::DatabaseError;

/// Messages longer than this are truncated at the sink.
pub const MAX_LOG_MESSAGE_CHARS: usize = 2000;

impl Database {
    /// Persist one session log line. Messages are truncated to
    /// [`MAX_LOG_MESSAGE_CHARS`].
    pub async fn insert_session_log(
        &self,
        session_id: &str,
        user_id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<(), DatabaseError> {
        let message: String = message.chars().take(MAX_LOG_MESSAGE_CHARS).collect();

        sqlx::query(
            "INSERT INTO session_logs (session_id, user_id, level, message, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(level.as_str())
        .bind(message)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Most recent log lines for a session, newest first.
    pub async fn logs_for_session(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<SessionLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, SessionLog>(
            "SELECT * FROM session_logs WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    /// Delete log lines created before `cutoff`. Returns the number removed.
    pub async fn prune_logs_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM session_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db
    }

    #[tokio::test]
    async fn insert_and_list() {
        let db = test_db().await;
        db.insert_session_log("s1", "u1", LogLevel::Info, "started")
            .await
            .unwrap();
        db.insert_session_log("s1", "u1", LogLevel::Error, "boom")
            .await
            .unwrap();

        let logs = db.logs_for_session("s1", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "boom");
        assert_eq!(logs[0].level, "error");
    }

    #[tokio::test]
    async fn long_messages_truncated() {
        let db = test_db().await;
        let long = "x".repeat(MAX_LOG_MESSAGE_CHARS + 500);
        db.insert_session_log("s1", "u1", LogLevel::Info, &long)
            .await
            .unwrap();

        let logs = db.logs_for_session("s1", 1).await.unwrap();
        assert_eq!(logs[0].message.chars().count(), MAX_LOG_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn prune_by_age() {
        let db = test_db().await;
        db.insert_session_log("s1", "u1", LogLevel::Info, "old").await.unwrap();

        let removed = db.prune_logs_before(unix_timestamp() + 10).await.unwrap();
        assert_eq!(removed, 1);
        assert!(db.logs_for_session("s1", 10).await.unwrap().is_empty());
    }
}
