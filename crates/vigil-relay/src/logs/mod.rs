//! Session log sink.
//!
//! Producer log lines go two places: durably into `session_logs` (bounded
//! by the retention sweeper) and into a short in-memory per-user ring that
//! consumer UIs read on attach.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use vigil_core::db::unix_timestamp;

use crate::storage::{Database, DatabaseError, LogLevel, SessionLog};

/// Cap of the in-memory per-user ring.
pub const USER_RING_CAP: usize = 200;

/// One in-memory log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub session_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: i64,
}

/// Bounded per-session log stream persisted durably plus a short per-user
/// ring.
pub struct LogSink {
    db: Database,
    rings: Mutex<HashMap<String, VecDeque<LogEntry>>>,
}

impl LogSink {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Record one log line durably and in the user's ring.
    pub async fn record(
        &self,
        session_id: &str,
        user_id: &str,
        level: LogLevel,
        message: &str,
    ) -> Result<(), DatabaseError> {
        self.db
            .insert_session_log(session_id, user_id, level, message)
            .await?;

        let entry = LogEntry {
            session_id: session_id.to_string(),
            level,
            message: message.chars().take(crate::storage::MAX_LOG_MESSAGE_CHARS).collect(),
            timestamp: unix_timestamp(),
        };

        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        let ring = rings.entry(user_id.to_string()).or_default();
        if ring.len() >= USER_RING_CAP {
            ring.pop_front();
        }
        ring.push_back(entry);

        Ok(())
    }

    /// Snapshot of the user's ring, oldest first.
    pub fn recent_for_user(&self, user_id: &str) -> Vec<LogEntry> {
        let rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        rings
            .get(user_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Durable log lines for one session, newest first.
    pub async fn session_history(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<SessionLog>, DatabaseError> {
        self.db.logs_for_session(session_id, limit).await
    }

    /// Drop persisted lines older than the cutoff.
    pub async fn prune_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        self.db.prune_logs_before(cutoff).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_sink() -> LogSink {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        LogSink::new(db)
    }

    #[tokio::test]
    async fn record_hits_store_and_ring() {
        let sink = test_sink().await;
        sink.record("s1", "u1", LogLevel::Info, "hello").await.unwrap();

        let ring = sink.recent_for_user("u1");
        assert_eq!(ring.len(), 1);
        assert_eq!(ring[0].message, "hello");

        let persisted = sink.session_history("s1", 10).await.unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let sink = test_sink().await;
        for i in 0..(USER_RING_CAP + 25) {
            sink.record("s1", "u1", LogLevel::Info, &format!("line {i}"))
                .await
                .unwrap();
        }

        let ring = sink.recent_for_user("u1");
        assert_eq!(ring.len(), USER_RING_CAP);
        // Oldest entries were evicted
        assert_eq!(ring[0].message, "line 25");
    }

    #[tokio::test]
    async fn rings_are_per_user() {
        let sink = test_sink().await;
        sink.record("s1", "u1", LogLevel::Info, "mine").await.unwrap();
        assert!(sink.recent_for_user("someone-else").is_empty());
    }
}
