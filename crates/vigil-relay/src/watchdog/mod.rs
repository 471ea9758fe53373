//! Per-session heartbeat watchdog.
//!
//! One resettable countdown per active producer session, keyed by the
//! ephemeral client id. A fired timer hands the session to the state
//! machine's timeout path; an abrupt socket close goes through a grace
//! window first so a quick reconnect never fires an alert.
//!
//! Timers carry a generation number: a trigger that lost the race against
//! `reset`/`stop` finds a different generation in the map and backs off.
//! Duplicate fires are additionally harmless because the timeout path
//! checks the session's current state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vigil_core::db::unix_timestamp;

use crate::sessions::SessionManager;

struct TimerEntry {
    session_id: String,
    user_id: String,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Watchdog over all active producer sessions.
pub struct HeartbeatWatchdog {
    sessions: Arc<SessionManager>,
    timeout: Duration,
    grace: Duration,
    timers: Mutex<HashMap<String, TimerEntry>>,
    generation: std::sync::atomic::AtomicU64,
}

impl HeartbeatWatchdog {
    pub fn new(sessions: Arc<SessionManager>, timeout: Duration, grace: Duration) -> Self {
        Self {
            sessions,
            timeout,
            grace,
            timers: Mutex::new(HashMap::new()),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Start (or replace) the countdown for a client. Idempotent.
    pub async fn start(self: &Arc<Self>, client_id: &str, session_id: &str, user_id: &str) {
        let generation = self.next_generation();
        let handle = self.spawn_countdown(client_id.to_string(), generation);

        let entry = TimerEntry {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            generation,
            handle,
        };

        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.insert(client_id.to_string(), entry) {
            old.handle.abort();
        }
        debug!(client_id = %client_id, session_id = %session_id, "Watchdog started");
    }

    /// Heartbeat arrived: reschedule the countdown and touch the session's
    /// `last_heartbeat_at`.
    pub async fn reset(self: &Arc<Self>, client_id: &str) {
        let rescheduled = {
            let mut timers = self.timers.lock().await;
            match timers.get_mut(client_id) {
                Some(entry) => {
                    entry.handle.abort();
                    entry.generation = self.next_generation();
                    entry.handle = self.spawn_countdown(client_id.to_string(), entry.generation);
                    true
                }
                None => false,
            }
        };

        if rescheduled {
            self.sessions.update_heartbeat(client_id).await;
        }
    }

    /// Cancel and forget the countdown (clean disconnect).
    pub async fn stop(&self, client_id: &str) {
        if let Some(entry) = self.timers.lock().await.remove(client_id) {
            entry.handle.abort();
            debug!(client_id = %client_id, "Watchdog stopped");
        }
    }

    /// Called by the fired countdown itself.
    async fn trigger(&self, client_id: &str, generation: u64) {
        let entry = {
            let mut timers = self.timers.lock().await;
            match timers.get(client_id) {
                Some(entry) if entry.generation == generation => timers.remove(client_id),
                _ => None, // lost the race against reset/stop
            }
        };

        let Some(entry) = entry else { return };
        info!(
            client_id = %client_id,
            session_id = %entry.session_id,
            "Heartbeat timeout fired"
        );
        self.sessions.timeout(&entry.session_id).await;
    }

    /// Abrupt socket close: cancel the countdown and schedule the grace
    /// check with the last-known session identity.
    pub async fn grace_close(self: &Arc<Self>, client_id: &str) {
        let Some(entry) = self.timers.lock().await.remove(client_id) else {
            return;
        };
        entry.handle.abort();

        let watchdog = Arc::clone(self);
        let session_id = entry.session_id;
        let closed_at = unix_timestamp();
        debug!(client_id = %client_id, session_id = %session_id, "Socket lost, grace period started");

        tokio::spawn(async move {
            tokio::time::sleep(watchdog.grace).await;

            // A fresh timer covering the same session means the client came
            // back through the idempotent create path.
            if watchdog.has_timer_for_session(&session_id).await {
                return;
            }

            watchdog.sessions.grace_timeout(&session_id, closed_at).await;
        });
    }

    /// Whether any countdown currently covers the given session.
    pub async fn has_timer_for_session(&self, session_id: &str) -> bool {
        let timers = self.timers.lock().await;
        timers.values().any(|e| e.session_id == session_id)
    }

    /// Whether a countdown exists for the given client.
    pub async fn has_timer(&self, client_id: &str) -> bool {
        self.timers.lock().await.contains_key(client_id)
    }

    /// Number of live countdowns.
    pub async fn active_timers(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// User ids with live countdowns grouped by client (diagnostics).
    pub async fn watched_users(&self) -> Vec<String> {
        let timers = self.timers.lock().await;
        timers.values().map(|e| e.user_id.clone()).collect()
    }

    /// Cancel every countdown. Called on shutdown.
    pub async fn clear(&self) {
        let mut timers = self.timers.lock().await;
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn spawn_countdown(self: &Arc<Self>, client_id: String, generation: u64) -> JoinHandle<()> {
        let watchdog = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(watchdog.timeout).await;
            watchdog.trigger(&client_id, generation).await;
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::alerts::AlertLoop;
    use crate::logs::LogSink;
    use crate::push::PushFanout;
    use crate::storage::{Database, HubStatus, NewSession};

    async fn test_watchdog(timeout_ms: u64, grace_ms: u64) -> (Database, Arc<HeartbeatWatchdog>) {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db.create_hub("h1", "Hub", "hub", "o@example.com", "hub_live_a", "d", "hint01")
            .await
            .unwrap();
        db.set_hub_status("h1", HubStatus::Approved).await.unwrap();

        let push = Arc::new(PushFanout::new(db.clone(), None, 3));
        let alerts = Arc::new(AlertLoop::new(
            db.clone(),
            Arc::clone(&push),
            Duration::from_secs(10),
            30,
        ));
        let logs = Arc::new(LogSink::new(db.clone()));
        let sessions = Arc::new(SessionManager::new(db.clone(), push, alerts, logs));
        let watchdog = Arc::new(HeartbeatWatchdog::new(
            sessions,
            Duration::from_millis(timeout_ms),
            Duration::from_millis(grace_ms),
        ));
        (db, watchdog)
    }

    async fn seed_session(db: &Database, id: &str, client_id: &str) {
        db.create_session(&NewSession {
            id,
            user_id: "u1",
            hub_id: "h1",
            ws_client_id: client_id,
            game_name: "G",
            place_id: 1,
            job_id: "j",
            executor: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn silent_session_times_out() {
        let (db, watchdog) = test_watchdog(40, 20).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        tokio::time::sleep(Duration::from_millis(90)).await;

        let session = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, "timeout");
        // The fired timer removed itself
        assert_eq!(watchdog.active_timers().await, 0);
    }

    #[tokio::test]
    async fn reset_defers_the_countdown() {
        let (db, watchdog) = test_watchdog(60, 20).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        watchdog.reset("c1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // 80ms elapsed but never 60ms without a heartbeat
        let session = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, "active");
        assert!(watchdog.has_timer("c1").await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.status, "timeout");
    }

    #[tokio::test]
    async fn stop_cancels_cleanly() {
        let (db, watchdog) = test_watchdog(30, 20).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        watchdog.stop("c1").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(db.get_session("s1").await.unwrap().unwrap().status, "active");
        assert_eq!(watchdog.active_timers().await, 0);
    }

    #[tokio::test]
    async fn start_replaces_existing_timer() {
        let (db, watchdog) = test_watchdog(50, 20).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        watchdog.start("c1", "s1", "u1").await;
        assert_eq!(watchdog.active_timers().await, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(db.get_session("s1").await.unwrap().unwrap().status, "timeout");
    }

    #[tokio::test]
    async fn grace_close_without_reconnect_times_out() {
        let (db, watchdog) = test_watchdog(500, 30).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        watchdog.grace_close("c1").await;
        assert_eq!(watchdog.active_timers().await, 0);

        // Not yet: the grace window is still open
        assert_eq!(db.get_session("s1").await.unwrap().unwrap().status, "active");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(db.get_session("s1").await.unwrap().unwrap().status, "timeout");
    }

    #[tokio::test]
    async fn reconnect_within_grace_avoids_timeout() {
        let (db, watchdog) = test_watchdog(500, 60).await;
        seed_session(&db, "s1", "c1").await;

        watchdog.start("c1", "s1", "u1").await;
        watchdog.grace_close("c1").await;

        // Reconnect: fresh socket, fresh session, fresh timer
        seed_session(&db, "s2", "c2").await;
        watchdog.start("c2", "s2", "u1").await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        let old = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(old.status, "disconnected");
        assert_eq!(old.alert_sent, 0);
        assert_eq!(db.get_session("s2").await.unwrap().unwrap().status, "active");
        watchdog.clear().await;
    }

    #[tokio::test]
    async fn grace_close_without_timer_is_noop() {
        let (_db, watchdog) = test_watchdog(30, 10).await;
        watchdog.grace_close("unknown").await;
        assert_eq!(watchdog.active_timers().await, 0);
    }
}
