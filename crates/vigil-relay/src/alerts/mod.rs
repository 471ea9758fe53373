//! Repeating life-or-death alert loop.
//!
//! One unacknowledged alert per user at most. Each alert drives an
//! in-memory interval that re-sends a critical push (web consumers only)
//! until acknowledged or the notification cap is reached. Every tick
//! reloads persisted state, so missed ticks never stack and a tick racing
//! an acknowledgement exits cleanly.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vigil_core::db::unix_timestamp;

use crate::push::{CriticalAlert, DeviceFilter, PushFanout};
use crate::storage::{ActiveAlert, Database};

/// Alerts unacknowledged for longer than this at boot are stale.
const RESTORE_MAX_AGE_SECS: i64 = 10 * 60;

/// Errors surfaced to the acknowledgement endpoint.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert not found")]
    NotFound,

    #[error("Alert already acknowledged")]
    AlreadyAcknowledged,

    #[error("Database error: {0}")]
    Database(#[from] crate::storage::DatabaseError),
}

/// Per-user repeating-alert state with crash restoration.
pub struct AlertLoop {
    db: Database,
    push: Arc<PushFanout>,
    interval: Duration,
    max_notifications: i64,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl AlertLoop {
    pub fn new(
        db: Database,
        push: Arc<PushFanout>,
        interval: Duration,
        max_notifications: i64,
    ) -> Self {
        Self {
            db,
            push,
            interval,
            max_notifications,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a repeating alert for a user whose session timed out.
    ///
    /// Confirms life-or-death mode is still enabled; if an unacknowledged
    /// alert already exists for the user it is returned unchanged. The
    /// record starts at `notifications_sent = 1` because the timeout path
    /// already delivered the first alert.
    pub async fn start(
        self: &Arc<Self>,
        user_id: &str,
        session_id: &str,
        reason: &str,
        game_name: &str,
    ) -> Result<Option<ActiveAlert>, AlertError> {
        let user = self
            .db
            .get_user(user_id)
            .await
            .map_err(|_| AlertError::NotFound)?;
        if user.life_or_death == 0 {
            return Ok(None);
        }

        if let Some(existing) = self.db.unacknowledged_alert_for_user(user_id).await? {
            return Ok(Some(existing));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let alert = self
            .db
            .create_active_alert(&id, user_id, session_id, reason, game_name, self.max_notifications)
            .await?;

        info!(alert_id = %id, user_id = %user_id, "Life-or-death alert loop started");
        self.install_interval(id).await;

        Ok(Some(alert))
    }

    /// Acknowledge an alert and cancel its interval.
    pub async fn acknowledge(&self, alert_id: &str, user_id: &str) -> Result<ActiveAlert, AlertError> {
        let alert = self
            .db
            .get_active_alert(alert_id)
            .await?
            .ok_or(AlertError::NotFound)?;

        if alert.user_id != user_id {
            return Err(AlertError::NotFound);
        }
        if alert.is_acknowledged() {
            return Err(AlertError::AlreadyAcknowledged);
        }

        if !self.db.acknowledge_alert(alert_id, user_id).await? {
            return Err(AlertError::AlreadyAcknowledged);
        }

        self.cancel(alert_id).await;
        info!(alert_id = %alert_id, user_id = %user_id, "Alert acknowledged");

        self.db
            .get_active_alert(alert_id)
            .await?
            .ok_or(AlertError::NotFound)
    }

    /// Restore alert loops after a restart: reinstall intervals for fresh
    /// unacknowledged alerts, auto-acknowledge stale ones.
    pub async fn restore(self: &Arc<Self>) -> Result<usize, AlertError> {
        let cutoff = unix_timestamp() - RESTORE_MAX_AGE_SECS;

        let expired = self.db.expire_stale_alerts(cutoff).await?;
        if expired > 0 {
            info!(expired, "Auto-acknowledged stale alerts on restore");
        }

        let fresh = self.db.unacknowledged_alerts_since(cutoff).await?;
        let restored = fresh.len();
        for alert in fresh {
            info!(alert_id = %alert.id, user_id = %alert.user_id, "Restoring alert loop");
            self.install_interval(alert.id).await;
        }

        Ok(restored)
    }

    /// Cancel every interval. Called on shutdown.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Number of live intervals (diagnostics and tests).
    pub async fn live_loops(&self) -> usize {
        self.timers.lock().await.len()
    }

    async fn cancel(&self, alert_id: &str) {
        if let Some(handle) = self.timers.lock().await.remove(alert_id) {
            handle.abort();
        }
    }

    async fn install_interval(self: &Arc<Self>, alert_id: String) {
        let alert_loop = Arc::clone(self);
        let id = alert_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(alert_loop.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first delivery already happened

            loop {
                ticker.tick().await;
                if alert_loop.tick(&id).await.is_break() {
                    break;
                }
            }

            alert_loop.timers.lock().await.remove(&id);
        });

        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.insert(alert_id, handle) {
            old.abort();
        }
    }

    /// One interval tick: reload, bail out if no longer applicable, else
    /// deliver the next numbered notification to the user's web devices.
    async fn tick(&self, alert_id: &str) -> ControlFlow<()> {
        let alert = match self.db.get_active_alert(alert_id).await {
            Ok(Some(alert)) => alert,
            Ok(None) => return ControlFlow::Break(()),
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "Alert reload failed, retrying next tick");
                return ControlFlow::Continue(());
            }
        };

        if alert.is_acknowledged() || alert.notifications_sent >= alert.max_notifications {
            return ControlFlow::Break(());
        }

        let number = match self.db.increment_alert_notifications(alert_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(alert_id = %alert_id, error = %e, "Failed to advance alert counter");
                return ControlFlow::Continue(());
            }
        };

        let alert_sound = match self.db.get_user(&alert.user_id).await {
            Ok(user) => user.alert_sound,
            Err(_) => "default".to_string(),
        };

        let payload = CriticalAlert {
            session_id: alert.session_id.clone(),
            game_name: alert.game_name.clone(),
            hub_name: String::new(),
            reason: format!(
                "🚨 ALERT {number}/{max}: {reason}",
                max = alert.max_notifications,
                reason = alert.reason
            ),
            last_status: String::new(),
            alert_sound,
        };

        // Mobile platforms run their own native alarm off the first
        // delivery; repeats target web consumers only.
        if let Err(e) = self
            .push
            .send_critical(&alert.user_id, &payload, DeviceFilter::WebOnly)
            .await
        {
            warn!(alert_id = %alert_id, error = %e, "Repeat alert push failed");
        }

        ControlFlow::Continue(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_loop(interval_ms: u64) -> (Database, Arc<AlertLoop>) {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db.update_alert_preferences("u1", "siren", false, None, None, true)
            .await
            .unwrap();

        let push = Arc::new(PushFanout::new(db.clone(), None, 3));
        let alerts = Arc::new(AlertLoop::new(
            db.clone(),
            push,
            Duration::from_millis(interval_ms),
            30,
        ));
        (db, alerts)
    }

    #[tokio::test]
    async fn start_creates_alert_and_interval() {
        let (_db, alerts) = test_loop(10_000).await;

        let alert = alerts.start("u1", "s1", "Heartbeat timeout", "G").await.unwrap();
        let alert = alert.unwrap();
        assert_eq!(alert.notifications_sent, 1);
        assert_eq!(alerts.live_loops().await, 1);
    }

    #[tokio::test]
    async fn at_most_one_unacknowledged_per_user() {
        let (_db, alerts) = test_loop(10_000).await;

        let first = alerts.start("u1", "s1", "r", "G").await.unwrap().unwrap();
        let second = alerts.start("u1", "s2", "other", "G2").await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(alerts.live_loops().await, 1);
    }

    #[tokio::test]
    async fn disabled_life_or_death_skips() {
        let (db, alerts) = test_loop(10_000).await;
        db.update_alert_preferences("u1", "siren", false, None, None, false)
            .await
            .unwrap();

        let alert = alerts.start("u1", "s1", "r", "G").await.unwrap();
        assert!(alert.is_none());
        assert_eq!(alerts.live_loops().await, 0);
    }

    #[tokio::test]
    async fn ticks_advance_counter_until_acknowledged() {
        let (db, alerts) = test_loop(20).await;

        let alert = alerts.start("u1", "s1", "r", "G").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(90)).await;

        let reloaded = db.get_active_alert(&alert.id).await.unwrap().unwrap();
        assert!(reloaded.notifications_sent > 1, "counter should advance");

        alerts.acknowledge(&alert.id, "u1").await.unwrap();
        let frozen = db.get_active_alert(&alert.id).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let after = db.get_active_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(after.notifications_sent, frozen.notifications_sent);
        assert_eq!(alerts.live_loops().await, 0);
    }

    #[tokio::test]
    async fn cap_stops_the_loop() {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db.update_alert_preferences("u1", "siren", false, None, None, true)
            .await
            .unwrap();
        let push = Arc::new(PushFanout::new(db.clone(), None, 3));
        let alerts = Arc::new(AlertLoop::new(
            db.clone(),
            push,
            Duration::from_millis(15),
            3,
        ));

        let alert = alerts.start("u1", "s1", "r", "G").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let reloaded = db.get_active_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(reloaded.notifications_sent, 3);
        assert_eq!(alerts.live_loops().await, 0);
    }

    #[tokio::test]
    async fn acknowledge_errors() {
        let (_db, alerts) = test_loop(10_000).await;
        let alert = alerts.start("u1", "s1", "r", "G").await.unwrap().unwrap();

        assert!(matches!(
            alerts.acknowledge("missing", "u1").await.unwrap_err(),
            AlertError::NotFound
        ));
        assert!(matches!(
            alerts.acknowledge(&alert.id, "intruder").await.unwrap_err(),
            AlertError::NotFound
        ));

        alerts.acknowledge(&alert.id, "u1").await.unwrap();
        assert!(matches!(
            alerts.acknowledge(&alert.id, "u1").await.unwrap_err(),
            AlertError::AlreadyAcknowledged
        ));
    }

    #[tokio::test]
    async fn restore_reinstalls_fresh_and_expires_stale() {
        let (db, alerts) = test_loop(10_000).await;

        // Fresh unacknowledged alert
        db.create_active_alert("fresh", "u1", "s1", "r", "G", 30).await.unwrap();
        // Stale one, backdated past the restore cutoff
        db.create_active_alert("stale", "u1", "s2", "r", "G", 30).await.unwrap();
        sqlx::query("UPDATE active_alerts SET started_at = started_at - 3600 WHERE id = 'stale'")
            .execute(db.pool())
            .await
            .unwrap();

        let restored = alerts.restore().await.unwrap();
        assert_eq!(restored, 1);
        assert_eq!(alerts.live_loops().await, 1);

        let stale = db.get_active_alert("stale").await.unwrap().unwrap();
        assert!(stale.is_acknowledged());
        let fresh = db.get_active_alert("fresh").await.unwrap().unwrap();
        assert!(!fresh.is_acknowledged());
    }
}
