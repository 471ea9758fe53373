//! Active-alert (life-or-death) queries.
//!
//! At most one unacknowledged alert exists per user; the partial-uniqueness
//! is enforced at the gateway by `unacknowledged_alert_for_user` before
//! insert, and re-checked by the alert loop on every tick.

use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::ActiveAlert;
use super::DatabaseError;

impl Database {
    /// Persist a new repeating-alert record with `notifications_sent = 1`
    /// (the first alert is delivered by the timeout path before the loop
    /// is installed).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_active_alert(
        &self,
        id: &str,
        user_id: &str,
        session_id: &str,
        reason: &str,
        game_name: &str,
        max_notifications: i64,
    ) -> Result<ActiveAlert, DatabaseError> {
        sqlx::query(
            "INSERT INTO active_alerts (id, user_id, session_id, reason, game_name, \
             started_at, max_notifications) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(session_id)
        .bind(reason)
        .bind(game_name)
        .bind(unix_timestamp())
        .bind(max_notifications)
        .execute(self.pool())
        .await?;

        self.get_active_alert(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("ActiveAlert {id}")))
    }

    /// Get an alert by id.
    pub async fn get_active_alert(&self, id: &str) -> Result<Option<ActiveAlert>, DatabaseError> {
        let alert = sqlx::query_as::<_, ActiveAlert>("SELECT * FROM active_alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(alert)
    }

    /// The user's unacknowledged alert, if one is in flight.
    pub async fn unacknowledged_alert_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ActiveAlert>, DatabaseError> {
        let alert = sqlx::query_as::<_, ActiveAlert>(
            "SELECT * FROM active_alerts WHERE user_id = ? AND acknowledged = 0 \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(alert)
    }

    /// Increment the persisted notification counter and return the new
    /// value.
    pub async fn increment_alert_notifications(&self, id: &str) -> Result<i64, DatabaseError> {
        sqlx::query("UPDATE active_alerts SET notifications_sent = notifications_sent + 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        let sent: i64 =
            sqlx::query_scalar("SELECT notifications_sent FROM active_alerts WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| DatabaseError::NotFound(format!("ActiveAlert {id}")))?;

        Ok(sent)
    }

    /// Mark an alert acknowledged. Returns `false` when the alert was
    /// already acknowledged (or missing).
    pub async fn acknowledge_alert(&self, id: &str, user_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE active_alerts SET acknowledged = 1, acknowledged_at = ? \
             WHERE id = ? AND user_id = ? AND acknowledged = 0",
        )
        .bind(unix_timestamp())
        .bind(id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All unacknowledged alerts started at or after `cutoff`, for crash
    /// restoration.
    pub async fn unacknowledged_alerts_since(
        &self,
        cutoff: i64,
    ) -> Result<Vec<ActiveAlert>, DatabaseError> {
        let alerts = sqlx::query_as::<_, ActiveAlert>(
            "SELECT * FROM active_alerts WHERE acknowledged = 0 AND started_at >= ?",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(alerts)
    }

    /// Auto-acknowledge unacknowledged alerts older than `cutoff` (stale
    /// after a restart). Returns the number expired.
    pub async fn expire_stale_alerts(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE active_alerts SET acknowledged = 1, acknowledged_at = ? \
             WHERE acknowledged = 0 AND started_at < ?",
        )
        .bind(unix_timestamp())
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete acknowledged alerts older than `cutoff` (history retention).
    pub async fn prune_acknowledged_alerts_before(
        &self,
        cutoff: i64,
    ) -> Result<u64, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM active_alerts WHERE acknowledged = 1 AND acknowledged_at < ?")
                .bind(cutoff)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected())
    }
}
