//! Session queries.
//!
//! Sessions are addressed two ways: by the canonical session id and by the
//! per-socket ephemeral client id (`ws_client_id`, unique among live
//! sockets). Transitions out of `active` are one-way and guarded with
//! `AND status = 'active'` so racing writers cannot resurrect a session.

use sqlx::FromRow;
use vigil_core::db::unix_timestamp;

use super::db::Database;
use super::models::{DisconnectReason, Session, SessionContext, SessionStatus};
use super::DatabaseError;

/// Parameters for creating (or reactivating) a session.
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub hub_id: &'a str,
    pub ws_client_id: &'a str,
    pub game_name: &'a str,
    pub place_id: i64,
    pub job_id: &'a str,
    pub executor: Option<&'a str>,
}

/// Slim session row used in consumer-facing listings.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListing {
    #[serde(rename = "sessionId")]
    pub id: String,
    pub game_name: String,
    pub hub_name: String,
    pub current_status: String,
    pub connected_at: i64,
    pub last_heartbeat_at: i64,
}

impl Database {
    /// Create a session, or reactivate the one bound to the same ephemeral
    /// client id. Reactivation overwrites user/hub/game metadata, returns
    /// the state to `active`, and clears prior disconnect and alert fields.
    pub async fn create_session(&self, params: &NewSession<'_>) -> Result<Session, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO sessions (id, user_id, hub_id, ws_client_id, game_name, place_id, \
             job_id, executor, connected_at, last_heartbeat_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(ws_client_id) DO UPDATE SET user_id = excluded.user_id, \
             hub_id = excluded.hub_id, game_name = excluded.game_name, \
             place_id = excluded.place_id, job_id = excluded.job_id, \
             executor = excluded.executor, status = 'active', current_status = '', \
             connected_at = excluded.connected_at, last_heartbeat_at = excluded.last_heartbeat_at, \
             disconnected_at = NULL, disconnect_reason = NULL, disconnect_message = NULL, \
             alert_sent = 0, alert_delivered = NULL, alert_error = NULL",
        )
        .bind(params.id)
        .bind(params.user_id)
        .bind(params.hub_id)
        .bind(params.ws_client_id)
        .bind(params.game_name)
        .bind(params.place_id)
        .bind(params.job_id)
        .bind(params.executor)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_session_by_client_id(params.ws_client_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session for client {}", params.ws_client_id)))
    }

    /// Get a session by its canonical id.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(session)
    }

    /// Get a session by its ephemeral client id.
    pub async fn get_session_by_client_id(
        &self,
        ws_client_id: &str,
    ) -> Result<Option<Session>, DatabaseError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE ws_client_id = ?")
            .bind(ws_client_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(session)
    }

    /// Load a session joined with the owner's alert preferences and hub
    /// name. Used on the timeout path.
    pub async fn get_session_context(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionContext>, DatabaseError> {
        let ctx = sqlx::query_as::<_, SessionContext>(
            "SELECT s.id, s.user_id, s.hub_id, s.ws_client_id, s.game_name, s.current_status, \
             s.status, u.username, h.name AS hub_name, u.alert_sound, u.quiet_hours_enabled, \
             u.quiet_hours_start, u.quiet_hours_end, u.life_or_death \
             FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             JOIN hubs h ON h.id = s.hub_id \
             WHERE s.id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(ctx)
    }

    /// Set `last_heartbeat_at = now` for the session bound to a client id.
    /// Unknown client ids are a no-op (the watchdog may race the router).
    pub async fn touch_session_heartbeat(&self, ws_client_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sessions SET last_heartbeat_at = ? WHERE ws_client_id = ? AND status = 'active'",
        )
        .bind(unix_timestamp())
        .bind(ws_client_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Update the free-form status text of an active session.
    pub async fn update_session_status_text(
        &self,
        ws_client_id: &str,
        status_text: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sessions SET current_status = ? WHERE ws_client_id = ? AND status = 'active'",
        )
        .bind(status_text)
        .bind(ws_client_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Transition an active session out of `active`, addressed by client
    /// id. Returns the affected session, or `None` if there was nothing
    /// active to transition.
    pub async fn disconnect_session_by_client_id(
        &self,
        ws_client_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<Option<Session>, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, disconnected_at = ?, disconnect_reason = ?, \
             disconnect_message = ? WHERE ws_client_id = ? AND status = 'active'",
        )
        .bind(SessionStatus::Disconnected.as_str())
        .bind(unix_timestamp())
        .bind(reason.as_str())
        .bind(message)
        .bind(ws_client_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_session_by_client_id(ws_client_id).await
    }

    /// Transition an active session out of `active`, addressed by the
    /// canonical session id.
    pub async fn disconnect_session_by_id(
        &self,
        session_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<Option<Session>, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, disconnected_at = ?, disconnect_reason = ?, \
             disconnect_message = ? WHERE id = ? AND status = 'active'",
        )
        .bind(SessionStatus::Disconnected.as_str())
        .bind(unix_timestamp())
        .bind(reason.as_str())
        .bind(message)
        .bind(session_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_session(session_id).await
    }

    /// Disconnect every active session of a user in one statement. Used on
    /// token regeneration and hub suspension. Returns the number affected.
    pub async fn disconnect_all_sessions_for_user(
        &self,
        user_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, disconnected_at = ?, disconnect_reason = ?, \
             disconnect_message = ? WHERE user_id = ? AND status = 'active'",
        )
        .bind(SessionStatus::Disconnected.as_str())
        .bind(unix_timestamp())
        .bind(reason.as_str())
        .bind(message)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Transition an active session to `timeout`, recording the alert
    /// outcome. Idempotent against non-active sessions.
    pub async fn mark_session_timeout(
        &self,
        session_id: &str,
        message: &str,
        alert_sent: bool,
        alert_delivered: Option<bool>,
        alert_error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE sessions SET status = ?, disconnected_at = ?, disconnect_reason = ?, \
             disconnect_message = ?, alert_sent = ?, alert_delivered = ?, alert_error = ? \
             WHERE id = ? AND status = 'active'",
        )
        .bind(SessionStatus::Timeout.as_str())
        .bind(unix_timestamp())
        .bind(DisconnectReason::Timeout.as_str())
        .bind(message)
        .bind(i64::from(alert_sent))
        .bind(alert_delivered.map(i64::from))
        .bind(alert_error)
        .bind(session_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Live sessions for a user with hub names, for consumer listings.
    pub async fn active_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<SessionListing>, DatabaseError> {
        let sessions = sqlx::query_as::<_, SessionListing>(
            "SELECT s.id, s.game_name, h.name AS hub_name, s.current_status, s.connected_at, \
             s.last_heartbeat_at FROM sessions s JOIN hubs h ON h.id = s.hub_id \
             WHERE s.user_id = ? AND s.status = 'active' ORDER BY s.connected_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Whether the user has an active session other than `exclude_id` that
    /// connected at or after `since`. Used by the reconnect grace check.
    pub async fn has_newer_active_session(
        &self,
        user_id: &str,
        exclude_id: &str,
        since: i64,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ? AND id != ? AND status = 'active' \
             AND connected_at >= ?",
        )
        .bind(user_id)
        .bind(exclude_id)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Mark every `active` session as disconnected after a restart. Runs
    /// before the router accepts connections.
    pub async fn reconcile_orphaned_sessions(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, disconnected_at = ?, disconnect_reason = ?, \
             disconnect_message = 'Server restarted' WHERE status = 'active'",
        )
        .bind(SessionStatus::Disconnected.as_str())
        .bind(unix_timestamp())
        .bind(DisconnectReason::ServerShutdown.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
