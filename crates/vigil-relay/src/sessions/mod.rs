//! Session state machine.
//!
//! States: `active` → `disconnected` | `timeout`, one-way. The timeout
//! path is where the dead-man's switch fires: quiet-hours suppression,
//! the error log record, critical push fan-out, and (for life-or-death
//! users) handing off to the alert loop.

pub mod quiet_hours;

use std::sync::Arc;

use tracing::{error, info, warn};

use vigil_core::db::unix_timestamp;

use crate::alerts::AlertLoop;
use crate::logs::LogSink;
use crate::push::{CriticalAlert, DeviceFilter, PushFanout};
use crate::storage::{
    Database, DatabaseError, DisconnectReason, LogLevel, NewSession, Session,
};

/// Disconnect message recorded when quiet hours suppress the alert.
const QUIET_HOURS_MESSAGE: &str = "Heartbeat timeout (quiet hours - no alert)";

/// Disconnect message recorded on an alerted timeout.
const TIMEOUT_MESSAGE: &str = "Heartbeat timeout";

/// What the timeout path did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Session was not active (or unknown); nothing happened.
    NoOp,
    /// Quiet hours suppressed delivery; the session still transitioned.
    QuietHours,
    /// Alert fan-out ran; `delivered` is the aggregate push outcome.
    AlertSent { delivered: bool },
}

/// What the grace-period check decided after an abrupt socket close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraceOutcome {
    /// Session already left `active` (clean disconnect raced us).
    NoOp,
    /// The producer reconnected with a fresh session; the orphaned one is
    /// closed without an alert.
    Reconnected,
    /// No reconnect: the timeout path ran.
    TimedOut(TimeoutOutcome),
}

/// Create, transition, and terminate sessions.
pub struct SessionManager {
    db: Database,
    push: Arc<PushFanout>,
    alerts: Arc<AlertLoop>,
    logs: Arc<LogSink>,
}

impl SessionManager {
    pub fn new(
        db: Database,
        push: Arc<PushFanout>,
        alerts: Arc<AlertLoop>,
        logs: Arc<LogSink>,
    ) -> Self {
        Self {
            db,
            push,
            alerts,
            logs,
        }
    }

    /// Create a session (or reactivate the one with the same ephemeral
    /// client id, defined for idempotency).
    pub async fn create_session(&self, params: &NewSession<'_>) -> Result<Session, DatabaseError> {
        let session = self.db.create_session(params).await?;
        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            game = %session.game_name,
            "Session started"
        );
        Ok(session)
    }

    /// Touch `last_heartbeat_at`. Unknown client ids are a no-op; store
    /// errors are logged and swallowed so the watchdog path stays alive.
    pub async fn update_heartbeat(&self, ws_client_id: &str) {
        if let Err(e) = self.db.touch_session_heartbeat(ws_client_id).await {
            warn!(client_id = %ws_client_id, error = %e, "Heartbeat persist failed");
        }
    }

    /// Update the session's free-form status text.
    pub async fn update_status(&self, ws_client_id: &str, status_text: &str) {
        if let Err(e) = self.db.update_session_status_text(ws_client_id, status_text).await {
            warn!(client_id = %ws_client_id, error = %e, "Status persist failed");
        }
    }

    /// Clean disconnect addressed by ephemeral client id.
    pub async fn disconnect_by_client_id(
        &self,
        ws_client_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<Option<Session>, DatabaseError> {
        let session = self
            .db
            .disconnect_session_by_client_id(ws_client_id, reason, message)
            .await?;
        if let Some(s) = &session {
            info!(session_id = %s.id, reason = reason.as_str(), "Session disconnected");
        }
        Ok(session)
    }

    /// Disconnect addressed by canonical session id (consumer-initiated
    /// stops).
    pub async fn disconnect_by_session_id(
        &self,
        session_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<Option<Session>, DatabaseError> {
        let session = self
            .db
            .disconnect_session_by_id(session_id, reason, message)
            .await?;
        if let Some(s) = &session {
            info!(session_id = %s.id, reason = reason.as_str(), "Session disconnected");
        }
        Ok(session)
    }

    /// Disconnect every active session of a user (token regeneration, hub
    /// suspension).
    pub async fn disconnect_all_for_user(
        &self,
        user_id: &str,
        reason: DisconnectReason,
        message: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let affected = self
            .db
            .disconnect_all_sessions_for_user(user_id, reason, message)
            .await?;
        if affected > 0 {
            info!(user_id = %user_id, affected, reason = reason.as_str(), "Disconnected all user sessions");
        }
        Ok(affected)
    }

    /// The timeout path, addressed by session id. Idempotent: a session no
    /// longer `active` makes this a no-op.
    pub async fn timeout(&self, session_id: &str) -> TimeoutOutcome {
        let ctx = match self.db.get_session_context(session_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return TimeoutOutcome::NoOp,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Timeout path could not load session");
                return TimeoutOutcome::NoOp;
            }
        };
        if ctx.status != "active" {
            return TimeoutOutcome::NoOp;
        }

        let prefs = ctx.preferences();
        let now = unix_timestamp();

        // Quiet hours suppress delivery, never the transition or the log
        // record of the transition itself.
        if prefs.quiet_hours_enabled
            && quiet_hours::suppresses_alert(
                prefs.quiet_hours_start.as_deref(),
                prefs.quiet_hours_end.as_deref(),
                now,
            )
        {
            info!(session_id = %session_id, "Heartbeat timeout during quiet hours, alert suppressed");
            if let Err(e) = self
                .db
                .mark_session_timeout(session_id, QUIET_HOURS_MESSAGE, false, None, None)
                .await
            {
                error!(session_id = %session_id, error = %e, "Failed to persist quiet-hours timeout");
            }
            return TimeoutOutcome::QuietHours;
        }

        // Log record first; a failing store write must not stop the alert.
        if let Err(e) = self
            .logs
            .record(
                session_id,
                &ctx.user_id,
                LogLevel::Error,
                &format!("Heartbeat timeout: {} stopped responding", ctx.game_name),
            )
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to persist timeout log");
        }

        let payload = CriticalAlert {
            session_id: session_id.to_string(),
            game_name: ctx.game_name.clone(),
            hub_name: ctx.hub_name.clone(),
            reason: TIMEOUT_MESSAGE.to_string(),
            last_status: ctx.current_status.clone(),
            alert_sound: prefs.alert_sound.clone(),
        };

        let (delivered, alert_error) = match self
            .push
            .send_critical(&ctx.user_id, &payload, DeviceFilter::All)
            .await
        {
            Ok(report) => {
                info!(
                    session_id = %session_id,
                    devices = report.total_devices,
                    delivered = report.success_count,
                    "Timeout alert fan-out complete"
                );
                let errors: Vec<String> = report
                    .results
                    .iter()
                    .filter_map(|r| {
                        r.error
                            .as_ref()
                            .map(|e| format!("{}: {e}", r.device_id))
                    })
                    .collect();
                (
                    report.success,
                    (!errors.is_empty()).then(|| errors.join("; ")),
                )
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Timeout alert fan-out failed");
                (false, Some(e.to_string()))
            }
        };

        if prefs.life_or_death {
            if let Err(e) = self
                .alerts
                .start(&ctx.user_id, session_id, TIMEOUT_MESSAGE, &ctx.game_name)
                .await
            {
                error!(session_id = %session_id, error = %e, "Failed to start alert loop");
            }
        }

        if let Err(e) = self
            .db
            .mark_session_timeout(
                session_id,
                TIMEOUT_MESSAGE,
                true,
                Some(delivered),
                alert_error.as_deref(),
            )
            .await
        {
            error!(session_id = %session_id, error = %e, "Failed to persist timeout transition");
        }

        TimeoutOutcome::AlertSent { delivered }
    }

    /// Timeout addressed by ephemeral client id (the watchdog races the
    /// router; unknown ids are a no-op).
    pub async fn timeout_by_client_id(&self, ws_client_id: &str) -> TimeoutOutcome {
        match self.db.get_session_by_client_id(ws_client_id).await {
            Ok(Some(session)) => self.timeout(&session.id).await,
            Ok(None) => TimeoutOutcome::NoOp,
            Err(e) => {
                error!(client_id = %ws_client_id, error = %e, "Timeout lookup failed");
                TimeoutOutcome::NoOp
            }
        }
    }

    /// The grace-period check after an abrupt socket close. If the
    /// producer reconnected (a newer active session for the same user
    /// exists), the orphaned session closes without an alert; otherwise
    /// the timeout path runs with the last-known session identity.
    pub async fn grace_timeout(&self, session_id: &str, closed_at: i64) -> GraceOutcome {
        let session = match self.db.get_session(session_id).await {
            Ok(Some(session)) if session.is_active() => session,
            Ok(_) => return GraceOutcome::NoOp,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Grace check lookup failed");
                return GraceOutcome::NoOp;
            }
        };

        match self
            .db
            .has_newer_active_session(&session.user_id, session_id, closed_at)
            .await
        {
            Ok(true) => {
                info!(session_id = %session_id, "Producer reconnected within grace period");
                if let Err(e) = self
                    .db
                    .disconnect_session_by_id(
                        session_id,
                        DisconnectReason::Error,
                        Some("Connection lost (client reconnected)"),
                    )
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "Failed to close superseded session");
                }
                GraceOutcome::Reconnected
            }
            Ok(false) => GraceOutcome::TimedOut(self.timeout(session_id).await),
            Err(e) => {
                // Err on the side of alerting: an unreadable store should
                // not silently swallow a dead session.
                warn!(session_id = %session_id, error = %e, "Reconnect check failed, proceeding to timeout");
                GraceOutcome::TimedOut(self.timeout(session_id).await)
            }
        }
    }

    /// Startup reconciliation: every `active` session becomes
    /// `disconnected(server-shutdown)`. Runs before the router accepts.
    pub async fn reconcile_startup(&self) -> Result<u64, DatabaseError> {
        let reconciled = self.db.reconcile_orphaned_sessions().await?;
        if reconciled > 0 {
            info!(reconciled, "Marked orphaned sessions disconnected after restart");
        }
        Ok(reconciled)
    }
}
