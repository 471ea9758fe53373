//! Producer-side frame handlers.

use serde_json::Value;
use tracing::{info, warn};

use vigil_core::db::unix_timestamp_ms;

use crate::push::{CriticalAlert, DeviceFilter};
use crate::ratelimit::MessageClass;
use crate::registry::ClientInfo;
use crate::server::AppState;
use crate::storage::{DisconnectReason, LogLevel, NewSession};

use super::protocol::{ErrorCode, GameInfo, HubInfo, ProducerUserInfo, ServerMessage};
use super::{rate_limited, reject, send, send_error, FrameOutcome};

/// `connect`: validate hub key and user token, create the session, start
/// the watchdog, and announce the session to the user's consumers.
pub(super) async fn authenticate(
    state: &AppState,
    client_id: &str,
    hub_key: &str,
    user_token: &str,
    game_info: &GameInfo,
) -> FrameOutcome {
    let hub = match state.auth.validate_hub_key(hub_key).await {
        Ok(hub) => hub,
        Err(e) => return reject(state, client_id, ErrorCode::from(&e), &e.to_string()).await,
    };

    let principal = match state.auth.validate_user_token(user_token).await {
        Ok(principal) => principal,
        Err(e) => return reject(state, client_id, ErrorCode::from(&e), &e.to_string()).await,
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = match state
        .sessions
        .create_session(&NewSession {
            id: &session_id,
            user_id: &principal.user.id,
            hub_id: &hub.id,
            ws_client_id: client_id,
            game_name: &game_info.name,
            place_id: game_info.place_id,
            job_id: &game_info.job_id,
            executor: game_info.executor.as_deref(),
        })
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Session create failed");
            send_error(state, client_id, ErrorCode::InvalidMessage, "Internal error").await;
            return FrameOutcome::Close;
        }
    };

    if let Err(e) = state.db.increment_hub_connections(&hub.id).await {
        warn!(hub_id = %hub.id, error = %e, "Hub connection counter update failed");
    }

    state
        .registry
        .set_producer(client_id, &principal.user.id, &hub.id, &session.id)
        .await;
    state
        .watchdog
        .start(client_id, &session.id, &principal.user.id)
        .await;

    send(
        state,
        client_id,
        ServerMessage::ProducerAuthenticated {
            session_id: session.id.clone(),
            user: ProducerUserInfo {
                username: principal.user.username.clone(),
                has_devices: !principal.devices.is_empty(),
            },
            hub: HubInfo {
                name: hub.name.clone(),
            },
            message: "Session started".to_string(),
        },
    )
    .await;

    state
        .registry
        .fan_out_to_consumers(
            &principal.user.id,
            &ServerMessage::SessionStarted {
                session_id: session.id.clone(),
                game_name: session.game_name.clone(),
                hub_name: hub.name,
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    FrameOutcome::Continue
}

/// `status`: update the session's status text and relay to consumers.
pub(super) async fn handle_status(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    status: &str,
    data: Option<Value>,
) -> FrameOutcome {
    if rate_limited(state, client_id, MessageClass::Status).await {
        return FrameOutcome::Continue;
    }
    let (Some(session_id), Some(user_id)) = (&info.session_id, &info.user_id) else {
        return FrameOutcome::Continue;
    };

    state.sessions.update_status(client_id, status).await;
    state
        .registry
        .fan_out_to_consumers(
            user_id,
            &ServerMessage::StatusUpdate {
                session_id: session_id.clone(),
                status: status.to_string(),
                data,
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    FrameOutcome::Continue
}

/// `log`: persist, push to consumer sockets, append to the user's ring.
pub(super) async fn handle_log(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    message: &str,
    level: Option<&str>,
) -> FrameOutcome {
    if rate_limited(state, client_id, MessageClass::Log).await {
        return FrameOutcome::Continue;
    }
    let (Some(session_id), Some(user_id)) = (&info.session_id, &info.user_id) else {
        return FrameOutcome::Continue;
    };

    let level = LogLevel::parse(level.unwrap_or("info"));
    if let Err(e) = state.logs.record(session_id, user_id, level, message).await {
        warn!(session_id = %session_id, error = %e, "Log persist failed");
    }

    state
        .registry
        .fan_out_to_consumers(
            user_id,
            &ServerMessage::Log {
                session_id: session_id.clone(),
                level: level.as_str().to_string(),
                message: message.chars().take(crate::storage::MAX_LOG_MESSAGE_CHARS).collect(),
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    FrameOutcome::Continue
}

/// `notify`: relay to consumers and push at normal priority.
pub(super) async fn handle_notify(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    title: &str,
    body: &str,
) -> FrameOutcome {
    if rate_limited(state, client_id, MessageClass::Notify).await {
        return FrameOutcome::Continue;
    }
    let (Some(session_id), Some(user_id)) = (&info.session_id, &info.user_id) else {
        return FrameOutcome::Continue;
    };

    state
        .registry
        .fan_out_to_consumers(
            user_id,
            &ServerMessage::Notification {
                session_id: session_id.clone(),
                title: title.to_string(),
                body: body.to_string(),
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    // Push delivery runs off the receive path.
    let push = state.push.clone();
    let user_id = user_id.clone();
    let title = title.to_string();
    let body = body.to_string();
    tokio::spawn(async move {
        if let Err(e) = push.send_normal(&user_id, &title, &body).await {
            warn!(user_id = %user_id, error = %e, "Notify push failed");
        }
    });

    FrameOutcome::Continue
}

/// `alert`: relay a critical alert to consumers and push at critical
/// priority.
pub(super) async fn handle_alert(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    reason: &str,
    title: Option<&str>,
) -> FrameOutcome {
    if rate_limited(state, client_id, MessageClass::Alert).await {
        return FrameOutcome::Continue;
    }
    let (Some(session_id), Some(user_id)) = (&info.session_id, &info.user_id) else {
        return FrameOutcome::Continue;
    };

    let ctx = match state.db.get_session_context(session_id).await {
        Ok(Some(ctx)) => ctx,
        _ => return FrameOutcome::Continue,
    };

    state
        .registry
        .fan_out_to_consumers(
            user_id,
            &ServerMessage::CriticalAlert {
                session_id: session_id.clone(),
                reason: reason.to_string(),
                title: title.unwrap_or("🚨 Critical Alert").to_string(),
                game_name: ctx.game_name.clone(),
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    let push = state.push.clone();
    let payload = CriticalAlert {
        session_id: session_id.clone(),
        game_name: ctx.game_name,
        hub_name: ctx.hub_name,
        reason: reason.to_string(),
        last_status: ctx.current_status,
        alert_sound: ctx.alert_sound,
    };
    let user_id = user_id.clone();
    tokio::spawn(async move {
        if let Err(e) = push.send_critical(&user_id, &payload, DeviceFilter::All).await {
            warn!(user_id = %user_id, error = %e, "Alert push failed");
        }
    });

    FrameOutcome::Continue
}

/// `disconnect`: clean shutdown of the session.
pub(super) async fn handle_disconnect(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    reason: Option<&str>,
) -> FrameOutcome {
    state.watchdog.stop(client_id).await;

    if let Err(e) = state
        .sessions
        .disconnect_by_client_id(client_id, DisconnectReason::Manual, reason)
        .await
    {
        warn!(client_id = %client_id, error = %e, "Disconnect persist failed");
    }

    if let (Some(session_id), Some(user_id)) = (&info.session_id, &info.user_id) {
        info!(session_id = %session_id, "Producer disconnected cleanly");
        let ended = ServerMessage::SessionEnded {
            session_id: session_id.clone(),
            reason: reason.unwrap_or("Producer disconnected").to_string(),
            timestamp: unix_timestamp_ms(),
        };
        state.registry.fan_out_to_consumers(user_id, &ended).await;
        // Ack to the producer, then close.
        send(state, client_id, ended).await;
    }

    FrameOutcome::Close
}
