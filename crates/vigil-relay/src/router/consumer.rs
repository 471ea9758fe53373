//! Consumer-side frame handlers.

use serde_json::Value;
use tracing::warn;

use crate::registry::ClientInfo;
use crate::server::AppState;

use super::protocol::{ConsumerUserInfo, ErrorCode, ServerMessage};
use super::{reject, send, send_error, FrameOutcome};

/// `authenticate`: bearer-token consumer authentication.
pub(super) async fn authenticate(state: &AppState, client_id: &str, token: &str) -> FrameOutcome {
    let user = match state.auth.validate_bearer(token).await {
        Ok(user) => user,
        Err(e) => return reject(state, client_id, ErrorCode::from(&e), &e.to_string()).await,
    };

    let sessions = state
        .db
        .active_sessions_for_user(&user.id)
        .await
        .unwrap_or_default();

    state.registry.set_consumer(client_id, &user.id, None).await;
    send(
        state,
        client_id,
        ServerMessage::ConsumerAuthenticated {
            user: ConsumerUserInfo {
                id: user.id,
                username: user.username,
            },
            sessions,
        },
    )
    .await;

    FrameOutcome::Continue
}

/// `register_device`: consumer authentication by connect token (preferred)
/// or legacy raw user id, with an optional device upsert by push token.
pub(super) async fn register_device(
    state: &AppState,
    client_id: &str,
    user_token: Option<&str>,
    user_id: Option<&str>,
    push_token: Option<&str>,
    platform: Option<&str>,
    device_name: Option<&str>,
) -> FrameOutcome {
    let user = if let Some(token) = user_token {
        match state.auth.validate_user_token(token).await {
            Ok(principal) => principal.user,
            Err(e) => return reject(state, client_id, ErrorCode::from(&e), &e.to_string()).await,
        }
    } else if let Some(raw_id) = user_id {
        // Legacy path: a raw user id instead of a token.
        match state.db.get_user(raw_id).await {
            Ok(user) if !user.is_suspended() => user,
            Ok(_) => {
                return reject(state, client_id, ErrorCode::UserSuspended, "User account is suspended").await;
            }
            Err(_) => {
                return reject(state, client_id, ErrorCode::InvalidUserToken, "Unknown user").await;
            }
        }
    } else {
        return reject(state, client_id, ErrorCode::InvalidParams, "userToken or userId required").await;
    };

    let platform = match platform {
        None => "web",
        Some(p @ ("android" | "ios" | "web")) => p,
        Some(other) => {
            return reject(
                state,
                client_id,
                ErrorCode::InvalidParams,
                &format!("Unknown platform {other:?}"),
            )
            .await;
        }
    };

    let device_id = if let Some(token) = push_token {
        let id = uuid::Uuid::new_v4().to_string();
        match state
            .db
            .upsert_device(&id, &user.id, token, platform, device_name)
            .await
        {
            Ok(device) => Some(device.id),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Device upsert failed");
                None
            }
        }
    } else {
        None
    };

    let sessions = state
        .db
        .active_sessions_for_user(&user.id)
        .await
        .unwrap_or_default();

    state
        .registry
        .set_consumer(client_id, &user.id, device_id.as_deref())
        .await;
    send(
        state,
        client_id,
        ServerMessage::Registered {
            user: ConsumerUserInfo {
                id: user.id,
                username: user.username,
            },
            sessions,
        },
    )
    .await;

    FrameOutcome::Continue
}

/// `command`: forward to the producer socket serving the named session,
/// scoped to the caller's user (cross-user probes read as not-found).
pub(super) async fn handle_command(
    state: &AppState,
    client_id: &str,
    info: &ClientInfo,
    session_id: &str,
    command: &str,
    data: Option<Value>,
) -> FrameOutcome {
    let Some(user_id) = &info.user_id else {
        return FrameOutcome::Continue;
    };

    let Some(producer_client) = state
        .registry
        .find_producer_for_session(session_id, user_id)
        .await
    else {
        send_error(state, client_id, ErrorCode::SessionNotFound, "Session not found").await;
        return FrameOutcome::Continue;
    };

    let forwarded = state
        .registry
        .send_to(
            &producer_client,
            ServerMessage::Command {
                command: command.to_string(),
                data,
            },
        )
        .await;

    if forwarded {
        send(
            state,
            client_id,
            ServerMessage::CommandSent {
                session_id: session_id.to_string(),
            },
        )
        .await;
    } else {
        send_error(state, client_id, ErrorCode::SessionNotFound, "Session not found").await;
    }

    FrameOutcome::Continue
}
