//! WebSocket hub.
//!
//! Terminates sockets on `/ws`, assigns each a fresh ephemeral client id,
//! validates every inbound frame, dispatches by typed tag, and fans out
//! to the peer role. One reader loop per socket plus a writer task
//! draining the outbound queue; all store and push work happens off the
//! socket-map lock.

pub mod consumer;
pub mod producer;
pub mod protocol;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vigil_core::db::unix_timestamp_ms;

use crate::ratelimit::MessageClass;
use crate::registry::{ClientInfo, ClientRole};
use crate::server::AppState;

use protocol::{parse_client_message, ClientMessage, ErrorCode, FrameError, ServerMessage};

/// Outbound queue depth per socket; a full queue drops frames
/// (best-effort fan-out).
const OUTBOUND_QUEUE: usize = 64;

/// Whether the reader loop keeps going after a frame.
enum FrameOutcome {
    Continue,
    Close,
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    state
        .registry
        .register(ClientInfo::new(
            client_id.clone(),
            Some(addr.ip().to_string()),
            outbound_tx,
        ))
        .await;

    let (mut sink, mut stream) = socket.split();

    // Writer task: drains the outbound queue until every sender is gone,
    // so frames queued right before a close still flush. Server-initiated
    // closes end with a 1001 close frame; on a peer-initiated close the
    // send fails silently.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "server closing".into(),
            })))
            .await;
    });

    state
        .registry
        .send_to(
            &client_id,
            ServerMessage::Connected {
                client_id: client_id.clone(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match handle_frame(&state, &client_id, &text).await {
                FrameOutcome::Continue => {}
                FrameOutcome::Close => break,
            },
            Message::Close(_) => break,
            // Binary frames and transport pings are not part of the protocol
            _ => {}
        }
    }

    handle_socket_closed(&state, &client_id).await;

    // Dropping the registry entry closed the queue; let the writer flush.
    let _ = writer.await;
}

/// Validate and dispatch one inbound text frame.
async fn handle_frame(state: &AppState, client_id: &str, text: &str) -> FrameOutcome {
    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(FrameError::InvalidMessage) => {
            debug!(client_id = %client_id, "Unparseable frame");
            send_error(state, client_id, ErrorCode::InvalidMessage, "Unknown or malformed message").await;
            return FrameOutcome::Continue;
        }
        Err(FrameError::InvalidParams) => {
            send_error(state, client_id, ErrorCode::InvalidParams, "Missing or invalid fields").await;
            return FrameOutcome::Continue;
        }
    };

    let Some(info) = state.registry.get(client_id).await else {
        return FrameOutcome::Close;
    };

    match (info.role, message) {
        // Heartbeats are ignored until authenticated; producers also reset
        // the watchdog.
        (ClientRole::Unauth, ClientMessage::Heartbeat | ClientMessage::Ping) => {
            FrameOutcome::Continue
        }
        (ClientRole::Producer, ClientMessage::Heartbeat | ClientMessage::Ping) => {
            state.watchdog.reset(client_id).await;
            send(state, client_id, ServerMessage::Pong { timestamp: unix_timestamp_ms() }).await;
            FrameOutcome::Continue
        }
        (ClientRole::Consumer, ClientMessage::Heartbeat | ClientMessage::Ping) => {
            send(state, client_id, ServerMessage::Pong { timestamp: unix_timestamp_ms() }).await;
            FrameOutcome::Continue
        }

        // Authentication, first typed frame on an unauth socket
        (ClientRole::Unauth, ClientMessage::Connect { hub_key, user_token, game_info }) => {
            producer::authenticate(state, client_id, &hub_key, &user_token, &game_info).await
        }
        (ClientRole::Unauth, ClientMessage::Authenticate { token }) => {
            consumer::authenticate(state, client_id, &token).await
        }
        (ClientRole::Unauth, ClientMessage::RegisterDevice { user_token, user_id, push_token, platform, device_name }) => {
            consumer::register_device(
                state,
                client_id,
                user_token.as_deref(),
                user_id.as_deref(),
                push_token.as_deref(),
                platform.as_deref(),
                device_name.as_deref(),
            )
            .await
        }
        (ClientRole::Unauth, _) => {
            send_error(state, client_id, ErrorCode::NotAuthenticated, "Authenticate first").await;
            FrameOutcome::Continue
        }

        // Producer dispatch
        (ClientRole::Producer, ClientMessage::Status { status, data }) => {
            producer::handle_status(state, client_id, &info, &status, data).await
        }
        (ClientRole::Producer, ClientMessage::Log { message, level }) => {
            producer::handle_log(state, client_id, &info, &message, level.as_deref()).await
        }
        (ClientRole::Producer, ClientMessage::Notify { title, body }) => {
            producer::handle_notify(state, client_id, &info, &title, &body).await
        }
        (ClientRole::Producer, ClientMessage::Alert { reason, title }) => {
            producer::handle_alert(state, client_id, &info, &reason, title.as_deref()).await
        }
        (ClientRole::Producer, ClientMessage::Disconnect { reason }) => {
            producer::handle_disconnect(state, client_id, &info, reason.as_deref()).await
        }

        // Consumer dispatch
        (ClientRole::Consumer, ClientMessage::Command { session_id, command, data }) => {
            consumer::handle_command(state, client_id, &info, &session_id, &command, data).await
        }

        // Peer-role isolation: wrong-role messages change no state
        (ClientRole::Producer | ClientRole::Consumer, _) => {
            send_error(state, client_id, ErrorCode::InvalidMessage, "Message not valid for this role").await;
            FrameOutcome::Continue
        }
    }
}

/// Socket close handler. An authenticated producer whose session is still
/// active gets the connection-lost fan-out and the watchdog grace path;
/// a cleanly disconnected one (or a consumer) just unwinds.
async fn handle_socket_closed(state: &AppState, client_id: &str) {
    let Some(info) = state.registry.unregister(client_id).await else {
        return;
    };
    state.ratelimit.forget_client(client_id);

    if info.role != ClientRole::Producer {
        return;
    }
    let (Some(session_id), Some(user_id)) = (info.session_id, info.user_id) else {
        return;
    };

    let session = match state.db.get_session(&session_id).await {
        Ok(Some(session)) => session,
        _ => return,
    };
    if !session.is_active() {
        // Clean disconnect already ran; nothing lost.
        return;
    }

    warn!(session_id = %session_id, "Producer socket lost abruptly");
    state
        .registry
        .fan_out_to_consumers(
            &user_id,
            &ServerMessage::SessionConnectionLost {
                session_id: session_id.clone(),
                game_name: session.game_name.clone(),
                timestamp: unix_timestamp_ms(),
            },
        )
        .await;

    // Candidate for timeout, not a clean disconnect.
    state.watchdog.grace_close(client_id).await;
}

pub(crate) async fn send(state: &AppState, client_id: &str, message: ServerMessage) {
    state.registry.send_to(client_id, message).await;
}

pub(crate) async fn send_error(
    state: &AppState,
    client_id: &str,
    code: ErrorCode,
    message: &str,
) {
    send(state, client_id, ServerMessage::error(code, message)).await;
}

/// Send an error frame; authentication codes are fatal for the socket.
async fn reject(state: &AppState, client_id: &str, code: ErrorCode, message: &str) -> FrameOutcome {
    send_error(state, client_id, code, message).await;
    if code.is_fatal() {
        FrameOutcome::Close
    } else {
        FrameOutcome::Continue
    }
}

/// Rate-limit gate shared by the rated producer handlers.
pub(crate) async fn rate_limited(
    state: &AppState,
    client_id: &str,
    class: MessageClass,
) -> bool {
    if state.ratelimit.allow(client_id, class) {
        return false;
    }
    send_error(
        state,
        client_id,
        ErrorCode::RateLimited,
        &format!("Too many {} messages, slow down", class.as_str()),
    )
    .await;
    true
}
