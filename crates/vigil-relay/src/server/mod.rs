//! HTTP surface and component wiring.
//!
//! One axum router: the `/ws` hub, a health probe, and the alert
//! acknowledgement endpoint that feeds the alert loop. Registration,
//! login, and hub moderation live with the HTTP collaborator service.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::warn;

use vigil_core::db::unix_timestamp;

use crate::alerts::{AlertError, AlertLoop};
use crate::auth::{Authenticator, JwtManager};
use crate::config::RelayConfig;
use crate::logs::LogSink;
use crate::push::{FcmClient, PushError, PushFanout};
use crate::ratelimit::RateLimiter;
use crate::registry::ClientRegistry;
use crate::router::ws_handler;
use crate::sessions::SessionManager;
use crate::storage::Database;
use crate::watchdog::HeartbeatWatchdog;

/// Default TTL for consumer bearer tokens issued by the collaborator.
const ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub db: Database,
    pub registry: Arc<ClientRegistry>,
    pub ratelimit: Arc<RateLimiter>,
    pub watchdog: Arc<HeartbeatWatchdog>,
    pub sessions: Arc<SessionManager>,
    pub alerts: Arc<AlertLoop>,
    pub push: Arc<PushFanout>,
    pub logs: Arc<LogSink>,
    pub auth: Arc<Authenticator>,
    pub started_at: i64,
}

/// Construct every component against the opened store, leaves first:
/// push and logs feed the alert loop, which feeds the state machine,
/// which the watchdog drives; the router alone sees all of them.
pub fn build_state(config: RelayConfig, db: Database) -> Result<AppState, PushError> {
    let fcm = match &config.push.fcm_credentials_path {
        Some(path) => Some(FcmClient::from_credentials_file(path)?),
        None => {
            warn!("No FCM credentials configured, push delivery disabled");
            None
        }
    };

    let push = Arc::new(PushFanout::new(
        db.clone(),
        fcm,
        config.push.device_failure_threshold,
    ));
    let logs = Arc::new(LogSink::new(db.clone()));
    let alerts = Arc::new(AlertLoop::new(
        db.clone(),
        Arc::clone(&push),
        Duration::from_millis(config.alert_loop.interval_ms),
        config.alert_loop.max_notifications,
    ));
    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        Arc::clone(&push),
        Arc::clone(&alerts),
        Arc::clone(&logs),
    ));
    let watchdog = Arc::new(HeartbeatWatchdog::new(
        Arc::clone(&sessions),
        Duration::from_millis(config.watchdog.heartbeat_timeout_ms),
        Duration::from_millis(config.watchdog.reconnect_grace_period_ms),
    ));
    let ratelimit = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let registry = Arc::new(ClientRegistry::new());

    let jwt = JwtManager::new(config.auth.jwt_secret.as_bytes(), ACCESS_TOKEN_TTL_SECS);
    let auth = Arc::new(Authenticator::new(
        db.clone(),
        jwt,
        config.auth.accept_legacy_tokens,
    ));

    Ok(AppState {
        config: Arc::new(config),
        db,
        registry,
        ratelimit,
        watchdog,
        sessions,
        alerts,
        push,
        logs,
        auth,
        started_at: unix_timestamp(),
    })
}

/// Build the axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .with_state(state)
}

/// `GET /health`
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (producers, consumers) = state.registry.counts().await;
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": unix_timestamp() - state.started_at,
        "producers": producers,
        "consumers": consumers,
    }))
}

/// `POST /alerts/{id}/acknowledge`: stop a repeating alert.
async fn acknowledge_alert(
    Path(alert_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(bearer) = bearer else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing bearer token");
    };
    let user = match state.auth.validate_bearer(bearer).await {
        Ok(user) => user,
        Err(e) => return error_response(StatusCode::UNAUTHORIZED, &e.to_string()),
    };

    match state.alerts.acknowledge(&alert_id, &user.id).await {
        Ok(alert) => (
            StatusCode::OK,
            Json(json!({ "success": true, "alert": alert })),
        )
            .into_response(),
        Err(AlertError::NotFound) => error_response(StatusCode::NOT_FOUND, "Alert not found"),
        Err(AlertError::AlreadyAcknowledged) => {
            error_response(StatusCode::CONFLICT, "Alert already acknowledged")
        }
        Err(AlertError::Database(e)) => {
            warn!(alert_id = %alert_id, error = %e, "Acknowledge failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Storage error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}
