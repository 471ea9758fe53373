//! WebSocket message types for the relay protocol.
//!
//! Every frame is a JSON object with a required string field `type`
//! (internally-tagged enums). Client frames are parsed in two steps so a
//! frame with an unknown `type` and a known frame with missing fields get
//! distinct error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::CredentialError;
use crate::storage::SessionListing;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Game metadata presented by a producer on `connect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub name: String,
    #[serde(default)]
    pub place_id: i64,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub executor: Option<String>,
}

/// Messages sent from clients to the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Producer authentication.
    #[serde(rename_all = "camelCase")]
    Connect {
        hub_key: String,
        user_token: String,
        game_info: GameInfo,
    },

    /// Consumer authentication with a bearer token.
    Authenticate { token: String },

    /// Consumer authentication + device registration by push token.
    #[serde(rename_all = "camelCase")]
    RegisterDevice {
        user_token: Option<String>,
        /// Legacy raw user id path, kept for migration.
        user_id: Option<String>,
        push_token: Option<String>,
        platform: Option<String>,
        device_name: Option<String>,
    },

    /// Watchdog reset.
    Heartbeat,

    /// Alias for heartbeat.
    Ping,

    /// Producer status text update.
    Status {
        status: String,
        #[serde(default)]
        data: Option<Value>,
    },

    /// Producer log line.
    Log {
        message: String,
        #[serde(default)]
        level: Option<String>,
    },

    /// Producer notification, relayed and pushed at normal priority.
    Notify { title: String, body: String },

    /// Producer critical alert, relayed and pushed at critical priority.
    Alert {
        reason: String,
        #[serde(default)]
        title: Option<String>,
    },

    /// Producer clean disconnect.
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Consumer command addressed to one producer session.
    #[serde(rename_all = "camelCase")]
    Command {
        session_id: String,
        command: String,
        #[serde(default)]
        data: Option<Value>,
    },
}

/// The `type` tags [`ClientMessage`] can parse. A frame outside this list
/// is an unknown message, not a parameter error.
const CLIENT_MESSAGE_TYPES: [&str; 11] = [
    "connect",
    "authenticate",
    "register_device",
    "heartbeat",
    "ping",
    "status",
    "log",
    "notify",
    "alert",
    "disconnect",
    "command",
];

/// Why an inbound frame was rejected at the parse stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Malformed JSON, not an object, missing/unknown `type`.
    InvalidMessage,
    /// Known `type` with missing or ill-typed fields.
    InvalidParams,
}

/// Parse one inbound text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|_| FrameError::InvalidMessage)?;

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(FrameError::InvalidMessage);
    };
    if !CLIENT_MESSAGE_TYPES.contains(&kind) {
        return Err(FrameError::InvalidMessage);
    }

    serde_json::from_value(value).map_err(|_| FrameError::InvalidParams)
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Error codes carried on `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidHubKey,
    HubNotApproved,
    HubSuspended,
    InvalidUserToken,
    UserSuspended,
    RateLimited,
    InvalidMessage,
    InvalidParams,
    NotAuthenticated,
    SessionNotFound,
}

impl ErrorCode {
    /// Whether this error is fatal for the socket (authentication errors
    /// close after the error frame; everything else is recoverable).
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InvalidHubKey
                | Self::HubNotApproved
                | Self::HubSuspended
                | Self::InvalidUserToken
                | Self::UserSuspended
        )
    }
}

impl From<&CredentialError> for ErrorCode {
    fn from(e: &CredentialError) -> Self {
        match e {
            CredentialError::InvalidHubKey => Self::InvalidHubKey,
            CredentialError::HubNotApproved { .. } => Self::HubNotApproved,
            CredentialError::HubSuspended => Self::HubSuspended,
            CredentialError::InvalidUserToken | CredentialError::Database(_) => {
                Self::InvalidUserToken
            }
            CredentialError::UserSuspended => Self::UserSuspended,
        }
    }
}

/// User summary on producer `authenticated` frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerUserInfo {
    pub username: String,
    pub has_devices: bool,
}

/// Hub summary on producer `authenticated` frames.
#[derive(Debug, Clone, Serialize)]
pub struct HubInfo {
    pub name: String,
}

/// User summary on consumer `authenticated`/`registered` frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerUserInfo {
    pub id: String,
    pub username: String,
}

/// Messages sent from the relay to clients.
///
/// Producer and consumer authentication replies share the `authenticated`
/// tag with different shapes; the relay only ever serializes these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        client_id: String,
        server_version: String,
        timestamp: i64,
    },

    #[serde(rename = "authenticated", rename_all = "camelCase")]
    ProducerAuthenticated {
        session_id: String,
        user: ProducerUserInfo,
        hub: HubInfo,
        message: String,
    },

    #[serde(rename = "authenticated")]
    ConsumerAuthenticated {
        user: ConsumerUserInfo,
        sessions: Vec<SessionListing>,
    },

    Registered {
        user: ConsumerUserInfo,
        sessions: Vec<SessionListing>,
    },

    Pong {
        timestamp: i64,
    },

    Command {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    CommandSent {
        session_id: String,
    },

    Error {
        code: ErrorCode,
        message: String,
    },

    // Fan-out events to consumers
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: String,
        game_name: String,
        hub_name: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        session_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    Log {
        session_id: String,
        level: String,
        message: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    Notification {
        session_id: String,
        title: String,
        body: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    CriticalAlert {
        session_id: String,
        reason: String,
        title: String,
        game_name: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    SessionEnded {
        session_id: String,
        reason: String,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    SessionConnectionLost {
        session_id: String,
        game_name: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    /// Build an `error` frame with the code's default human message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
