//! Data models for vigil relay storage.
//!
//! Status columns are stored as strings; the enums here own the canonical
//! spellings and stay loose on parse so an unexpected row never panics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub status: String,
    pub token_digest: Option<String>,
    pub token_hint: Option<String>,
    pub token_created_at: Option<i64>,
    pub alert_sound: String,
    pub quiet_hours_enabled: i64,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub life_or_death: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn is_suspended(&self) -> bool {
        self.status == UserStatus::Suspended.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

/// Per-user alert preferences, as carried on the timeout path.
#[derive(Debug, Clone)]
pub struct AlertPreferences {
    pub alert_sound: String,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub life_or_death: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Hub {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub owner_email: String,
    pub api_key: String,
    pub api_key_digest: String,
    pub api_key_hint: String,
    pub status: String,
    pub total_connections: i64,
    pub last_connected_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

impl HubStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub push_token: String,
    pub platform: String,
    pub device_name: Option<String>,
    pub is_active: i64,
    pub failed_attempts: i64,
    pub last_fail_reason: Option<String>,
    pub last_seen: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub hub_id: String,
    pub ws_client_id: String,
    pub game_name: String,
    pub place_id: i64,
    pub job_id: String,
    pub executor: Option<String>,
    pub current_status: String,
    pub status: String,
    pub connected_at: i64,
    pub last_heartbeat_at: i64,
    pub disconnected_at: Option<i64>,
    pub disconnect_reason: Option<String>,
    pub disconnect_message: Option<String>,
    pub alert_sent: i64,
    pub alert_delivered: Option<i64>,
    pub alert_error: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Disconnected,
    Timeout,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disconnected => "disconnected",
            Self::Timeout => "timeout",
        }
    }
}

/// Why a session left the `active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Manual,
    Timeout,
    TokenRevoked,
    Error,
    ServerShutdown,
}

impl DisconnectReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Timeout => "timeout",
            Self::TokenRevoked => "token-revoked",
            Self::Error => "error",
            Self::ServerShutdown => "server-shutdown",
        }
    }
}

/// A session joined with the owning user's alert preferences and the hub
/// name, loaded in one query on the timeout path.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionContext {
    pub id: String,
    pub user_id: String,
    pub hub_id: String,
    pub ws_client_id: String,
    pub game_name: String,
    pub current_status: String,
    pub status: String,
    pub username: String,
    pub hub_name: String,
    pub alert_sound: String,
    pub quiet_hours_enabled: i64,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub life_or_death: i64,
}

impl SessionContext {
    pub fn preferences(&self) -> AlertPreferences {
        AlertPreferences {
            alert_sound: self.alert_sound.clone(),
            quiet_hours_enabled: self.quiet_hours_enabled != 0,
            quiet_hours_start: self.quiet_hours_start.clone(),
            quiet_hours_end: self.quiet_hours_end.clone(),
            life_or_death: self.life_or_death != 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActiveAlert {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub reason: String,
    pub game_name: String,
    pub started_at: i64,
    pub notifications_sent: i64,
    pub max_notifications: i64,
    pub acknowledged: i64,
    pub acknowledged_at: Option<i64>,
}

impl ActiveAlert {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionLog {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub level: String,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a client-supplied level, defaulting to `info`.
    pub fn parse(s: &str) -> Self {
        match s {
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}
