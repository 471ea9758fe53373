//! Typed storage gateway for the relay.
//!
//! `Database` wraps the `SQLite` pool; per-entity queries are split across
//! the `queries_*` modules as `impl Database` blocks.

mod db;
mod models;
mod queries_alerts;
mod queries_devices;
mod queries_hubs;
mod queries_logs;
mod queries_sessions;
mod queries_users;

pub use db::Database;
pub use models::{
    ActiveAlert, AlertPreferences, Device, DisconnectReason, Hub, HubStatus, LogLevel, Session,
    SessionContext, SessionStatus, SessionLog, User, UserStatus,
};
pub use queries_logs::MAX_LOG_MESSAGE_CHARS;
pub use queries_sessions::{NewSession, SessionListing};
pub use vigil_core::db::DatabaseError;
