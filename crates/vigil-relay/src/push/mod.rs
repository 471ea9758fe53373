//! Push notification fan-out (FCM).
//!
//! Provides:
//! - [`FcmClient`] for sending pushes via the FCM HTTP v1 API, with
//!   platform-specific high-priority shaping for critical alerts
//! - [`PushFanout`] resolving a user's active devices and sending in
//!   parallel, surfacing per-device outcomes and marking failing tokens

pub mod fanout;
pub mod fcm;

pub use fanout::{CriticalAlert, DeviceFilter, DeviceOutcome, FanoutReport, PushFanout};
pub use fcm::FcmClient;

/// Errors that can occur in the push subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Failed to read or parse the FCM service account credentials file.
    #[error("FCM credentials error: {0}")]
    Credentials(String),

    /// HTTP request to FCM API failed.
    #[error("FCM request error: {0}")]
    Request(String),

    /// FCM API returned a non-success status code.
    #[error("FCM API error (status {status}): {body}")]
    ApiError {
        /// HTTP status code returned by FCM.
        status: u16,
        /// Response body from FCM.
        body: String,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] crate::storage::DatabaseError),
}
