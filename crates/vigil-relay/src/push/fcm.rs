//! FCM HTTP v1 API client.
//!
//! Constructs and sends push notification requests to the Firebase Cloud
//! Messaging HTTP v1 API endpoint. Critical alerts are shaped per
//! platform: an Android channel with an alarm sound, APNs time-sensitive
//! headers, and a WebPush urgency header.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::PushError;

/// FCM HTTP v1 API endpoint template.
/// The `{project_id}` placeholder is replaced with the actual project ID.
const FCM_API_URL_TEMPLATE: &str =
    "https://fcm.googleapis.com/v1/projects/{project_id}/messages:send";

/// Android notification channel reserved for critical alerts.
const CRITICAL_CHANNEL_ID: &str = "vigil_critical";

/// Service account credentials loaded from a Google Cloud JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    /// The Google Cloud project ID.
    pub project_id: String,

    /// The service account email.
    #[serde(default)]
    pub client_email: String,

    /// The private key in PEM format.
    #[serde(default)]
    pub private_key: String,
}

/// FCM notification message payload.
#[derive(Debug, Serialize)]
pub struct FcmMessage {
    /// The wrapper message object required by the FCM v1 API.
    pub message: FcmMessageBody,
}

/// The inner message body sent to FCM.
#[derive(Debug, Serialize)]
pub struct FcmMessageBody {
    /// The device registration token to send the notification to.
    pub token: String,

    /// The notification payload (title + body).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<FcmNotification>,

    /// Optional data payload (key-value string pairs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,

    /// Android-specific delivery options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,

    /// APNs-specific delivery options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<ApnsConfig>,

    /// WebPush-specific delivery options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebpushConfig>,
}

/// FCM notification display payload.
#[derive(Debug, Serialize)]
pub struct FcmNotification {
    /// The notification title.
    pub title: String,

    /// The notification body text.
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct AndroidConfig {
    /// "HIGH" or "NORMAL".
    pub priority: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<AndroidNotification>,
}

#[derive(Debug, Serialize)]
pub struct AndroidNotification {
    pub channel_id: String,
    pub sound: String,
}

#[derive(Debug, Serialize)]
pub struct ApnsConfig {
    pub headers: HashMap<String, String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct WebpushConfig {
    pub headers: HashMap<String, String>,
}

/// Client for the FCM HTTP v1 API.
#[derive(Debug)]
pub struct FcmClient {
    http: reqwest::Client,
    credentials: ServiceAccountCredentials,
    api_url: String,
}

impl FcmClient {
    /// Create a new FCM client by loading service account credentials from
    /// a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Credentials` if the file cannot be read or
    /// parsed.
    pub fn from_credentials_file(path: &Path) -> Result<Self, PushError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PushError::Credentials(format!(
                "Failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;

        let credentials: ServiceAccountCredentials = serde_json::from_str(&content)
            .map_err(|e| PushError::Credentials(format!("Failed to parse credentials JSON: {e}")))?;

        let api_url = FCM_API_URL_TEMPLATE.replace("{project_id}", &credentials.project_id);

        debug!(project_id = %credentials.project_id, "FCM client initialized");

        Ok(Self {
            http: reqwest::Client::new(),
            credentials,
            api_url,
        })
    }

    /// Create an FCM client from pre-parsed credentials and a pre-built
    /// HTTP client.
    pub fn from_credentials(credentials: ServiceAccountCredentials, http: reqwest::Client) -> Self {
        let api_url = FCM_API_URL_TEMPLATE.replace("{project_id}", &credentials.project_id);

        Self {
            http,
            credentials,
            api_url,
        }
    }

    /// Build a normal-priority notification message.
    pub fn build_message(
        device_token: &str,
        title: &str,
        body: &str,
        data: Option<HashMap<String, String>>,
    ) -> FcmMessage {
        FcmMessage {
            message: FcmMessageBody {
                token: device_token.to_string(),
                notification: Some(FcmNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                }),
                data,
                android: None,
                apns: None,
                webpush: None,
            },
        }
    }

    /// Build a critical (maximum-priority) alert message with the
    /// platform-specific high-priority sections attached.
    pub fn build_critical_message(
        device_token: &str,
        title: &str,
        body: &str,
        sound: &str,
        data: Option<HashMap<String, String>>,
    ) -> FcmMessage {
        let apns_headers = HashMap::from([
            ("apns-priority".to_string(), "10".to_string()),
            ("apns-push-type".to_string(), "alert".to_string()),
        ]);
        let webpush_headers = HashMap::from([("Urgency".to_string(), "high".to_string())]);

        FcmMessage {
            message: FcmMessageBody {
                token: device_token.to_string(),
                notification: Some(FcmNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                }),
                data,
                android: Some(AndroidConfig {
                    priority: "HIGH".to_string(),
                    notification: Some(AndroidNotification {
                        channel_id: CRITICAL_CHANNEL_ID.to_string(),
                        sound: sound.to_string(),
                    }),
                }),
                apns: Some(ApnsConfig {
                    headers: apns_headers,
                    payload: json!({
                        "aps": {
                            "sound": sound,
                            "interruption-level": "time-sensitive",
                        }
                    }),
                }),
                webpush: Some(WebpushConfig {
                    headers: webpush_headers,
                }),
            },
        }
    }

    /// Build a data-only message (no display payload).
    pub fn build_data_message(device_token: &str, data: HashMap<String, String>) -> FcmMessage {
        FcmMessage {
            message: FcmMessageBody {
                token: device_token.to_string(),
                notification: None,
                data: Some(data),
                android: None,
                apns: None,
                webpush: None,
            },
        }
    }

    /// Send a push notification via the FCM HTTP v1 API.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Request` if the HTTP request fails, or
    /// `PushError::ApiError` if FCM returns a non-2xx status code.
    pub async fn send(&self, message: &FcmMessage) -> Result<(), PushError> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", self.auth_header())
            .json(message)
            .send()
            .await
            .map_err(|e| PushError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("FCM notification sent");
            Ok(())
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "FCM API returned error");
            Err(PushError::ApiError {
                status: status_code,
                body,
            })
        }
    }

    /// Construct the Authorization header value.
    ///
    /// A full deployment exchanges a signed service-account JWT for an
    /// OAuth2 access token at Google's token endpoint; the exchange flow
    /// lives with the deployment, not this client.
    fn auth_header(&self) -> String {
        format!("Bearer {}", self.credentials.private_key)
    }

    /// Returns the project ID from the loaded credentials.
    pub fn project_id(&self) -> &str {
        &self.credentials.project_id
    }
}
