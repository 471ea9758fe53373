//! Push fan-out: resolve a user's active devices and deliver in parallel.
//!
//! Best-effort with no retry; per-device outcomes are surfaced to the
//! caller and recorded against the device row (consecutive failures
//! deactivate the token).

use std::collections::HashMap;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::storage::{Database, Device};

use super::{FcmClient, PushError};

/// Which of the user's devices to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    All,
    /// Web consumers only; mobile platforms run their own native alarm
    /// after the first critical delivery.
    WebOnly,
}

/// The critical-alert payload assembled on the timeout path.
#[derive(Debug, Clone)]
pub struct CriticalAlert {
    pub session_id: String,
    pub game_name: String,
    pub hub_name: String,
    pub reason: String,
    pub last_status: String,
    pub alert_sound: String,
}

/// Outcome of one device delivery.
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    pub device_id: String,
    pub platform: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Aggregate fan-out result.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    pub success: bool,
    pub total_devices: usize,
    pub success_count: usize,
    pub results: Vec<DeviceOutcome>,
}

impl FanoutReport {
    fn empty() -> Self {
        Self {
            success: false,
            total_devices: 0,
            success_count: 0,
            results: Vec::new(),
        }
    }
}

/// Sends typed payloads to every active device of a user.
pub struct PushFanout {
    db: Database,
    fcm: Option<FcmClient>,
    failure_threshold: i64,
}

impl PushFanout {
    pub fn new(db: Database, fcm: Option<FcmClient>, failure_threshold: i64) -> Self {
        Self {
            db,
            fcm,
            failure_threshold,
        }
    }

    /// Deliver a critical alert to the user's devices.
    pub async fn send_critical(
        &self,
        user_id: &str,
        alert: &CriticalAlert,
        filter: DeviceFilter,
    ) -> Result<FanoutReport, PushError> {
        let title = format!("🚨 {}", alert.game_name);
        let data = HashMap::from([
            ("kind".to_string(), "critical_alert".to_string()),
            ("sessionId".to_string(), alert.session_id.clone()),
            ("gameName".to_string(), alert.game_name.clone()),
            ("hubName".to_string(), alert.hub_name.clone()),
            ("reason".to_string(), alert.reason.clone()),
            ("lastStatus".to_string(), alert.last_status.clone()),
        ]);

        self.deliver(user_id, filter, move |device| {
            FcmClient::build_critical_message(
                &device.push_token,
                &title,
                &alert.reason,
                &alert.alert_sound,
                Some(data.clone()),
            )
        })
        .await
    }

    /// Deliver a normal-priority notification to all of the user's devices.
    pub async fn send_normal(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
    ) -> Result<FanoutReport, PushError> {
        let data = HashMap::from([("kind".to_string(), "notification".to_string())]);

        self.deliver(user_id, DeviceFilter::All, move |device| {
            FcmClient::build_message(&device.push_token, title, body, Some(data.clone()))
        })
        .await
    }

    /// Deliver a data-only payload (no display) to all of the user's
    /// devices.
    pub async fn send_data(
        &self,
        user_id: &str,
        data: HashMap<String, String>,
    ) -> Result<FanoutReport, PushError> {
        self.deliver(user_id, DeviceFilter::All, move |device| {
            FcmClient::build_data_message(&device.push_token, data.clone())
        })
        .await
    }

    async fn deliver<F>(
        &self,
        user_id: &str,
        filter: DeviceFilter,
        build: F,
    ) -> Result<FanoutReport, PushError>
    where
        F: Fn(&Device) -> super::fcm::FcmMessage,
    {
        let devices = match filter {
            DeviceFilter::All => self.db.active_devices_for_user(user_id).await?,
            DeviceFilter::WebOnly => {
                self.db
                    .active_devices_for_user_on_platform(user_id, "web")
                    .await?
            }
        };

        if devices.is_empty() {
            debug!(user_id = %user_id, "Push fan-out skipped: no active devices");
            return Ok(FanoutReport::empty());
        }

        let Some(fcm) = &self.fcm else {
            warn!(user_id = %user_id, "Push transport not configured, dropping fan-out");
            let results = devices
                .iter()
                .map(|d| DeviceOutcome {
                    device_id: d.id.clone(),
                    platform: d.platform.clone(),
                    ok: false,
                    error: Some("push transport not configured".to_string()),
                })
                .collect::<Vec<_>>();
            return Ok(FanoutReport {
                success: false,
                total_devices: results.len(),
                success_count: 0,
                results,
            });
        };

        // One failing device never cancels the others.
        let sends = devices.iter().map(|device| {
            let message = build(device);
            async move {
                let result = fcm.send(&message).await;
                (device, result)
            }
        });

        let mut results = Vec::with_capacity(devices.len());
        for (device, result) in join_all(sends).await {
            let outcome = match result {
                Ok(()) => {
                    if let Err(e) = self.db.record_device_success(&device.id).await {
                        warn!(device_id = %device.id, error = %e, "Failed to record push success");
                    }
                    DeviceOutcome {
                        device_id: device.id.clone(),
                        platform: device.platform.clone(),
                        ok: true,
                        error: None,
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    match self
                        .db
                        .record_device_failure(&device.id, &reason, self.failure_threshold)
                        .await
                    {
                        Ok(true) => {
                            info!(device_id = %device.id, "Device deactivated after repeated push failures");
                        }
                        Ok(false) => {}
                        Err(db_err) => {
                            warn!(device_id = %device.id, error = %db_err, "Failed to record push failure");
                        }
                    }
                    DeviceOutcome {
                        device_id: device.id.clone(),
                        platform: device.platform.clone(),
                        ok: false,
                        error: Some(reason),
                    }
                }
            };
            results.push(outcome);
        }

        let success_count = results.iter().filter(|r| r.ok).count();
        Ok(FanoutReport {
            success: success_count > 0,
            total_devices: results.len(),
            success_count,
            results,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::push::fcm::ServiceAccountCredentials;

    async fn test_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        db.create_user("u1", "a@example.com", "a", "h").await.unwrap();
        db
    }

    fn test_alert() -> CriticalAlert {
        CriticalAlert {
            session_id: "s1".to_string(),
            game_name: "Grand Quarry".to_string(),
            hub_name: "Hub One".to_string(),
            reason: "Heartbeat timeout".to_string(),
            last_status: "Farming".to_string(),
            alert_sound: "siren".to_string(),
        }
    }

    #[tokio::test]
    async fn no_devices_yields_empty_report() {
        let db = test_db().await;
        let fanout = PushFanout::new(db, None, 3);

        let report = fanout
            .send_critical("u1", &test_alert(), DeviceFilter::All)
            .await
            .unwrap();
        assert_eq!(report.total_devices, 0);
        assert!(!report.success);
    }

    #[tokio::test]
    async fn unconfigured_transport_reports_failure_without_penalty() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok", "android", None).await.unwrap();
        let fanout = PushFanout::new(db.clone(), None, 3);

        let report = fanout
            .send_critical("u1", &test_alert(), DeviceFilter::All)
            .await
            .unwrap();
        assert_eq!(report.total_devices, 1);
        assert!(!report.success);
        assert!(report.results[0].error.is_some());

        // Failure counter untouched: the transport was absent, not the device
        let device = db.get_device_by_token("tok").await.unwrap().unwrap();
        assert_eq!(device.failed_attempts, 0);
    }

    #[tokio::test]
    async fn unreachable_fcm_counts_device_failures() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok", "android", None).await.unwrap();

        let creds = ServiceAccountCredentials {
            project_id: "test".to_string(),
            client_email: String::new(),
            private_key: String::new(),
        };
        // No valid credentials: the request errors (network or 401), and
        // either way the outcome is a recorded device failure.
        let fcm = FcmClient::from_credentials(creds, reqwest::Client::new());
        let fanout = PushFanout::new(db.clone(), Some(fcm), 3);

        let report = fanout
            .send_critical("u1", &test_alert(), DeviceFilter::All)
            .await
            .unwrap();
        assert_eq!(report.total_devices, 1);
        assert!(!report.results[0].ok);

        let device = db.get_device_by_token("tok").await.unwrap().unwrap();
        assert_eq!(device.failed_attempts, 1);
        assert!(device.last_fail_reason.is_some());
    }

    #[tokio::test]
    async fn web_filter_targets_only_web_devices() {
        let db = test_db().await;
        db.upsert_device("d1", "u1", "tok-a", "android", None).await.unwrap();
        db.upsert_device("d2", "u1", "tok-b", "web", None).await.unwrap();
        let fanout = PushFanout::new(db, None, 3);

        let report = fanout
            .send_critical("u1", &test_alert(), DeviceFilter::WebOnly)
            .await
            .unwrap();
        assert_eq!(report.total_devices, 1);
        assert_eq!(report.results[0].platform, "web");
    }
}
