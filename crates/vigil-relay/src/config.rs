//! Configuration resolution for the relay.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config` or `~/.vigil/relay.json`)
//! 3. Environment variables (`VIGIL_*`)
//!
//! Listen address and database path are CLI arguments, not config keys.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub alert_loop: AlertLoopConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Heartbeat watchdog timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Countdown before a silent producer is considered timed out.
    pub heartbeat_timeout_ms: u64,
    /// Grace window after an abrupt socket close before the timeout path runs.
    pub reconnect_grace_period_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
            reconnect_grace_period_ms: 5_000,
        }
    }
}

/// Repeating life-or-death alert loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLoopConfig {
    pub interval_ms: u64,
    /// Cap on notifications per alert, first delivery included.
    pub max_notifications: i64,
}

impl Default for AlertLoopConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            max_notifications: 30,
        }
    }
}

/// One fixed rate-limit window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassLimit {
    pub max: u32,
    pub window_ms: u64,
}

/// Per-message-class limits. Heartbeat and disconnect are unrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub status: ClassLimit,
    pub log: ClassLimit,
    pub notify: ClassLimit,
    pub alert: ClassLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            status: ClassLimit { max: 6, window_ms: 60_000 },
            log: ClassLimit { max: 30, window_ms: 60_000 },
            notify: ClassLimit { max: 5, window_ms: 60_000 },
            alert: ClassLimit { max: 5, window_ms: 60_000 },
        }
    }
}

/// Retention of persisted history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub log_retention_days: u32,
    /// Acknowledged alerts kept this long as history.
    pub alert_history_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            log_retention_days: 7,
            alert_history_days: 30,
        }
    }
}

/// Push transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Consecutive failures before a device is deactivated.
    pub device_failure_threshold: i64,
    /// Path to the FCM service-account JSON key file.
    pub fcm_credentials_path: Option<PathBuf>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            device_failure_threshold: 3,
            fcm_credentials_path: None,
        }
    }
}

/// Credential validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for consumer bearer tokens.
    pub jwt_secret: String,
    /// Accept the legacy prefixed user-token shape alongside the short form.
    pub accept_legacy_tokens: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            accept_legacy_tokens: true,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load configuration: defaults, then the config file (when present),
/// then environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => load_config_file(&p)?,
            _ => RelayConfig::default(),
        },
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Default config file location (`~/.vigil/relay.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".vigil").join("relay.json"))
}

fn load_config_file(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(val) = std::env::var("VIGIL_HEARTBEAT_TIMEOUT_MS") {
        if let Ok(n) = val.parse() {
            config.watchdog.heartbeat_timeout_ms = n;
        }
    }
    if let Ok(val) = std::env::var("VIGIL_RECONNECT_GRACE_MS") {
        if let Ok(n) = val.parse() {
            config.watchdog.reconnect_grace_period_ms = n;
        }
    }
    if let Ok(val) = std::env::var("VIGIL_ALERT_INTERVAL_MS") {
        if let Ok(n) = val.parse() {
            config.alert_loop.interval_ms = n;
        }
    }
    if let Ok(val) = std::env::var("VIGIL_JWT_SECRET") {
        config.auth.jwt_secret = val;
    }
    if let Ok(val) = std::env::var("VIGIL_FCM_CREDENTIALS") {
        config.push.fcm_credentials_path = Some(PathBuf::from(val));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_eq!(config.watchdog.heartbeat_timeout_ms, 30_000);
        assert_eq!(config.watchdog.reconnect_grace_period_ms, 5_000);
        assert_eq!(config.alert_loop.interval_ms, 10_000);
        assert_eq!(config.alert_loop.max_notifications, 30);
        assert_eq!(config.rate_limits.status.max, 6);
        assert_eq!(config.rate_limits.log.max, 30);
        assert_eq!(config.retention.log_retention_days, 7);
        assert_eq!(config.push.device_failure_threshold, 3);
        assert!(config.auth.accept_legacy_tokens);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: RelayConfig =
            serde_json::from_str(r#"{"watchdog": {"heartbeat_timeout_ms": 500, "reconnect_grace_period_ms": 100}}"#)
                .unwrap();
        assert_eq!(parsed.watchdog.heartbeat_timeout_ms, 500);
        assert_eq!(parsed.alert_loop.max_notifications, 30);
    }
}
