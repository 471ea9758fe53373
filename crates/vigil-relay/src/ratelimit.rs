//! Per-(client, message-class) rate limiting.
//!
//! Fixed-window counting: each `(client, class)` pair gets a counter that
//! resets when its window elapses. The check is a pure in-memory decision
//! and never blocks; heartbeat and disconnect frames are unrated and never
//! pass through here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::{ClassLimit, RateLimitConfig};

/// Rated message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Status,
    Log,
    Notify,
    Alert,
}

impl MessageClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Log => "log",
            Self::Notify => "notify",
            Self::Alert => "alert",
        }
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window limiter keyed by `(client id, message class)`.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, MessageClass), Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    const fn limit_for(&self, class: MessageClass) -> ClassLimit {
        match class {
            MessageClass::Status => self.config.status,
            MessageClass::Log => self.config.log,
            MessageClass::Notify => self.config.notify,
            MessageClass::Alert => self.config.alert,
        }
    }

    /// Whether one more `class` message from `client_id` is allowed now.
    pub fn allow(&self, client_id: &str, class: MessageClass) -> bool {
        let limit = self.limit_for(class);
        let window_len = std::time::Duration::from_millis(limit.window_ms);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows
            .entry((client_id.to_string(), class))
            .or_insert(Window { count: 0, started: now });

        if now.duration_since(window.started) >= window_len {
            window.count = 0;
            window.started = now;
        }

        if window.count >= limit.max {
            return false;
        }

        window.count += 1;
        true
    }

    /// Drop all windows belonging to a client. Called on socket close so
    /// the map stays bounded by the number of live sockets.
    pub fn forget_client(&self, client_id: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|(id, _), _| id != client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_limiter() -> RateLimiter {
        let mut config = RateLimitConfig::default();
        config.status = ClassLimit { max: 2, window_ms: 40 };
        RateLimiter::new(config)
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = tight_limiter();
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(!limiter.allow("c1", MessageClass::Status));
    }

    #[test]
    fn classes_are_independent() {
        let limiter = tight_limiter();
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(!limiter.allow("c1", MessageClass::Status));
        // Log window untouched by the exhausted status window
        assert!(limiter.allow("c1", MessageClass::Log));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = tight_limiter();
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(!limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c2", MessageClass::Status));
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = tight_limiter();
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(!limiter.allow("c1", MessageClass::Status));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(limiter.allow("c1", MessageClass::Status));
    }

    #[test]
    fn forget_client_clears_windows() {
        let limiter = tight_limiter();
        assert!(limiter.allow("c1", MessageClass::Status));
        assert!(limiter.allow("c1", MessageClass::Status));
        limiter.forget_client("c1");
        assert!(limiter.allow("c1", MessageClass::Status));
    }

    #[test]
    fn spec_defaults_allow_six_status_per_minute() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..6 {
            assert!(limiter.allow("c1", MessageClass::Status));
        }
        assert!(!limiter.allow("c1", MessageClass::Status));
    }
}
