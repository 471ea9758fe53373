#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the relay component stack.
//!
//! Wires the real components (store, push fan-out, rate limiter, alert
//! loop, state machine, watchdog, registry) over an in-memory store and
//! exercises the dead-man's-switch flows end to end, without a network
//! listener.

use std::sync::Arc;

use vigil_relay::auth::token;
use vigil_relay::config::{ClassLimit, RelayConfig};
use vigil_relay::ratelimit::MessageClass;
use vigil_relay::server::{build_state, AppState};
use vigil_relay::storage::{Database, DisconnectReason, HubStatus, NewSession};

/// Build the full component stack over an in-memory store with short,
/// test-friendly timings.
async fn test_state(heartbeat_ms: u64, grace_ms: u64, alert_interval_ms: u64) -> AppState {
    let db = Database::open_in_memory().await.unwrap();

    let mut config = RelayConfig::default();
    config.watchdog.heartbeat_timeout_ms = heartbeat_ms;
    config.watchdog.reconnect_grace_period_ms = grace_ms;
    config.alert_loop.interval_ms = alert_interval_ms;
    config.rate_limits.status = ClassLimit { max: 6, window_ms: 1_000 };
    config.auth.jwt_secret = "integration-test-secret".to_string();

    build_state(config, db).unwrap()
}

/// Seed a user with token `ABC234` and an approved hub.
async fn seed_account(state: &AppState) {
    state
        .db
        .create_user("u1", "alice@example.com", "alice", "hash")
        .await
        .unwrap();
    state
        .db
        .set_user_token(
            "u1",
            &token::credential_digest("ABC234"),
            &token::credential_hint("ABC234"),
        )
        .await
        .unwrap();
    state
        .db
        .create_hub(
            "h1",
            "Hub One",
            "hub-one",
            "owner@example.com",
            "hub_live_testkey",
            &token::credential_digest("hub_live_testkey"),
            "estkey",
        )
        .await
        .unwrap();
    state.db.set_hub_status("h1", HubStatus::Approved).await.unwrap();
}

fn session<'a>(id: &'a str, client_id: &'a str) -> NewSession<'a> {
    NewSession {
        id,
        user_id: "u1",
        hub_id: "h1",
        ws_client_id: client_id,
        game_name: "Grand Quarry",
        place_id: 1,
        job_id: "job-1",
        executor: None,
    }
}

// =========================================================================
// Scenario: clean session lifecycle
// =========================================================================

#[tokio::test]
async fn clean_session_lifecycle() {
    let state = test_state(30_000, 5_000, 10_000).await;
    seed_account(&state).await;

    // Producer authenticates: credentials validate, session created,
    // watchdog armed.
    let principal = state.auth.validate_user_token("ABC234").await.unwrap();
    assert_eq!(principal.user.username, "alice");
    let hub = state.auth.validate_hub_key("hub_live_testkey").await.unwrap();
    assert_eq!(hub.name, "Hub One");

    let created = state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    assert_eq!(created.status, "active");
    state.watchdog.start("c1", "s1", "u1").await;
    assert!(state.watchdog.has_timer("c1").await);

    // Status update lands on the session row
    state.sessions.update_status("c1", "Farming").await;
    let listing = state.db.active_sessions_for_user("u1").await.unwrap();
    assert_eq!(listing[0].current_status, "Farming");

    // Clean disconnect: one-way transition, no timer left behind
    state.watchdog.stop("c1").await;
    let ended = state
        .sessions
        .disconnect_by_client_id("c1", DisconnectReason::Manual, Some("done"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ended.status, "disconnected");
    assert_eq!(ended.disconnect_reason.as_deref(), Some("manual"));
    assert_eq!(state.watchdog.active_timers().await, 0);
}

// =========================================================================
// Scenario: timeout fires the critical alert path
// =========================================================================

#[tokio::test]
async fn timeout_triggers_critical_alert() {
    let state = test_state(500, 50, 10_000).await;
    seed_account(&state).await;

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    state.sessions.update_status("c1", "Farming").await;
    state.watchdog.start("c1", "s1", "u1").await;

    // No heartbeat for longer than the countdown
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;

    let timed_out = state.db.get_session("s1").await.unwrap().unwrap();
    assert_eq!(timed_out.status, "timeout");
    assert_eq!(timed_out.disconnect_reason.as_deref(), Some("timeout"));
    assert_eq!(timed_out.alert_sent, 1);

    // The error-level log record was persisted
    let logs = state.db.logs_for_session("s1", 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, "error");

    // And no timer remains for the dead session
    assert_eq!(state.watchdog.active_timers().await, 0);
}

#[tokio::test]
async fn heartbeat_reset_defers_timeout() {
    let state = test_state(100, 30, 10_000).await;
    seed_account(&state).await;

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    state.watchdog.start("c1", "s1", "u1").await;

    // Keep heartbeating past several would-be deadlines
    for _ in 0..4 {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        state.watchdog.reset("c1").await;
    }
    assert_eq!(state.db.get_session("s1").await.unwrap().unwrap().status, "active");

    // Silence: the countdown finally fires
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(state.db.get_session("s1").await.unwrap().unwrap().status, "timeout");
}

// =========================================================================
// Scenario: life-or-death loop and acknowledgement
// =========================================================================

#[tokio::test]
async fn life_or_death_loop_and_acknowledgement() {
    let state = test_state(500, 50, 40).await;
    seed_account(&state).await;
    state
        .db
        .update_alert_preferences("u1", "siren", false, None, None, true)
        .await
        .unwrap();
    state
        .db
        .upsert_device("d1", "u1", "web-token", "web", None)
        .await
        .unwrap();

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    let outcome = state.sessions.timeout("s1").await;
    assert!(matches!(
        outcome,
        vigil_relay::sessions::TimeoutOutcome::AlertSent { .. }
    ));

    // An ActiveAlert exists with the first delivery counted
    let alert = state.db.unacknowledged_alert_for_user("u1").await.unwrap().unwrap();
    assert_eq!(alert.notifications_sent, 1);
    assert_eq!(alert.session_id, "s1");

    // The repeating loop advances the persisted counter
    tokio::time::sleep(std::time::Duration::from_millis(140)).await;
    let advancing = state.db.get_active_alert(&alert.id).await.unwrap().unwrap();
    assert!(advancing.notifications_sent >= 2);

    // Acknowledge stops the loop for good
    let acked = state.alerts.acknowledge(&alert.id, "u1").await.unwrap();
    assert!(acked.is_acknowledged());
    let frozen = acked.notifications_sent;

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    let after = state.db.get_active_alert(&alert.id).await.unwrap().unwrap();
    assert_eq!(after.notifications_sent, frozen);
    assert_eq!(state.alerts.live_loops().await, 0);

    // Second acknowledgement reports the conflict
    assert!(matches!(
        state.alerts.acknowledge(&alert.id, "u1").await.unwrap_err(),
        vigil_relay::alerts::AlertError::AlreadyAcknowledged
    ));
}

// =========================================================================
// Scenario: quiet hours
// =========================================================================

#[tokio::test]
async fn quiet_hours_suppress_delivery_not_transition() {
    let state = test_state(500, 50, 10_000).await;
    seed_account(&state).await;
    // All-day window keeps the test independent of the wall clock
    state
        .db
        .update_alert_preferences("u1", "default", true, Some("00:00"), Some("23:59"), true)
        .await
        .unwrap();

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    let outcome = state.sessions.timeout("s1").await;
    assert_eq!(outcome, vigil_relay::sessions::TimeoutOutcome::QuietHours);

    let session_row = state.db.get_session("s1").await.unwrap().unwrap();
    assert_eq!(session_row.status, "timeout");
    assert_eq!(session_row.alert_sent, 0);

    // Even with life-or-death enabled, no loop starts during quiet hours
    assert!(state.db.unacknowledged_alert_for_user("u1").await.unwrap().is_none());
}

// =========================================================================
// Scenario: rate limiting
// =========================================================================

#[tokio::test]
async fn seventh_status_in_window_is_limited() {
    let state = test_state(30_000, 5_000, 10_000).await;

    for i in 0..6 {
        assert!(state.ratelimit.allow("c1", MessageClass::Status), "message {i}");
    }
    assert!(!state.ratelimit.allow("c1", MessageClass::Status));

    // A fresh window admits again
    tokio::time::sleep(std::time::Duration::from_millis(1_050)).await;
    assert!(state.ratelimit.allow("c1", MessageClass::Status));
}

// =========================================================================
// Scenario: consumer command authorization
// =========================================================================

#[tokio::test]
async fn command_is_scoped_to_owning_user() {
    let state = test_state(30_000, 5_000, 10_000).await;
    seed_account(&state).await;

    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    state
        .registry
        .register(vigil_relay::registry::ClientInfo::new(
            "p1".to_string(),
            None,
            tx,
        ))
        .await;
    state.registry.set_producer("p1", "u1", "h1", "s1").await;

    // User B probing user A's session reads as not-found
    assert!(state.registry.find_producer_for_session("s1", "user-b").await.is_none());
    assert_eq!(
        state.registry.find_producer_for_session("s1", "u1").await,
        Some("p1".to_string())
    );
}

// =========================================================================
// Scenario: startup reconciliation
// =========================================================================

#[tokio::test]
async fn restart_reconciles_orphaned_sessions() {
    let state = test_state(30_000, 5_000, 10_000).await;
    seed_account(&state).await;

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    let connections_before = state.db.get_hub("h1").await.unwrap().total_connections;

    // Simulated restart against the same store
    vigil_relay::lifecycle::startup(&state).await.unwrap();

    let reconciled = state.db.get_session("s1").await.unwrap().unwrap();
    assert_eq!(reconciled.status, "disconnected");
    assert_eq!(reconciled.disconnect_reason.as_deref(), Some("server-shutdown"));
    assert_eq!(reconciled.disconnect_message.as_deref(), Some("Server restarted"));

    // Hub counters unchanged by reconciliation
    assert_eq!(
        state.db.get_hub("h1").await.unwrap().total_connections,
        connections_before
    );
}

// =========================================================================
// Invariant: token regeneration revokes live sessions
// =========================================================================

#[tokio::test]
async fn token_regeneration_revokes_sessions_before_returning() {
    let state = test_state(30_000, 5_000, 10_000).await;
    seed_account(&state).await;

    state.sessions.create_session(&session("s1", "c1")).await.unwrap();
    state.sessions.create_session(&session("s2", "c2")).await.unwrap();

    let fresh = state.auth.regenerate_user_token("u1").await.unwrap();
    assert!(token::is_short_form(&fresh));

    for id in ["s1", "s2"] {
        let s = state.db.get_session(id).await.unwrap().unwrap();
        assert_eq!(s.status, "disconnected");
        assert_eq!(s.disconnect_reason.as_deref(), Some("token-revoked"));
    }
    assert!(state.auth.validate_user_token("ABC234").await.is_err());
}
