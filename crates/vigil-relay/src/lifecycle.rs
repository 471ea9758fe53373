//! Boot recovery and graceful shutdown.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use vigil_core::db::unix_timestamp;

use crate::server::AppState;
use crate::storage::DisconnectReason;

/// Interval between retention sweeps.
const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Boot recovery, run before the listener binds: orphaned `active`
/// sessions become `disconnected(server-shutdown)` and live alert loops
/// are rehydrated from the store.
pub async fn startup(state: &AppState) -> anyhow::Result<()> {
    let reconciled = state.sessions.reconcile_startup().await?;
    let restored = state.alerts.restore().await?;
    info!(reconciled, restored, "Boot recovery complete");
    Ok(())
}

/// Background sweeper pruning aged session logs and acknowledged-alert
/// history.
pub fn spawn_retention_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;

            let log_cutoff =
                unix_timestamp() - i64::from(state.config.retention.log_retention_days) * 86_400;
            match state.logs.prune_before(log_cutoff).await {
                Ok(removed) if removed > 0 => info!(removed, "Pruned aged session logs"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Log retention sweep failed"),
            }

            let alert_cutoff =
                unix_timestamp() - i64::from(state.config.retention.alert_history_days) * 86_400;
            match state.db.prune_acknowledged_alerts_before(alert_cutoff).await {
                Ok(removed) if removed > 0 => info!(removed, "Pruned acknowledged alert history"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Alert retention sweep failed"),
            }
        }
    })
}

/// Graceful shutdown: live producer sessions transition to
/// `disconnected(server-shutdown)`, timers are cancelled, sockets close.
/// The store flush happens when the caller closes the pool.
pub async fn shutdown(state: &AppState) {
    info!("Shutting down relay");

    for producer in state.registry.producers().await {
        if let Err(e) = state
            .sessions
            .disconnect_by_client_id(
                &producer.client_id,
                DisconnectReason::ServerShutdown,
                Some("Server shutting down"),
            )
            .await
        {
            warn!(client_id = %producer.client_id, error = %e, "Shutdown disconnect failed");
        }
    }

    state.watchdog.clear().await;
    state.alerts.shutdown().await;

    // Dropping every registry entry closes each socket's outbound queue;
    // writer tasks flush and send the 1001 close frame.
    state.registry.close_all().await;
}
