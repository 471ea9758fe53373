//! Vigil Relay Server
//!
//! Dead-man's-switch session controller: relays status, logs, and alerts
//! between script producers and observer consumers, and fires escalating
//! critical pushes when a producer's heartbeats stop.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use vigil_relay::config;
use vigil_relay::lifecycle;
use vigil_relay::server;
use vigil_relay::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "vigil-relay")]
#[command(
    version,
    about = "vigil relay server - session watchdog and alert fan-out"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8420")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    vigil_core::tracing_init::init_tracing("vigil_relay=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting vigil-relay"
    );

    let config = config::load_config(args.config.as_deref())?;

    let db_path = match &args.db_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening relay database");
    let db = Database::open(&db_path).await?;

    let state = server::build_state(config, db.clone())?;

    // Recovery runs before the listener binds: no socket may be accepted
    // while orphaned sessions still read as active.
    lifecycle::startup(&state).await?;
    let sweeper = lifecycle::spawn_retention_sweeper(state.clone());

    let app = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Relay server ready");

    let shutdown_state = state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        lifecycle::shutdown(&shutdown_state).await;
    })
    .await?;

    sweeper.abort();
    db.close().await;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received interrupt"),
        () = terminate => info!("Received terminate signal"),
    }
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".vigil").join("relay.db"))
}
