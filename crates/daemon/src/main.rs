#![forbid(unsafe_code)]

//! Outing daemon: owns the sqlite store and serves the approval workflow.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use outing_core::OutingWorkflow;
use outing_daemon::{config::DaemonConfig, http};
use outing_storage_sqlite::SqliteStore;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "outing-daemon", version, about = "Hostel outing approval daemon")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// SQLite database file.
    #[arg(long, default_value = ".outing/outing.db")]
    db_path: PathBuf,

    /// HMAC key used to sign gate codes.
    #[arg(long, env = "OUTING_QR_SECRET", hide_env_values = true)]
    qr_secret: String,

    /// Reload attempts for a mutation that loses a concurrent update.
    #[arg(long, default_value_t = 5)]
    cas_max_attempts: u32,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig {
        listen: args.listen,
        db_path: args.db_path,
        qr_secret: args.qr_secret,
        cas_max_attempts: args.cas_max_attempts,
    };
    info!("starting daemon with config: {:?}", config);

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let workflow = OutingWorkflow::new(store.clone(), store, config.workflow());

    let app = http::router(http::AppState::new(workflow))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(listen = %config.listen, "daemon listening");
    axum::serve(tokio::net::TcpListener::bind(config.listen).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
