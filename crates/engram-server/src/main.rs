//! Engram server - event stream and JSON adapters for the memory engine
//!
//! Boots the engine, starts the background worker, and serves the
//! WebSocket event stream plus a small JSON surface. Shutdown is
//! graceful: the worker finishes its in-flight tick, the WAL is
//! checkpointed, and the lock file is removed, all inside a hard
//! deadline.

mod routes;
mod state;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engram_core::{EngineConfig, MemoryEngine};

use crate::state::AppState;

/// Hard deadline for graceful shutdown
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "engram-server", version, about = "Memory engine event stream and API")]
struct Args {
    /// Database file; defaults to the platform data directory
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Project scope; derived from the working directory when omitted
    #[arg(long)]
    project: Option<String>,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:7491")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = EngineConfig {
        db_path: args.db_path,
        project: args.project,
        ..Default::default()
    };
    let engine = MemoryEngine::open(config).context("failed to open the memory engine")?;
    engine.start_worker();

    let state = AppState::new(engine.clone());
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("Listening on {}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down");
    match tokio::time::timeout(SHUTDOWN_DEADLINE, engine.shutdown()).await {
        Ok(()) => info!("Shutdown complete"),
        Err(_) => {
            warn!("Shutdown deadline exceeded, exiting anyway");
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install SIGINT handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
