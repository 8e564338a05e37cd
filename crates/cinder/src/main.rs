//! Cinder Daemon
//!
//! Standalone daemon running the script engine against a local directory.
//! Without a hub attached the bus is a stub: scripts still execute on
//! whatever events other components push through the engine, but commands
//! fail as unroutable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinder::bus::NullBus;
use cinder::config::FileConfigStore;
use cinder::engine::{EngineConfig, ScriptEngine, ScriptWatcher};

/// Cinder Script Engine Daemon
#[derive(Parser, Debug)]
#[command(name = "cinderd")]
#[command(about = "Event-driven script engine", long_about = None)]
struct Args {
    /// Directory holding the user scripts
    #[arg(short, long, default_value = "./scripts")]
    scripts: PathBuf,

    /// Path to the persisted engine configuration
    #[arg(short, long, default_value = "./cinder.conf.json")]
    config: PathBuf,

    /// Don't start the directory watcher
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cinder=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting cinderd v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(FileConfigStore::open(&args.config)?);
    let engine = ScriptEngine::new(EngineConfig::new(&args.scripts), Arc::new(NullBus), store);
    engine.start()?;

    if !args.no_watch {
        match ScriptWatcher::new(Arc::clone(&engine)) {
            Ok(watcher) => {
                tokio::spawn(watcher.run());
                info!("script watcher started");
            }
            Err(e) => {
                error!(error = %e, "failed to start script watcher");
            }
        }
    }

    shutdown_signal().await;
    info!("shutting down...");
    engine.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Wait for a termination signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
