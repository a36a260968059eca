use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber;

use floodgate::config::FloodgateConfig;
use floodgate::ratelimit::{BucketGcFilter, RateLimitHandler};
use floodgate::server::RespServer;
use floodgate::storage::MemoryStore;

/// Floodgate - persistent token bucket rate limiting service
#[derive(Parser, Debug)]
#[command(name = "floodgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the service configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// RESP listener address
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Snapshot file path (enables durability across restarts)
    #[arg(long = "snapshot")]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Floodgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let mut config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    if let Some(addr) = &args.addr {
        config.server.listen_addr = addr.parse()?;
    }
    if let Some(path) = &args.snapshot {
        config.storage.snapshot_path = Some(path.display().to_string());
    }

    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // The GC filter is registered at store construction, before any traffic
    let store = Arc::new(MemoryStore::with_compaction_filter(Box::new(
        BucketGcFilter,
    )));
    let snapshot_path = config.storage.snapshot_path.clone().map(PathBuf::from);
    if let Some(path) = &snapshot_path {
        match store.load_snapshot(path) {
            Ok(entries) => info!(path = %path.display(), entries, "Snapshot loaded"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load snapshot, starting empty")
            }
        }
    }

    let handler = Arc::new(RateLimitHandler::new(Arc::clone(&store)));

    spawn_compaction_sweeper(
        Arc::clone(&store),
        config.storage.compaction_interval_secs,
    );
    if let Some(path) = snapshot_path.clone() {
        spawn_snapshot_writer(
            Arc::clone(&store),
            path,
            config.storage.snapshot_interval_secs,
        );
    }

    let server = RespServer::new(config.server.listen_addr, handler);
    server.serve_with_shutdown(shutdown_signal()).await?;

    // Final snapshot so a clean shutdown loses nothing
    if let Some(path) = &snapshot_path {
        if let Err(e) = store.save_snapshot(path) {
            warn!(path = %path.display(), error = %e, "Final snapshot failed");
        }
    }

    info!("Floodgate Rate Limiting Service stopped");
    Ok(())
}

/// Periodically apply the compaction filter to reclaim idle buckets.
fn spawn_compaction_sweeper(store: Arc<MemoryStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.compact();
            if evicted > 0 {
                info!(evicted, "Compaction sweep reclaimed idle buckets");
            }
        }
    });
}

/// Periodically persist the store to its snapshot file.
fn spawn_snapshot_writer(store: Arc<MemoryStore>, path: PathBuf, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; there is nothing to save yet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.save_snapshot(&path) {
                warn!(path = %path.display(), error = %e, "Snapshot write failed");
            }
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
