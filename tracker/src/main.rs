use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracker::api;
use tracker::bandwidth::{BandwidthService, CollectionScheduler};
use tracker::config::TrackerConfig;

#[derive(Parser, Debug)]
#[command(name = "vpn-tracker")]
#[command(about = "VPN bandwidth tracker for OpenVPN and IPSec", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "tracker.toml")]
    config: String,

    /// API listen address
    #[arg(long, env = "TRACKER_API_ADDR")]
    api_addr: Option<String>,

    /// Root directory for persisted state
    #[arg(long, env = "TRACKER_STORAGE_PATH")]
    storage_path: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "TRACKER_LOG_LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = TrackerConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    // Override with command line arguments
    if let Some(api_addr) = args.api_addr {
        cfg.api_addr = api_addr;
    }
    if let Some(storage_path) = args.storage_path {
        cfg.storage_path = storage_path;
    }
    if let Some(log_level) = args.log_level {
        cfg.log_level = log_level;
    }
    cfg.validate()?;

    let _guard = common::init_tracing(cfg.log_dir.as_deref(), &cfg.log_file, &cfg.log_level);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(threads) = cfg.runtime_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(cfg))
}

async fn run(cfg: TrackerConfig) -> Result<()> {
    info!("Starting VPN bandwidth tracker");
    info!("API address: {}", cfg.api_addr);
    info!("Storage path: {}", cfg.storage_path);
    info!("OpenVPN status log: {}", cfg.bandwidth.openvpn_status_path);
    info!("IPSec container: {}", cfg.bandwidth.ipsec_container);
    if let Some(threads) = cfg.runtime_threads {
        info!("Runtime threads: {}", threads);
    } else {
        info!("Runtime threads: default (CPU cores)");
    }

    let storage_dir = cfg.bandwidth_storage_dir();
    tokio::fs::create_dir_all(&storage_dir)
        .await
        .with_context(|| format!("Failed to create storage directory {}", storage_dir.display()))?;

    // Loading may sleep between lock retries.
    let service = {
        let cfg = cfg.clone();
        Arc::new(tokio::task::spawn_blocking(move || BandwidthService::from_config(&cfg)).await?)
    };
    let scheduler = CollectionScheduler::start(service.clone(), cfg.bandwidth.collection_interval());

    let shutdown = CancellationToken::new();
    let mut api_server = {
        let service = service.clone();
        let addr = cfg.api_addr.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(addr, service, shutdown).await {
                error!("API server error: {}", e);
            }
        })
    };

    info!("Tracker started successfully");

    let api_finished = tokio::select! {
        _ = &mut api_server => {
            error!("API server stopped");
            true
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
    };

    info!("Shutting down tracker");
    shutdown.cancel();
    scheduler.stop().await;
    if !api_finished {
        if let Err(e) = api_server.await {
            error!("API server task failed: {}", e);
        }
    }

    info!("Tracker stopped");
    Ok(())
}
