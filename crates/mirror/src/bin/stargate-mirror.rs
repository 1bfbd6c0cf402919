//! Stargate Mirror Binary
//!
//! Long-running daemon: publisher and subscriber loops over one IPFS
//! daemon, stopped together on Ctrl-C.

use std::process;
use std::sync::Arc;

use tracing::{error, info};

use stargate_mirror::config::MirrorConfig;
use stargate_mirror::ipfs::{HttpIpfsClient, IpfsApi};
use stargate_mirror::publisher::Publisher;
use stargate_mirror::scanner::SyncState;
use stargate_mirror::subscriber::Subscriber;

#[tokio::main]
async fn main() {
    // Initialize structured logging (reads RUST_LOG and LOG_FORMAT env vars)
    stargate_mirror::telemetry::init();

    info!("Starting Stargate Mirror");

    let config = match MirrorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if !config.ipfs_mirror_enabled {
        info!("Mirror is disabled (IPFS_MIRROR_ENABLED=false), exiting");
        return;
    }

    let ipfs: Arc<dyn IpfsApi> = Arc::new(HttpIpfsClient::new(
        config.ipfs_api_url.clone(),
        config.http_timeout(),
    ));
    let peer_id = match ipfs.id().await {
        Ok(peer_id) => peer_id,
        Err(e) => {
            error!("Failed to reach IPFS daemon at {}: {}", config.ipfs_api_url, e);
            process::exit(1);
        }
    };
    info!("Connected to IPFS daemon as {}", peer_id);

    let state = Arc::new(SyncState::new());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    if config.ipfs_mirror_upload_enabled {
        let publisher = Publisher::new(
            config.clone(),
            ipfs.clone(),
            state.clone(),
            peer_id.clone(),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            publisher.run(shutdown).await;
        }));
    }
    if config.ipfs_mirror_download_enabled {
        let subscriber = Subscriber::new(config.clone(), ipfs.clone(), state.clone(), peer_id);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            subscriber.run(shutdown).await;
        }));
    }
    if handles.is_empty() {
        info!("Both mirror directions disabled, exiting");
        return;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down mirror");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
}
