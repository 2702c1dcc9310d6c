//! Zenoh bridge for WARP wallboxes.
//!
//! Polls the charger's HTTP status API and publishes the mapped
//! properties to Zenoh.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use zenoh_bridge_warp::{BridgeArgs, BridgeService, DeviceClient, WarpBridgeConfig, ZenohBus};

const WRITE_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();

    let config = WarpBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config.logging.with_level_override(args.log_level.as_deref());
    warp_bridge_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting zenoh-bridge-warp");
    info!("Loaded configuration from {:?}", args.config);

    let session = Arc::new(
        warp_bridge_common::connect(&config.zenoh)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?,
    );
    info!(zid = %session.zid(), "Connected to Zenoh");

    let warp = config.warp;
    let device = Arc::new(
        DeviceClient::new(&warp.host, warp.request_timeout())
            .context("Failed to create HTTP client")?,
    );
    let bus = Arc::new(ZenohBus::new(
        session.clone(),
        warp.device_key_prefix(),
        warp.format,
    ));

    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
    let listener = bus
        .listen_for_writes(write_tx)
        .await
        .context("Failed to subscribe to write requests")?;

    let bridge = BridgeService::new(warp, device, bus)
        .start()
        .await
        .context("Failed to start bridge")?;

    info!(
        service = %bridge.service_name(),
        device = %bridge.identity().name,
        "WARP bridge running"
    );

    bridge
        .run(write_rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await
        .context("Failed to shut down cleanly")?;

    listener.abort();

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("WARP bridge stopped");

    Ok(())
}
