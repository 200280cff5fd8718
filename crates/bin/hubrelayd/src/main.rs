//! # hubrelayd — hub relay daemon
//!
//! Composition root that wires all adapters together and runs the bridge.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Initialize logging
//! - Open the `SQLite` settings database and run migrations
//! - Construct the hub, settings store and relay transport (adapters)
//! - Start the bridge and keep it running until Ctrl-C
//! - Request a device sync from the relay on `SIGUSR1` (Unix)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use hubrelay_adapter_relay_ws::WsRelayConnector;
use hubrelay_adapter_storage_sqlite_sqlx::{Config as StorageConfig, SqliteSettingsStore};
use hubrelay_adapter_virtual::VirtualHub;
use hubrelay_app::bridge::Bridge;
use hubrelay_app::realtime_bus::{InProcessRealtimeBus, RealtimeSignal};

use crate::config::Config;

type Daemon = Bridge<WsRelayConnector, VirtualHub, SqliteSettingsStore, Arc<InProcessRealtimeBus>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let filter = EnvFilter::try_new(&config.logging.filter).context("invalid logging filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Settings
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await
    .context("failed to open settings database")?;
    let store = SqliteSettingsStore::new(db.pool().clone());

    // Hub + realtime signals
    let hub = Arc::new(VirtualHub::new(config.hub_info())?);
    let realtime = Arc::new(InProcessRealtimeBus::new(64));
    let signals = tokio::spawn(log_signals(realtime.subscribe()));

    let bridge = Bridge::new(
        hub,
        store,
        realtime,
        WsRelayConnector,
        config.bridge_config(),
    );
    let startup = bridge.start().await?;
    tracing::info!(
        relay = %config.relay.url,
        session = startup.session,
        listeners = startup.registration.map_or(0, |report| report.installed),
        "hubrelayd running"
    );

    serve(&bridge).await?;
    tracing::info!("shutdown requested");
    bridge.shutdown();
    signals.abort();
    Ok(())
}

/// Run until Ctrl-C, requesting a device sync on every `SIGUSR1`.
#[cfg(unix)]
async fn serve(bridge: &Daemon) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sync_requests =
        signal(SignalKind::user_defined1()).context("failed to listen for SIGUSR1")?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                return result.context("failed to listen for shutdown signal");
            }
            Some(()) = sync_requests.recv() => {
                tracing::info!("device sync requested");
                tokio::spawn(bridge.request_device_sync());
            }
        }
    }
}

#[cfg(not(unix))]
async fn serve(_bridge: &Daemon) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")
}

async fn log_signals(mut signals: broadcast::Receiver<RealtimeSignal>) {
    loop {
        match signals.recv().await {
            Ok(signal) => {
                tracing::debug!(
                    event = %signal.event,
                    payload = %signal.payload,
                    "realtime signal"
                );
            }
            Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "realtime signal log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
