//! Bridge server: wires the Store, Router, Sender, and Watchdog loops
//! together and serves the Ingress API.
//!
//! ## Configuration
//!
//! Loaded via `bridge_config::AppConfig::load()`: a TOML file (searched at
//! `BRIDGE_CONFIG` or a fixed list of standard paths) layered with
//! `BRIDGE_*` environment variable overrides. See `bridge-config` for the
//! full list of recognized settings.

use anyhow::{Context, Result};
use bridge_config::AppConfig;
use bridge_device::AdapterRegistry;
use bridge_ingress::{create_router, AppState};
use bridge_router::RouterLoop;
use bridge_sender::SenderLoop;
use bridge_store::Store;
use bridge_watchdog::Watchdog;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// The Router and Sender loops, running under their own shutdown channel so
/// a config reload can stop and respawn just this pair without touching the
/// Ingress server or the Watchdog. The Store (and therefore the Inbox and
/// Outbox contents) outlives every restart.
struct LoopPair {
    shutdown_tx: broadcast::Sender<()>,
    router_handle: tokio::task::JoinHandle<()>,
    sender_handle: tokio::task::JoinHandle<()>,
}

fn spawn_loop_pair(
    store: &Store,
    config: &AppConfig,
    watchdog_rx: watch::Receiver<bridge_watchdog::WatchdogState>,
) -> LoopPair {
    let adapters = Arc::new(AdapterRegistry::from_config(&config.devices));
    let router_loop = Arc::new(RouterLoop::new(store.clone(), adapters, config));
    let sender_loop = Arc::new(SenderLoop::new(store.clone(), config, watchdog_rx));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let router_handle = router_loop.spawn(shutdown_tx.clone());
    let sender_handle = sender_loop.spawn(shutdown_tx.clone());
    LoopPair {
        shutdown_tx,
        router_handle,
        sender_handle,
    }
}

async fn stop_loop_pair(pair: LoopPair) {
    let _ = pair.shutdown_tx.send(());
    for (name, handle) in [("router", pair.router_handle), ("sender", pair.sender_handle)] {
        if tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!(loop_name = name, "loop did not stop within shutdown timeout");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    bridge_common::logging::init_logging("bridge-server");

    let config = AppConfig::load().context("failed to load configuration")?;
    info!(?config, "starting bridge server");

    let db_path = format!("{}/bridge.sqlite3", config.data_dir.trim_end_matches('/'));
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let store = Store::connect(&db_path).await.context("failed to open store")?;

    let (watchdog, watchdog_rx) = Watchdog::new(&config);
    let (top_shutdown_tx, _) = broadcast::channel::<()>(1);
    let watchdog_handle = watchdog.spawn(top_shutdown_tx.clone());

    let mut loops = spawn_loop_pair(&store, &config, watchdog_rx.clone());

    let ingress_state = AppState {
        store: store.clone(),
        shared_secret: config.shared_secret.clone(),
    };
    let app = create_router(ingress_state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind ingress listener on {addr}"))?;
    info!(%addr, "ingress API listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "ingress server terminated");
        }
    });

    info!("bridge server started, press Ctrl+C to shut down; send SIGHUP to reload config");

    #[cfg(unix)]
    let mut reload_signal = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("failed to install SIGHUP handler")?;

    loop {
        #[cfg(unix)]
        let reload_fired = reload_signal.recv();
        #[cfg(not(unix))]
        let reload_fired = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = reload_fired => {
                info!("SIGHUP received, reloading configuration");
                match AppConfig::load() {
                    Ok(new_config) => {
                        info!(?new_config, "restarting router/sender loops with reloaded configuration");
                        let old = std::mem::replace(
                            &mut loops,
                            spawn_loop_pair(&store, &new_config, watchdog_rx.clone()),
                        );
                        stop_loop_pair(old).await;
                        info!("router/sender loops restarted, queue contents preserved");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to reload configuration, keeping current loops running");
                    }
                }
            }
            _ = shutdown_signal() => {
                break;
            }
        }
    }

    info!("shutdown signal received, draining loops");

    server_task.abort();
    stop_loop_pair(loops).await;

    let _ = top_shutdown_tx.send(());
    if tokio::time::timeout(Duration::from_secs(10), watchdog_handle)
        .await
        .is_err()
    {
        warn!(loop_name = "watchdog", "loop did not stop within shutdown timeout");
    }

    info!("bridge server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
