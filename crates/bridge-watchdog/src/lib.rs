//! Watchdog: periodically probes the peer and publishes an up/down/unknown
//! state that gates the sender loop.

use bridge_config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogState {
    pub status: PeerStatus,
    pub since_ts: i64,
    pub last_probe_ts: i64,
    pub consecutive_failures: u32,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            status: PeerStatus::Unknown,
            since_ts: bridge_common::time::now_ts(),
            last_probe_ts: 0,
            consecutive_failures: 0,
        }
    }
}

pub struct Watchdog {
    peer_base_url: String,
    peer_health_path: String,
    peer_watchdog_host: String,
    timeout: Duration,
    interval: Duration,
    down_after: u32,
    client: reqwest::Client,
    state_tx: watch::Sender<WatchdogState>,
}

impl Watchdog {
    pub fn new(config: &AppConfig) -> (Arc<Self>, watch::Receiver<WatchdogState>) {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.tls_verify)
            .timeout(Duration::from_secs_f64(config.watchdog.timeout_s))
            .build()
            .expect("failed to build watchdog http client");

        let (state_tx, state_rx) = watch::channel(WatchdogState::default());

        let watchdog = Arc::new(Self {
            peer_base_url: config.peer_base_url.clone(),
            peer_health_path: config.peer_health_path.clone(),
            peer_watchdog_host: config.peer_watchdog_host.clone(),
            timeout: Duration::from_secs_f64(config.watchdog.timeout_s),
            interval: Duration::from_secs_f64(config.watchdog.interval_s),
            down_after: config.watchdog.down_after,
            client,
            state_tx,
        });
        (watchdog, state_rx)
    }

    async fn tcp_check(&self) -> Option<bool> {
        if self.peer_watchdog_host.is_empty() {
            return None;
        }
        let addr = if self.peer_watchdog_host.contains(':') {
            self.peer_watchdog_host.clone()
        } else {
            format!("{}:80", self.peer_watchdog_host)
        };
        let result = tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await;
        Some(matches!(result, Ok(Ok(_))))
    }

    async fn http_check(&self) -> Option<bool> {
        if self.peer_base_url.is_empty() {
            return None;
        }
        let url = format!("{}{}", self.peer_base_url, self.peer_health_path);
        match self.client.get(&url).send().await {
            Ok(resp) => Some(resp.status().is_success()),
            Err(e) => {
                debug!(error = %e, url = %url, "watchdog http probe failed");
                Some(false)
            }
        }
    }

    /// Run one probe round. A probe passes if at least one configured check
    /// succeeds; with nothing configured the probe trivially passes, since
    /// there is nothing to be down against.
    pub async fn probe_once(&self) -> bool {
        let tcp = self.tcp_check().await;
        let http = self.http_check().await;
        match (tcp, http) {
            (None, None) => true,
            (Some(t), None) => t,
            (None, Some(h)) => h,
            (Some(t), Some(h)) => t || h,
        }
    }

    fn apply_probe_result(&self, passed: bool) {
        let now = bridge_common::time::now_ts();
        self.state_tx.send_modify(|state| {
            state.last_probe_ts = now;
            if passed {
                if state.status != PeerStatus::Up {
                    state.since_ts = now;
                    info!("watchdog: peer is up");
                }
                state.status = PeerStatus::Up;
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.down_after && state.status != PeerStatus::Down {
                    state.since_ts = now;
                    state.status = PeerStatus::Down;
                    warn!(
                        consecutive_failures = state.consecutive_failures,
                        "watchdog: peer is down"
                    );
                }
            }
        });
        let gauge_value = match self.state_tx.borrow().status {
            PeerStatus::Down => 0.0,
            PeerStatus::Unknown => 0.5,
            PeerStatus::Up => 1.0,
        };
        metrics::gauge!("bridge.watchdog.state").set(gauge_value);
    }

    /// Spawn the periodic probe loop; stops when `shutdown_tx` fires.
    pub fn spawn(self: Arc<Self>, shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let passed = self.probe_once().await;
                        self.apply_probe_result(passed);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("watchdog shutting down");
                        break;
                    }
                }
            }
        })
    }
}
