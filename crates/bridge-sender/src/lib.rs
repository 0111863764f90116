//! Sender loop: drains the Outbox and delivers jobs to the peer with
//! exponential backoff, gated on the Watchdog's up/down state.

use bridge_config::AppConfig;
use bridge_store::{OutboxJob, Store, StoreError};
use bridge_watchdog::PeerStatus;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of attempting to validate and send one job.
enum Outcome {
    Done,
    Permanent { status: i64, reason: String },
    Retry { status: i64, reason: String },
}

pub struct SenderLoop {
    store: Store,
    client: reqwest::Client,
    watchdog_rx: watch::Receiver<bridge_watchdog::WatchdogState>,
    retry_base_s: f64,
    retry_cap_s: f64,
    outbound_shared_secret: String,
    claim_stale_after_s: i64,
    idle_poll: Duration,
}

impl SenderLoop {
    pub fn new(
        store: Store,
        config: &AppConfig,
        watchdog_rx: watch::Receiver<bridge_watchdog::WatchdogState>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.tls_verify)
            .timeout(Duration::from_secs_f64(config.http_timeout_s))
            .build()
            .expect("failed to build sender http client");

        Self {
            store,
            client,
            watchdog_rx,
            retry_base_s: config.retry_base_s,
            retry_cap_s: config.retry_cap_s,
            outbound_shared_secret: config.outbound_shared_secret.clone(),
            claim_stale_after_s: 60,
            idle_poll: Duration::from_millis(100),
        }
    }

    fn is_peer_up(&self) -> bool {
        self.watchdog_rx.borrow().status == PeerStatus::Up
    }

    /// Validate the job's URL and, if absolute, perform the HTTP request.
    /// Malformed URLs are classified as permanent failures without ever
    /// touching the network.
    async fn send_once(&self, job: &OutboxJob) -> Outcome {
        let url = match Url::parse(&job.url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
            _ => {
                return Outcome::Permanent {
                    status: 0,
                    reason: format!("invalid or non-absolute url: {}", job.url),
                }
            }
        };

        let method = match job.method.to_ascii_uppercase().as_str() {
            "GET" => reqwest::Method::GET,
            "PUT" => reqwest::Method::PUT,
            _ => reqwest::Method::POST,
        };

        let mut request = self.client.request(method, url).body(job.body.clone());
        for (name, value) in &job.headers {
            request = request.header(name, value);
        }
        if !self.outbound_shared_secret.is_empty() {
            request = request.header("X-Shared-Secret", &self.outbound_shared_secret);
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16() as i64;
                if resp.status().is_success() {
                    Outcome::Done
                } else if status == 408 || status == 429 || resp.status().is_server_error() {
                    Outcome::Retry {
                        status,
                        reason: format!("http {status}"),
                    }
                } else {
                    Outcome::Permanent {
                        status,
                        reason: format!("http {status}"),
                    }
                }
            }
            Err(e) => Outcome::Retry {
                status: 0,
                reason: format!("request failed: {e}"),
            },
        }
    }

    fn backoff_delay(&self, retry_count: i64) -> f64 {
        let exp = self.retry_base_s * 2f64.powi((retry_count - 1).max(0) as i32);
        exp.min(self.retry_cap_s)
    }

    /// Process one due job, if any. Returns `true` if a job was found
    /// (whether or not it succeeded), so the caller can decide whether to
    /// keep draining or sleep.
    async fn process_one(&self) -> Result<bool, SenderError> {
        let Some(job) = self.store.outbox_next_due(self.claim_stale_after_s).await? else {
            return Ok(false);
        };

        match self.send_once(&job).await {
            Outcome::Done => {
                metrics::counter!("bridge.outbox.sent_total").increment(1);
                info!(job_id = job.id, correlation_id = %job.correlation_id, "outbox job delivered");
                self.store.outbox_mark_done(job.id).await?;
            }
            Outcome::Permanent { status, reason } => {
                metrics::counter!("bridge.outbox.failed_permanent_total").increment(1);
                warn!(job_id = job.id, status, reason = %reason, "outbox job failed permanently");
                self.store.outbox_mark_permanent(job.id, status, &reason).await?;
            }
            Outcome::Retry { status, reason } => {
                let new_retry_count = job.retry_count + 1;
                let delay = self.backoff_delay(new_retry_count);
                let next_attempt_ts = bridge_common::time::now_ts() + delay.round() as i64;
                metrics::counter!("bridge.outbox.retry_total").increment(1);
                debug!(
                    job_id = job.id,
                    retry_count = new_retry_count,
                    delay_s = delay,
                    status,
                    reason = %reason,
                    "outbox job scheduled for retry"
                );
                self.store
                    .outbox_reschedule(job.id, new_retry_count, next_attempt_ts, status, &reason)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Spawn the sender loop; stops when `shutdown_tx` fires. While the
    /// watchdog reports anything other than `Up`, the loop idles without
    /// touching the network, resuming the moment the peer comes back.
    pub fn spawn(self: Arc<Self>, shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                if !self.is_peer_up() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll) => continue,
                        _ = shutdown_rx.recv() => break,
                    }
                }

                match self.process_one().await {
                    Ok(true) => continue,
                    Ok(false) => {
                        tokio::select! {
                            _ = tokio::time::sleep(self.idle_poll) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "sender loop iteration failed");
                        tokio::time::sleep(self.idle_poll).await;
                    }
                }
            }
            info!("sender loop shutting down");
        })
    }
}
