//! Router loop: drains the Inbox, parses and dispatches each business
//! command, and enqueues the device's reply as an Outbox job bound for the
//! peer's callback endpoint.

use bridge_config::AppConfig;
use bridge_device::AdapterRegistry;
use bridge_parser::{parse_command, split_commands};
use bridge_store::{NewOutboxJob, Store, StoreError};
use bridge_common::RecordState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Probe, in order, the JSON fields `msg`, `line`, `text`, `cmd`; fall back
/// to treating the whole payload as plaintext when it isn't a JSON object
/// carrying any of those fields.
fn extract_command_string(payload: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
        if let Some(obj) = value.as_object() {
            for field in ["msg", "line", "text", "cmd"] {
                if let Some(s) = obj.get(field).and_then(|v| v.as_str()) {
                    return s.to_string();
                }
            }
        }
    }
    String::from_utf8_lossy(payload).to_string()
}

pub struct RouterLoop {
    store: Store,
    adapters: Arc<AdapterRegistry>,
    peer_inbox_url: String,
    claim_stale_after_s: i64,
    idle_poll: Duration,
}

impl RouterLoop {
    pub fn new(store: Store, adapters: Arc<AdapterRegistry>, config: &AppConfig) -> Self {
        Self {
            store,
            adapters,
            peer_inbox_url: format!("{}/api/inbox", config.peer_base_url.trim_end_matches('/')),
            claim_stale_after_s: 60,
            idle_poll: Duration::from_millis(100),
        }
    }

    /// Run every sub-command in `command_string` through the parser and the
    /// appropriate device adapter, collecting one reply line per
    /// sub-command that produced one (a dropped parse failure with no
    /// recoverable key yields none).
    async fn dispatch(&self, command_string: &str) -> Vec<String> {
        let mut replies = Vec::new();
        for raw in split_commands(command_string) {
            match parse_command(&raw) {
                Ok(cmd) => {
                    let adapter = self.adapters.for_channel(cmd.channel);
                    let reply = adapter.execute(&cmd).await;
                    replies.push(reply);
                }
                Err(err) => {
                    if let Some(pkey) = err.pkey {
                        replies.push(format!("{pkey}=NAK_ParseError"));
                    } else {
                        warn!(raw = %raw, "dropping unparseable sub-command, no recoverable key");
                    }
                }
            }
        }
        replies
    }

    fn build_job(&self, correlation_id: &str, reply: &str) -> NewOutboxJob {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("X-Idempotency-Key".to_string(), uuid::Uuid::new_v4().to_string());
        headers.insert("X-Correlation-Id".to_string(), correlation_id.to_string());

        let body = serde_json::json!({ "msg": reply, "source": "raspi" });

        NewOutboxJob {
            method: "POST".to_string(),
            url: self.peer_inbox_url.clone(),
            idempotency_key: headers["X-Idempotency-Key"].clone(),
            correlation_id: correlation_id.to_string(),
            headers,
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    /// Claim and fully process one pending inbox row, if any. Returns
    /// `true` when a row was found (regardless of outcome), so the caller
    /// can keep draining without sleeping.
    async fn process_one(&self) -> Result<bool, RouterError> {
        let Some(row) = self.store.inbox_next_pending(self.claim_stale_after_s).await? else {
            return Ok(false);
        };

        let command_string = extract_command_string(&row.payload);
        let replies = self.dispatch(&command_string).await;

        let mut enqueue_failed = None;
        for reply in &replies {
            let job = self.build_job(&row.idempotency_key, reply);
            if let Err(e) = self.store.outbox_insert(&job).await {
                enqueue_failed = Some(e);
                break;
            }
        }

        match enqueue_failed {
            None => {
                metrics::counter!("bridge.inbox.processed_total").increment(1);
                debug!(
                    inbox_id = row.id,
                    idempotency_key = %row.idempotency_key,
                    replies = replies.len(),
                    "inbox row processed"
                );
                self.store.inbox_mark(row.id, RecordState::Done, "").await?;
            }
            Some(e) => {
                // Atomic-group semantics: if any reply job failed to
                // enqueue, leave the row pending so the whole group is
                // retried from scratch rather than delivering partial replies.
                warn!(inbox_id = row.id, error = %e, "failed to enqueue reply jobs, releasing claim");
                self.store.inbox_release(row.id, &format!("enqueue failed: {e}")).await?;
            }
        }

        Ok(true)
    }

    /// Spawn the router loop; stops when `shutdown_tx` fires.
    pub fn spawn(self: Arc<Self>, shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
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
                        warn!(error = %e, "router loop iteration failed");
                        tokio::time::sleep(self.idle_poll).await;
                    }
                }
            }
            info!("router loop shutting down");
        })
    }
}
