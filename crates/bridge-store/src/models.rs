use bridge_common::{OutboxState, RecordState};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct InboxRecord {
    pub id: i64,
    pub idempotency_key: String,
    pub source: String,
    pub payload: Vec<u8>,
    pub state: RecordState,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub last_error: String,
}

#[derive(Debug, Clone)]
pub struct InsertResult {
    pub stored: bool,
    pub id: i64,
    pub idempotency_key: String,
}

/// A job waiting to be (re)sent to the peer.
#[derive(Debug, Clone)]
pub struct NewOutboxJob {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub idempotency_key: String,
    pub correlation_id: String,
}

#[derive(Debug, Clone)]
pub struct OutboxJob {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub idempotency_key: String,
    pub correlation_id: String,
    pub retry_count: i64,
    pub next_attempt_ts: i64,
    pub state: OutboxState,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub last_status: i64,
    pub last_error: String,
}

#[derive(Debug, Clone, Default)]
pub struct StoreCounts {
    pub inbox_pending: i64,
    pub outbox_pending: i64,
}
