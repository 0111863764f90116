//! Durable Inbox/Outbox store backed by SQLite.

mod error;
mod inbox;
mod models;
mod outbox;
mod store;

pub use error::{Result, StoreError};
pub use models::{InboxRecord, InsertResult, NewOutboxJob, OutboxJob, StoreCounts};
pub use store::Store;
