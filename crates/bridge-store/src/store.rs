use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) a SQLite database at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(path))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_key TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL DEFAULT '',
                payload BLOB NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                claimed_at INTEGER,
                created_ts INTEGER NOT NULL,
                updated_ts INTEGER NOT NULL,
                last_error TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_inbox_key ON inbox(idempotency_key) WHERE idempotency_key != ''",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_inbox_state ON inbox(state, created_ts, id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                idempotency_key TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_attempt_ts INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                claimed_at INTEGER,
                created_ts INTEGER NOT NULL,
                updated_ts INTEGER NOT NULL,
                last_status INTEGER NOT NULL DEFAULT 0,
                last_error TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_due ON outbox(state, next_attempt_ts, retry_count, created_ts, id)",
        )
        .execute(&self.pool)
        .await?;

        info!("store schema ready");
        Ok(())
    }

    pub async fn counts(&self) -> Result<crate::models::StoreCounts> {
        let inbox_pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbox WHERE state = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        let outbox_pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE state = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        Ok(crate::models::StoreCounts {
            inbox_pending,
            outbox_pending,
        })
    }
}
