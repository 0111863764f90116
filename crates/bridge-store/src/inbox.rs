use crate::error::{Result, StoreError};
use crate::models::{InboxRecord, InsertResult};
use crate::store::Store;
use bridge_common::{time::now_ts, RecordState};
use sqlx::Row;

fn parse_record_state(s: &str) -> RecordState {
    match s {
        "done" => RecordState::Done,
        "failed" => RecordState::Failed,
        _ => RecordState::Pending,
    }
}

fn row_to_inbox(row: sqlx::sqlite::SqliteRow) -> InboxRecord {
    InboxRecord {
        id: row.get("id"),
        idempotency_key: row.get("idempotency_key"),
        source: row.get("source"),
        payload: row.get("payload"),
        state: parse_record_state(row.get::<String, _>("state").as_str()),
        created_ts: row.get("created_ts"),
        updated_ts: row.get("updated_ts"),
        last_error: row.get("last_error"),
    }
}

impl Store {
    /// Accept an inbound message. A repeated non-empty `idempotency_key`
    /// is a no-op that returns the original row id with `stored: false`.
    pub async fn inbox_insert(&self, key: &str, source: &str, payload: &[u8]) -> Result<InsertResult> {
        let now = now_ts();

        if !key.is_empty() {
            if let Some(existing_id) = self.find_inbox_by_key(key).await? {
                return Ok(InsertResult {
                    stored: false,
                    id: existing_id,
                    idempotency_key: key.to_string(),
                });
            }
        }

        let insert = sqlx::query(
            "INSERT INTO inbox (idempotency_key, source, payload, state, created_ts, updated_ts) \
             VALUES (?, ?, ?, 'pending', ?, ?)",
        )
        .bind(key)
        .bind(source)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(result) => Ok(InsertResult {
                stored: true,
                id: result.last_insert_rowid(),
                idempotency_key: key.to_string(),
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() && !key.is_empty() => {
                // Lost a race against a concurrent insert of the same key.
                let existing_id = self
                    .find_inbox_by_key(key)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                Ok(InsertResult {
                    stored: false,
                    id: existing_id,
                    idempotency_key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_inbox_by_key(&self, key: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM inbox WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Fetch an inbox row by its idempotency key, for diagnostics and
    /// tests. Empty keys never dedupe, so this only makes sense for
    /// non-empty keys.
    pub async fn inbox_find_by_key(&self, key: &str) -> Result<Option<InboxRecord>> {
        let row = sqlx::query("SELECT * FROM inbox WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_inbox))
    }

    /// Atomically claim the oldest pending inbox row. `stale_after_s` lets a
    /// previously-claimed-but-never-finished row (the owning process died)
    /// be reclaimed after it goes stale.
    pub async fn inbox_next_pending(&self, stale_after_s: i64) -> Result<Option<InboxRecord>> {
        let now = now_ts();
        let stale_before = now - stale_after_s;

        loop {
            let candidate: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM inbox WHERE state = 'pending' AND (claimed_at IS NULL OR claimed_at < ?) \
                 ORDER BY created_ts ASC, id ASC LIMIT 1",
            )
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE inbox SET claimed_at = ? WHERE id = ? AND state = 'pending' \
                 AND (claimed_at IS NULL OR claimed_at < ?)",
            )
            .bind(now)
            .bind(id)
            .bind(stale_before)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 0 {
                // another worker claimed it first; try the next candidate
                continue;
            }

            let row = sqlx::query("SELECT * FROM inbox WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            return Ok(Some(row_to_inbox(row)));
        }
    }

    /// Terminate an inbox row. Releases the claim.
    pub async fn inbox_mark(&self, id: i64, state: RecordState, last_error: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE inbox SET state = ?, last_error = ?, updated_ts = ?, claimed_at = NULL WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(last_error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Release a claim without changing state, so the row becomes
    /// immediately eligible again (used on a processing failure that should
    /// retry rather than terminate).
    pub async fn inbox_release(&self, id: i64, last_error: &str) -> Result<()> {
        sqlx::query("UPDATE inbox SET claimed_at = NULL, last_error = ? WHERE id = ?")
            .bind(last_error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
