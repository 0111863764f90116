use crate::error::Result;
use crate::models::{NewOutboxJob, OutboxJob};
use crate::store::Store;
use bridge_common::{time::now_ts, OutboxState};
use sqlx::Row;
use std::collections::HashMap;

fn row_to_outbox(row: sqlx::sqlite::SqliteRow) -> OutboxJob {
    let headers_json: String = row.get("headers");
    let headers: HashMap<String, String> = serde_json::from_str(&headers_json).unwrap_or_default();
    OutboxJob {
        id: row.get("id"),
        method: row.get("method"),
        url: row.get("url"),
        headers,
        body: row.get("body"),
        idempotency_key: row.get("idempotency_key"),
        correlation_id: row.get("correlation_id"),
        retry_count: row.get("retry_count"),
        next_attempt_ts: row.get("next_attempt_ts"),
        state: OutboxState::from_str(row.get::<String, _>("state").as_str()).unwrap_or(OutboxState::Pending),
        created_ts: row.get("created_ts"),
        updated_ts: row.get("updated_ts"),
        last_status: row.get("last_status"),
        last_error: row.get("last_error"),
    }
}

impl Store {
    /// Enqueue a new outbound job, due immediately.
    pub async fn outbox_insert(&self, job: &NewOutboxJob) -> Result<i64> {
        let now = now_ts();
        let headers_json = serde_json::to_string(&job.headers).unwrap_or_default();
        let result = sqlx::query(
            "INSERT INTO outbox (method, url, headers, body, idempotency_key, correlation_id, \
             retry_count, next_attempt_ts, state, created_ts, updated_ts, last_status, last_error) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, 'pending', ?, ?, 0, '')",
        )
        .bind(&job.method)
        .bind(&job.url)
        .bind(headers_json)
        .bind(&job.body)
        .bind(&job.idempotency_key)
        .bind(&job.correlation_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Atomically claim the next due outbox job in
    /// `(next_attempt_ts, retry_count, created_ts, id)` order.
    pub async fn outbox_next_due(&self, stale_after_s: i64) -> Result<Option<OutboxJob>> {
        let now = now_ts();
        let stale_before = now - stale_after_s;

        loop {
            let candidate: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM outbox WHERE state = 'pending' AND next_attempt_ts <= ? \
                 AND (claimed_at IS NULL OR claimed_at < ?) \
                 ORDER BY next_attempt_ts ASC, retry_count ASC, created_ts ASC, id ASC LIMIT 1",
            )
            .bind(now)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE outbox SET claimed_at = ? WHERE id = ? AND state = 'pending' \
                 AND (claimed_at IS NULL OR claimed_at < ?)",
            )
            .bind(now)
            .bind(id)
            .bind(stale_before)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 0 {
                continue;
            }

            let row = sqlx::query("SELECT * FROM outbox WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            return Ok(Some(row_to_outbox(row)));
        }
    }

    pub async fn outbox_mark_done(&self, id: i64) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE outbox SET state = 'done', updated_ts = ?, claimed_at = NULL, last_status = 200 \
             WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch an outbox job by id regardless of state, for diagnostics and
    /// tests -- unlike `outbox_next_due` this never claims the row.
    pub async fn outbox_get(&self, id: i64) -> Result<Option<OutboxJob>> {
        let row = sqlx::query("SELECT * FROM outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_outbox))
    }

    pub async fn outbox_mark_permanent(&self, id: i64, status: i64, reason: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE outbox SET state = 'failed_permanent', updated_ts = ?, claimed_at = NULL, \
             last_status = ?, last_error = ? WHERE id = ?",
        )
        .bind(now)
        .bind(status)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Schedule a retry: bump `retry_count`, compute `next_attempt_ts` from
    /// the caller-supplied delay, and release the claim.
    pub async fn outbox_reschedule(
        &self,
        id: i64,
        new_retry_count: i64,
        next_attempt_ts: i64,
        status: i64,
        reason: &str,
    ) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE outbox SET retry_count = ?, next_attempt_ts = ?, updated_ts = ?, claimed_at = NULL, \
             last_status = ?, last_error = ? WHERE id = ?",
        )
        .bind(new_retry_count)
        .bind(next_attempt_ts)
        .bind(now)
        .bind(status)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
