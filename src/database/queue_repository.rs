//! Dispatch queue: at-least-once hand-off from persisted events to the
//! reconciliation worker.
//!
//! `fetch_due` is the only transition from {pending, failed} to delivering,
//! and it is serializable across workers via FOR UPDATE SKIP LOCKED, so no
//! two workers ever lease the same item.

use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;

use crate::database::error::DatabaseError;
use crate::database::event_repository::{PROCESSING_COMPLETED, PROCESSING_FAILED};

pub const QUEUE_PENDING: &str = "pending";
pub const QUEUE_DELIVERING: &str = "delivering";
pub const QUEUE_DONE: &str = "done";
pub const QUEUE_FAILED: &str = "failed";

const MAX_ERROR_BYTES: usize = 800;

/// A leased queue item joined with the event fields the worker needs.
#[derive(Debug, Clone, FromRow)]
pub struct DueEvent {
    pub queue_id: i64,
    pub event_id: i64,
    pub tenant_id: i64,
    pub provider_credential_id: i64,
    pub provider: String,
    pub event_type: String,
    pub external_id: String,
    pub payload_json: JsonValue,
}

#[derive(Clone)]
pub struct QueueRepository {
    pool: PgPool,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a queue row for an event on the ingestion path. A row that
    /// already ran to `done` is reset to pending with zeroed attempts
    /// (a re-delivered event gets processed again); rows still in flight or
    /// backing off are left alone so concurrent enqueues collapse.
    pub async fn enqueue(&self, tenant_id: i64, event_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO event_queue (tenant_id, event_id)
             VALUES ($1, $2)
             ON CONFLICT (event_id) DO UPDATE
               SET status = 'pending',
                   attempts = 0,
                   next_attempt_at = now(),
                   last_error = NULL,
                   updated_at = now()
             WHERE event_queue.status = 'done'",
        )
        .bind(tenant_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Operator replay variant of `enqueue`: makes the item due immediately
    /// even if its row is `failed` mid-backoff or `pending` with a future
    /// attempt time. Only a `delivering` row is left alone, since a worker
    /// currently holds its lease.
    pub async fn requeue(&self, tenant_id: i64, event_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO event_queue (tenant_id, event_id)
             VALUES ($1, $2)
             ON CONFLICT (event_id) DO UPDATE
               SET status = 'pending',
                   attempts = 0,
                   next_attempt_at = now(),
                   last_error = NULL,
                   updated_at = now()
             WHERE event_queue.status <> 'delivering'",
        )
        .bind(tenant_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Atomically lease up to `limit` due items: select pending/failed rows
    /// whose next attempt is due, skip rows held by other workers, flip them
    /// to delivering, and return them joined with their event.
    pub async fn fetch_due(&self, limit: i64) -> Result<Vec<DueEvent>, DatabaseError> {
        sqlx::query_as::<_, DueEvent>(
            "WITH due AS (
                SELECT id, event_id FROM event_queue
                WHERE status IN ('pending', 'failed')
                  AND next_attempt_at <= now()
                ORDER BY next_attempt_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
             )
             UPDATE event_queue q
                SET status = 'delivering', updated_at = now()
               FROM due d
               JOIN payment_events e ON e.id = d.event_id
               JOIN provider_credentials c ON c.id = e.provider_credential_id
              WHERE q.id = d.id
             RETURNING q.id AS queue_id,
                       q.event_id,
                       e.tenant_id,
                       e.provider_credential_id,
                       c.provider,
                       e.event_type,
                       e.external_id,
                       e.payload_json",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Finish a leased item: queue done, event finalized. Used on its own for
    /// poison events; the reconciliation path uses `complete_in_tx` so the
    /// payment write commits in the same transaction.
    pub async fn mark_done(
        &self,
        queue_id: i64,
        event_id: i64,
        final_status: &str,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        self.complete_in_tx(&mut tx, queue_id, event_id, final_status)
            .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    pub async fn complete_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        queue_id: i64,
        event_id: i64,
        final_status: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE event_queue SET status = $2, updated_at = now() WHERE id = $1")
            .bind(queue_id)
            .bind(QUEUE_DONE)
            .execute(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "UPDATE payment_events
             SET processing_status = $2,
                 status = $3,
                 processed_at = COALESCE(processed_at, now())
             WHERE id = $1",
        )
        .bind(event_id)
        .bind(PROCESSING_COMPLETED)
        .bind(final_status)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Record a transient failure: bump attempts, push the next attempt out by
    /// the backoff schedule, keep the (truncated) error for operators.
    pub async fn mark_failed(
        &self,
        queue_id: i64,
        event_id: i64,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let (attempts,): (i32,) =
            sqlx::query_as("SELECT attempts FROM event_queue WHERE id = $1 FOR UPDATE")
                .bind(queue_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        let delay = backoff(attempts as u32);

        sqlx::query(
            "UPDATE event_queue
             SET status = $2,
                 attempts = $3,
                 next_attempt_at = now() + make_interval(secs => $4),
                 last_error = $5,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(queue_id)
        .bind(QUEUE_FAILED)
        .bind(attempts + 1)
        .bind(delay.as_secs_f64())
        .bind(truncate_error(last_error, MAX_ERROR_BYTES))
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query("UPDATE payment_events SET processing_status = $2 WHERE id = $1")
            .bind(event_id)
            .bind(PROCESSING_FAILED)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    /// Reset items stuck in delivering (worker died mid-lease) back to
    /// pending. Returns how many were reclaimed.
    pub async fn reclaim_stalled(&self, older_than: Duration) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE event_queue
             SET status = 'pending', updated_at = now()
             WHERE status = 'delivering'
               AND updated_at < now() - make_interval(secs => $1)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

/// Retry backoff, capped at a day: 1m, 5m, 30m, 2h, then 24h.
pub fn backoff(attempts: u32) -> Duration {
    match attempts {
        0 => Duration::from_secs(60),
        1 => Duration::from_secs(5 * 60),
        2 => Duration::from_secs(30 * 60),
        3 => Duration::from_secs(2 * 3600),
        _ => Duration::from_secs(24 * 3600),
    }
}

fn truncate_error(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_monotone_and_capped() {
        assert_eq!(backoff(0), Duration::from_secs(60));
        assert_eq!(backoff(1), Duration::from_secs(300));
        assert_eq!(backoff(2), Duration::from_secs(1800));
        assert_eq!(backoff(3), Duration::from_secs(7200));
        assert_eq!(backoff(4), Duration::from_secs(86400));
        assert_eq!(backoff(50), Duration::from_secs(86400));

        for n in 0..6 {
            assert!(backoff(n) <= backoff(n + 1));
        }
    }

    #[test]
    fn error_truncation_respects_byte_budget() {
        let long = "x".repeat(2000);
        assert_eq!(truncate_error(&long, 800).len(), 800);
        assert_eq!(truncate_error("short", 800), "short");
    }

    #[test]
    fn error_truncation_keeps_char_boundaries() {
        // Multi-byte character straddling the cut point must not split.
        let s = format!("{}é", "a".repeat(799));
        let truncated = truncate_error(&s, 800);
        assert!(truncated.len() <= 800);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
