//! Raw provider event persistence.
//!
//! `append` carries the ingestion idempotency contract: one row per
//! (tenant, event type, external id), with re-deliveries refreshing the
//! payload and any newly known fields while leaving the processing state
//! untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;
use crate::providers::types::CallbackEvent;

pub const PROCESSING_PENDING: &str = "pending";
pub const PROCESSING_QUEUED: &str = "queued";
pub const PROCESSING_COMPLETED: &str = "completed";
pub const PROCESSING_FAILED: &str = "failed";

#[derive(Debug, Clone, FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub provider_credential_id: i64,
    pub event_type: String,
    pub external_id: String,
    pub amount: i64,
    pub msisdn: String,
    pub invoice_ref: String,
    pub transaction_id: String,
    pub status: String,
    pub response_description: String,
    pub payload_json: JsonValue,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_status: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub external_id: String,
    pub amount: i64,
    pub status: String,
    pub processing_status: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent append keyed by (tenant_id, event_type, external_id).
    ///
    /// First delivery inserts the full row with `processing_status = pending`.
    /// A re-delivery refreshes the raw payload and any field whose new value
    /// is non-empty (amount: positive), and returns the existing id.
    pub async fn append(
        &self,
        tenant_id: i64,
        credential_id: i64,
        event: &CallbackEvent,
    ) -> Result<i64, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO payment_events (
                tenant_id, provider_credential_id, event_type, external_id,
                amount, msisdn, invoice_ref, transaction_id, status,
                response_description, payload_json
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (tenant_id, event_type, external_id) DO UPDATE
               SET payload_json = EXCLUDED.payload_json,
                   amount       = CASE WHEN EXCLUDED.amount > 0 THEN EXCLUDED.amount ELSE payment_events.amount END,
                   msisdn       = COALESCE(NULLIF(EXCLUDED.msisdn, ''), payment_events.msisdn),
                   invoice_ref  = COALESCE(NULLIF(EXCLUDED.invoice_ref, ''), payment_events.invoice_ref),
                   transaction_id = COALESCE(NULLIF(EXCLUDED.transaction_id, ''), payment_events.transaction_id),
                   status       = COALESCE(NULLIF(EXCLUDED.status, ''), payment_events.status),
                   response_description = COALESCE(NULLIF(EXCLUDED.response_description, ''), payment_events.response_description)
             RETURNING id",
        )
        .bind(tenant_id)
        .bind(credential_id)
        .bind(event.kind.as_str())
        .bind(&event.external_id)
        .bind(event.amount)
        .bind(&event.msisdn)
        .bind(&event.invoice_ref)
        .bind(&event.transaction_id)
        .bind(&event.status)
        .bind(&event.response_description)
        .bind(&event.raw)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(id)
    }

    /// Events awaiting the worker, oldest first. Sweepers use this to catch
    /// rows whose enqueue was lost after the durable write.
    pub async fn find_unprocessed(&self, limit: i64) -> Result<Vec<EventRecord>, DatabaseError> {
        sqlx::query_as::<_, EventRecord>(
            "SELECT id, tenant_id, provider_credential_id, event_type, external_id,
                    amount, msisdn, invoice_ref, transaction_id, status,
                    response_description, payload_json, received_at, processed_at,
                    processing_status
             FROM payment_events
             WHERE processing_status IN ('pending', 'queued')
             ORDER BY received_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processed(&self, id: i64, final_status: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_events
             SET processing_status = $2, status = $3, processed_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(PROCESSING_COMPLETED)
        .bind(final_status)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Operator replay: push an event back onto the processing path. Rejected
    /// when the event is still pending (it has never been picked up).
    pub async fn mark_for_reprocessing(
        &self,
        tenant_id: i64,
        id: i64,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE payment_events
             SET processing_status = $3, processed_at = NULL
             WHERE id = $1 AND tenant_id = $2 AND processing_status <> $4",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(PROCESSING_QUEUED)
        .bind(PROCESSING_PENDING)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Event", id));
        }
        Ok(())
    }

    /// Event ids in a received_at window, oldest first. Used by replay.
    pub async fn find_ids_in_window(
        &self,
        tenant_id: i64,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        max: i64,
    ) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM payment_events
             WHERE tenant_id = $1
               AND ($2::timestamptz IS NULL OR received_at >= $2)
               AND ($3::timestamptz IS NULL OR received_at <= $3)
             ORDER BY received_at ASC
             LIMIT $4",
        )
        .bind(tenant_id)
        .bind(since)
        .bind(until)
        .bind(max)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn list(
        &self,
        tenant_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EventListItem>, DatabaseError> {
        sqlx::query_as::<_, EventListItem>(
            "SELECT id, event_type, external_id, amount, status, processing_status, received_at
             FROM payment_events
             WHERE tenant_id = $1
             ORDER BY id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
