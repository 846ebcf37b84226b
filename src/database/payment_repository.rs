//! Canonical payment rows, keyed by (tenant_id, external_id).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::crypto::hash_msisdn;
use crate::database::error::DatabaseError;

pub const PAYMENT_PENDING: &str = "pending";
pub const PAYMENT_COMPLETED: &str = "completed";
pub const PAYMENT_FAILED: &str = "failed";
pub const PAYMENT_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: i64,
    pub invoice_no: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub method: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field set merged into a payment row by the reconciliation worker.
#[derive(Debug, Clone)]
pub struct PaymentUpsert {
    pub tenant_id: i64,
    pub credential_id: i64,
    pub invoice_no: String,
    pub msisdn: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub method: String,
    pub external_id: String,
}

#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Money-safe upsert inside the worker transaction, paired with the event
    /// status change so both commit or neither does.
    ///
    /// Only non-empty incoming fields overwrite (amount: positive); callbacks
    /// carry partial views of the payment and must not blank out fields an
    /// earlier delivery already filled.
    pub async fn upsert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        p: &PaymentUpsert,
    ) -> Result<(), DatabaseError> {
        let msisdn_hash = if p.msisdn.trim().is_empty() {
            String::new()
        } else {
            hash_msisdn(&p.msisdn)
        };

        let updated = sqlx::query(
            "UPDATE payments
             SET invoice_no  = COALESCE(NULLIF($3, ''), invoice_no),
                 msisdn_hash = COALESCE(NULLIF($4, ''), msisdn_hash),
                 amount      = CASE WHEN $5 > 0 THEN $5 ELSE amount END,
                 currency    = COALESCE(NULLIF($6, ''), currency),
                 status      = COALESCE(NULLIF($7, ''), status),
                 method      = COALESCE(NULLIF($8, ''), method),
                 provider_credential_id = COALESCE($9, provider_credential_id),
                 updated_at  = now()
             WHERE tenant_id = $1 AND external_id = $2",
        )
        .bind(p.tenant_id)
        .bind(&p.external_id)
        .bind(&p.invoice_no)
        .bind(&msisdn_hash)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(&p.status)
        .bind(&p.method)
        .bind(p.credential_id)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO payments (
                tenant_id, invoice_no, msisdn_hash, amount, currency, status,
                method, provider_credential_id, external_id
             )
             VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), $4, $5, $6, $7, $8, $9)",
        )
        .bind(p.tenant_id)
        .bind(&p.invoice_no)
        .bind(&msisdn_hash)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(&p.status)
        .bind(&p.method)
        .bind(p.credential_id)
        .bind(&p.external_id)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Initiation pre-insert: a pending row keyed by the provider-issued
    /// external id, so the later confirmation callback converges on it.
    pub async fn upsert_pending(
        &self,
        tenant_id: i64,
        credential_id: i64,
        invoice_no: &str,
        amount: i64,
        external_id: &str,
        method: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO payments (
                tenant_id, invoice_no, amount, status, method,
                provider_credential_id, external_id
             )
             VALUES ($1, NULLIF($2, ''), $3, $4, $5, $6, $7)
             ON CONFLICT (tenant_id, external_id) DO UPDATE
               SET amount     = EXCLUDED.amount,
                   invoice_no = COALESCE(EXCLUDED.invoice_no, payments.invoice_no),
                   updated_at = now()",
        )
        .bind(tenant_id)
        .bind(invoice_no)
        .bind(amount)
        .bind(PAYMENT_PENDING)
        .bind(method)
        .bind(credential_id)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn list(
        &self,
        tenant_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        sqlx::query_as::<_, PaymentRecord>(
            "SELECT id, invoice_no, amount, currency, status, method, external_id,
                    created_at, updated_at
             FROM payments
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
