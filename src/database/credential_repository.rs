//! Provider credential persistence and lookup.
//!
//! Secrets land in this table already enciphered; `decrypt_field` is the only
//! way plaintext leaves it.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::crypto::{CryptoError, SecretBox};
use crate::database::error::DatabaseError;
use crate::database::tenant_repository::Tenant;

#[derive(Debug, Clone, FromRow)]
pub struct ProviderCredential {
    pub id: i64,
    pub tenant_id: i64,
    pub provider: String,
    pub shortcode: String,
    pub environment: String,
    pub webhook_token: String,
    pub is_active: bool,
    pub passkey_enc: String,
    pub consumer_key_enc: String,
    pub consumer_secret_enc: String,
    pub c2b_mode: String,
    pub bill_ref_required: bool,
    pub bill_ref_regex: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload; secrets must already be enciphered by the caller.
#[derive(Debug, Clone)]
pub struct NewProviderCredential {
    pub tenant_id: i64,
    pub provider: String,
    pub shortcode: String,
    pub environment: String,
    pub webhook_token: String,
    pub passkey_enc: String,
    pub consumer_key_enc: String,
    pub consumer_secret_enc: String,
    pub c2b_mode: String,
    pub bill_ref_required: bool,
    pub bill_ref_regex: String,
}

/// Named encrypted fields on a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretField {
    Passkey,
    ConsumerKey,
    ConsumerSecret,
}

const CREDENTIAL_COLUMNS: &str = "id, tenant_id, provider, shortcode, environment, webhook_token, is_active, \
     passkey_enc, consumer_key_enc, consumer_secret_enc, \
     COALESCE(c2b_mode, 'paybill') AS c2b_mode, \
     COALESCE(bill_ref_required, TRUE) AS bill_ref_required, \
     COALESCE(bill_ref_regex, '') AS bill_ref_regex, \
     created_at, updated_at";

#[derive(Clone)]
pub struct CredentialRepository {
    pool: PgPool,
    secrets: SecretBox,
}

impl CredentialRepository {
    pub fn new(pool: PgPool, secrets: SecretBox) -> Self {
        Self { pool, secrets }
    }

    pub async fn insert(
        &self,
        cred: NewProviderCredential,
    ) -> Result<ProviderCredential, DatabaseError> {
        sqlx::query_as::<_, ProviderCredential>(&format!(
            "INSERT INTO provider_credentials (
                tenant_id, provider, shortcode, environment, webhook_token, is_active,
                passkey_enc, consumer_key_enc, consumer_secret_enc,
                c2b_mode, bill_ref_required, bill_ref_regex
             )
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8, $9, $10, $11)
             RETURNING {CREDENTIAL_COLUMNS}"
        ))
        .bind(cred.tenant_id)
        .bind(&cred.provider)
        .bind(&cred.shortcode)
        .bind(&cred.environment)
        .bind(&cred.webhook_token)
        .bind(&cred.passkey_enc)
        .bind(&cred.consumer_key_enc)
        .bind(&cred.consumer_secret_enc)
        .bind(&cred.c2b_mode)
        .bind(cred.bill_ref_required)
        .bind(&cred.bill_ref_regex)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Resolve a credential for a tenant. With no shortcode, the first active
    /// credential by ascending id is the stable default.
    pub async fn resolve(
        &self,
        tenant_id: i64,
        shortcode: Option<&str>,
    ) -> Result<ProviderCredential, DatabaseError> {
        let shortcode = shortcode.map(str::trim).filter(|s| !s.is_empty());

        let default_sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials
             WHERE tenant_id = $1 AND is_active
             ORDER BY id ASC LIMIT 1"
        );
        let by_shortcode_sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM provider_credentials
             WHERE tenant_id = $1 AND shortcode = $2 AND is_active"
        );

        let row = match shortcode {
            None => {
                sqlx::query_as::<_, ProviderCredential>(&default_sql)
                    .bind(tenant_id)
                    .fetch_optional(&self.pool)
                    .await
            }
            Some(code) => {
                sqlx::query_as::<_, ProviderCredential>(&by_shortcode_sql)
                    .bind(tenant_id)
                    .bind(code)
                    .fetch_optional(&self.pool)
                    .await
            }
        };

        row.map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("ProviderCredential", tenant_id))
    }

    /// Ingress resolution without tenant context: shortcode → (credential, tenant).
    pub async fn find_by_shortcode(
        &self,
        shortcode: &str,
    ) -> Result<(ProviderCredential, Tenant), DatabaseError> {
        self.find_with_tenant("c.shortcode = $1", shortcode).await
    }

    /// Ingress resolution by the globally unique webhook token.
    pub async fn find_by_webhook_token(
        &self,
        token: &str,
    ) -> Result<(ProviderCredential, Tenant), DatabaseError> {
        self.find_with_tenant("c.webhook_token = $1", token).await
    }

    async fn find_with_tenant(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<(ProviderCredential, Tenant), DatabaseError> {
        #[derive(FromRow)]
        struct Joined {
            #[sqlx(flatten)]
            cred: ProviderCredential,
            t_id: i64,
            t_name: String,
            t_status: String,
            t_created_at: DateTime<Utc>,
        }

        let sql = format!(
            "SELECT c.id, c.tenant_id, c.provider, c.shortcode, c.environment, c.webhook_token, c.is_active,
                    c.passkey_enc, c.consumer_key_enc, c.consumer_secret_enc,
                    COALESCE(c.c2b_mode, 'paybill') AS c2b_mode,
                    COALESCE(c.bill_ref_required, TRUE) AS bill_ref_required,
                    COALESCE(c.bill_ref_regex, '') AS bill_ref_regex,
                    c.created_at, c.updated_at,
                    t.id AS t_id, t.name AS t_name, t.status AS t_status, t.created_at AS t_created_at
             FROM provider_credentials c
             JOIN tenants t ON t.id = c.tenant_id
             WHERE {predicate} AND c.is_active"
        );

        let row = sqlx::query_as::<_, Joined>(&sql)
            .bind(value.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("ProviderCredential", value))?;

        let tenant = Tenant {
            id: row.t_id,
            name: row.t_name,
            status: row.t_status,
            created_at: row.t_created_at,
        };
        Ok((row.cred, tenant))
    }

    pub fn decrypt_field(
        &self,
        cred: &ProviderCredential,
        field: SecretField,
    ) -> Result<String, CryptoError> {
        let ciphertext = match field {
            SecretField::Passkey => &cred.passkey_enc,
            SecretField::ConsumerKey => &cred.consumer_key_enc,
            SecretField::ConsumerSecret => &cred.consumer_secret_enc,
        };
        self.secrets.decrypt(ciphertext)
    }
}
