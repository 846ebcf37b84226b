//! Tenants and their API keys.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;

pub const TENANT_ACTIVE: &str = "active";
const MAX_TENANT_NAME: usize = 100;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TENANT_ACTIVE
    }
}

#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_tenant(&self, name: &str) -> Result<Tenant, DatabaseError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_TENANT_NAME {
            return Err(DatabaseError::invalid(
                "tenant name must be non-empty and at most 100 characters",
            ));
        }

        sqlx::query_as::<_, Tenant>(
            "INSERT INTO tenants (name) VALUES ($1)
             RETURNING id, name, status, created_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn insert_api_key(
        &self,
        tenant_id: i64,
        key_name: &str,
        key_hash: &str,
    ) -> Result<i64, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO tenant_api_keys (tenant_id, name, key_hash)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(tenant_id)
        .bind(key_name)
        .bind(key_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(id)
    }

    /// Resolve the owning tenant of an API key hash. A key belonging to a
    /// suspended or closed tenant resolves to NotFound, same as a missing key.
    pub async fn lookup_tenant_by_api_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Tenant, DatabaseError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT t.id, t.name, t.status, t.created_at
             FROM tenant_api_keys k
             JOIN tenants t ON t.id = k.tenant_id
             WHERE k.key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("Tenant", "api key"))?;

        if !tenant.is_active() {
            return Err(DatabaseError::not_found("Tenant", tenant.id));
        }
        Ok(tenant)
    }

    pub async fn touch_api_key(&self, key_hash: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE tenant_api_keys SET last_used_at = now() WHERE key_hash = $1")
            .bind(key_hash)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_check_matches_status_string() {
        let tenant = Tenant {
            id: 1,
            name: "Acme".to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        assert!(tenant.is_active());

        let suspended = Tenant {
            status: "suspended".to_string(),
            ..tenant
        };
        assert!(!suspended.is_active());
    }
}
