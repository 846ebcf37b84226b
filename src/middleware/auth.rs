//! Tenant and admin authentication gates.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::crypto::{hash_api_key, secure_eq};
use crate::database::tenant_repository::TenantRepository;
use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Tenant identity propagated to downstream handlers after key verification.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: i64,
}

/// Bearer API-key verification. Only the SHA-256 of the key ever touches the
/// database; keys of suspended or closed tenants fail the same way unknown
/// keys do.
pub async fn api_key_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let key = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer key".to_string()))?;

    let key_hash = hash_api_key(key);
    let tenants = TenantRepository::new(state.pool.clone());
    let tenant = tenants
        .lookup_tenant_by_api_key_hash(&key_hash)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::Unauthorized("invalid api key".to_string())
            } else {
                AppError::Storage(e)
            }
        })?;

    if let Err(e) = tenants.touch_api_key(&key_hash).await {
        warn!(tenant_id = tenant.id, error = %e, "failed to update api key last_used_at");
    }

    request.extensions_mut().insert(TenantContext {
        tenant_id: tenant.id,
    });
    Ok(next.run(request).await)
}

/// Static admin-token comparison. An empty configured token disables the
/// admin surface entirely.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let configured = &state.config.security.admin_token;
    let presented = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if configured.is_empty() || !secure_eq(presented.as_bytes(), configured.as_bytes()) {
        return Err(AppError::Unauthorized("unauthorized".to_string()));
    }
    Ok(next.run(request).await)
}
