//! Initiation endpoints (STK push, B2C) and C2B URL registration.
//!
//! The pending payment row is written only after the provider accepts the
//! initiation, keyed by the provider-issued external id; the later callback
//! converges on the same (tenant_id, external_id) record. If that write
//! fails the whole call fails, even though the handset may already be
//! showing a prompt; reconciliation catches up when the callback arrives.

use axum::extract::{Extension, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

use crate::database::credential_repository::{CredentialRepository, ProviderCredential};
use crate::database::payment_repository::PaymentRepository;
use crate::error::AppError;
use crate::middleware::auth::TenantContext;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::types::{B2cCommand, B2cRequest, Operation, StkPushRequest};
use crate::state::AppState;

/// Outbound provider calls are bounded so a slow Daraja cannot pin request
/// handlers.
const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StkInitiationRequest {
    pub amount: i64,
    pub phone: String,
    pub account_ref: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub shortcode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StkInitiationResponse {
    pub checkout_request_id: String,
    pub customer_message: String,
}

/// `POST /v1/payments/stk`
pub async fn initiate_stk(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(request): Json<StkInitiationRequest>,
) -> Result<Json<StkInitiationResponse>, AppError> {
    if request.amount <= 0 || request.phone.trim().is_empty() || request.account_ref.trim().is_empty()
    {
        return Err(AppError::Validation(
            "amount, phone and accountRef are required".to_string(),
        ));
    }

    let cred = resolve_credential(&state, tenant.tenant_id, request.shortcode.as_deref()).await?;
    let adapter = state.registry.for_credential(&cred)?;
    if !state.registry.supports(adapter.kind(), Operation::StkPush) {
        return Err(ProviderError::Unsupported {
            operation: "stk_push".to_string(),
        }
        .into());
    }

    let callback_url = format!(
        "{}/hooks/mpesa/{}",
        state.config.callback_base_url, cred.shortcode
    );
    let response = bounded(adapter.initiate_stk_push(
        &cred,
        StkPushRequest {
            amount: request.amount,
            msisdn: request.phone.trim().to_string(),
            account_ref: request.account_ref.trim().to_string(),
            description: request.description.trim().to_string(),
            callback_url,
        },
    ))
    .await?;

    // The provider already sent the prompt; if this write fails the caller
    // must treat the initiation as failed and the callback path reconciles.
    let payments = PaymentRepository::new(state.pool.clone());
    if let Err(e) = payments
        .upsert_pending(
            tenant.tenant_id,
            cred.id,
            request.account_ref.trim(),
            request.amount,
            &response.external_id,
            adapter.kind().method_tag(),
        )
        .await
    {
        error!(
            tenant_id = tenant.tenant_id,
            external_id = %response.external_id,
            error = %e,
            "failed to persist pending payment after stk initiation"
        );
        return Err(AppError::Internal(
            "failed to persist payment".to_string(),
        ));
    }

    Ok(Json(StkInitiationResponse {
        checkout_request_id: response.external_id,
        customer_message: response.message,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2cInitiationRequest {
    pub amount: i64,
    pub phone: String,
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub occasion: Option<String>,
    #[serde(default)]
    pub shortcode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct B2cInitiationResponse {
    pub conversation_id: String,
    pub message: String,
}

/// `POST /v1/payments/b2c`
pub async fn initiate_b2c(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(request): Json<B2cInitiationRequest>,
) -> Result<Json<B2cInitiationResponse>, AppError> {
    if request.amount <= 0 || request.phone.trim().is_empty() {
        return Err(AppError::Validation(
            "amount and phone are required".to_string(),
        ));
    }
    let command = B2cCommand::from_str(request.command.trim())?;

    let cred = resolve_credential(&state, tenant.tenant_id, request.shortcode.as_deref()).await?;
    let adapter = state.registry.for_credential(&cred)?;
    if !state.registry.supports(adapter.kind(), Operation::B2c) {
        return Err(ProviderError::Unsupported {
            operation: "b2c".to_string(),
        }
        .into());
    }

    let hook_base = format!(
        "{}/hooks/mpesa/{}",
        state.config.callback_base_url, cred.shortcode
    );
    let response = bounded(adapter.initiate_b2c(
        &cred,
        B2cRequest {
            amount: request.amount,
            msisdn: request.phone.trim().to_string(),
            command,
            result_url: hook_base.clone(),
            timeout_url: hook_base,
            description: request.description.trim().to_string(),
            occasion: request.occasion,
        },
    ))
    .await?;

    let payments = PaymentRepository::new(state.pool.clone());
    if let Err(e) = payments
        .upsert_pending(
            tenant.tenant_id,
            cred.id,
            "",
            request.amount,
            &response.external_id,
            adapter.kind().method_tag(),
        )
        .await
    {
        error!(
            tenant_id = tenant.tenant_id,
            external_id = %response.external_id,
            error = %e,
            "failed to persist pending payment after b2c initiation"
        );
        return Err(AppError::Internal(
            "failed to persist payment".to_string(),
        ));
    }

    Ok(Json(B2cInitiationResponse {
        conversation_id: response.external_id,
        message: response.message,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterC2bRequest {
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub confirm_url: Option<String>,
    #[serde(default)]
    pub validate_url: Option<String>,
}

/// `POST /v1/mpesa/register-c2b`: point Daraja's C2B confirmation and
/// validation URLs at this service.
pub async fn register_c2b(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Json(request): Json<RegisterC2bRequest>,
) -> Result<Json<JsonValue>, AppError> {
    let cred = resolve_credential(&state, tenant.tenant_id, request.shortcode.as_deref()).await?;
    let adapter = state.registry.for_credential(&cred)?;

    let response_type = request
        .response_type
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "Completed".to_string());
    let confirm_url = request.confirm_url.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| {
        format!(
            "{}/hooks/paywatch/c2b/confirmation",
            state.config.callback_base_url
        )
    });
    let validate_url = request.validate_url.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| {
        format!(
            "{}/hooks/paywatch/c2b/validation",
            state.config.callback_base_url
        )
    });

    bounded(adapter.register_c2b_urls(&cred, &confirm_url, &validate_url, &response_type)).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn resolve_credential(
    state: &AppState,
    tenant_id: i64,
    shortcode: Option<&str>,
) -> Result<ProviderCredential, AppError> {
    let credentials = CredentialRepository::new(state.pool.clone(), state.secrets.clone());
    credentials.resolve(tenant_id, shortcode).await.map_err(|e| {
        if e.is_not_found() {
            AppError::NotFound("credential not found".to_string())
        } else {
            AppError::Storage(e)
        }
    })
}

async fn bounded<T>(
    fut: impl std::future::Future<Output = ProviderResult<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(PROVIDER_CALL_TIMEOUT, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(ProviderError::Network {
            message: "provider call timed out".to_string(),
        }
        .into()),
    }
}
