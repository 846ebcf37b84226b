//! Ingestion controller: provider callbacks in, durable events out.
//!
//! A 2xx acknowledgement is only returned after the event row is committed.
//! The queue enqueue is best-effort: a stored event that misses its enqueue
//! is still picked up later via replay or an unprocessed sweep, whereas
//! failing the ACK would make the provider re-deliver a payload we already
//! hold.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::database::credential_repository::{CredentialRepository, ProviderCredential};
use crate::database::event_repository::EventRepository;
use crate::database::queue_repository::QueueRepository;
use crate::error::AppError;
use crate::providers::mpesa::WEBHOOK_TOKEN_HEADER;
use crate::providers::provider::CallbackHeaders;
use crate::providers::types::{CallbackEvent, EventKind};
use crate::state::AppState;

/// `POST /hooks/mpesa/{shortcode}`: callback ingress resolved by path.
pub async fn mpesa_by_shortcode(
    State(state): State<AppState>,
    Path(shortcode): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, AppError> {
    let credentials = CredentialRepository::new(state.pool.clone(), state.secrets.clone());
    let (cred, _tenant) = credentials
        .find_by_shortcode(&shortcode)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::NotFound("unknown shortcode".to_string())
            } else {
                AppError::Storage(e)
            }
        })?;

    ingest(&state, &cred, &headers, &body).await?;
    Ok(Json(json!({"status": "received"})))
}

/// `POST /hooks/mpesa`: callback ingress resolved by webhook token header.
pub async fn mpesa_by_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JsonValue>, AppError> {
    let token = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing webhook token".to_string()))?;

    let credentials = CredentialRepository::new(state.pool.clone(), state.secrets.clone());
    let (cred, _tenant) = credentials.find_by_webhook_token(token).await.map_err(|e| {
        if e.is_not_found() {
            AppError::NotFound("unknown webhook token".to_string())
        } else {
            AppError::Storage(e)
        }
    })?;

    ingest(&state, &cred, &headers, &body).await?;
    Ok(Json(json!({"status": "received"})))
}

/// Shared pipeline: validate → parse → durable append → best-effort enqueue.
async fn ingest(
    state: &AppState,
    cred: &ProviderCredential,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<i64, AppError> {
    let adapter = state.registry.for_credential(cred)?;
    let callback_headers = to_callback_headers(headers);

    adapter.validate_callback(body, &callback_headers, &cred.webhook_token)?;
    let event = adapter.parse_callback(body, &callback_headers)?;

    let event_id = append_and_enqueue(state, cred, &event).await?;

    info!(
        tenant_id = cred.tenant_id,
        shortcode = %cred.shortcode,
        event_type = event.kind.as_str(),
        external_id = %event.external_id,
        event_id,
        "callback ingested"
    );
    Ok(event_id)
}

/// Durable write first; ACK depends on it. Enqueue failures are logged only.
async fn append_and_enqueue(
    state: &AppState,
    cred: &ProviderCredential,
    event: &CallbackEvent,
) -> Result<i64, AppError> {
    let events = EventRepository::new(state.pool.clone());
    let event_id = events.append(cred.tenant_id, cred.id, event).await?;

    let queue = QueueRepository::new(state.pool.clone());
    if let Err(e) = queue.enqueue(cred.tenant_id, event_id).await {
        warn!(
            event_id,
            tenant_id = cred.tenant_id,
            error = %e,
            "enqueue failed after durable event write"
        );
    }
    Ok(event_id)
}

fn to_callback_headers(headers: &HeaderMap) -> CallbackHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

// --- C2B validation / confirmation sub-ingress -------------------------------

/// Daraja C2B callback body, shared by the validation and confirmation URLs.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct C2bCallback {
    #[serde(rename = "TransactionType", default)]
    pub transaction_type: String,
    #[serde(rename = "TransID", default)]
    pub trans_id: String,
    #[serde(rename = "TransTime", default)]
    pub trans_time: String,
    #[serde(rename = "TransAmount", default)]
    pub trans_amount: JsonValue,
    #[serde(rename = "BusinessShortCode", default)]
    pub business_short_code: String,
    #[serde(rename = "BillRefNumber", default)]
    pub bill_ref_number: String,
    #[serde(rename = "InvoiceNumber", default)]
    pub invoice_number: String,
    #[serde(rename = "MSISDN", default)]
    pub msisdn: String,
}

#[derive(Debug, Serialize)]
pub struct C2bValidationResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// `POST /hooks/paywatch/c2b/validation`: pre-confirmation gate. Applies the
/// credential's bill-reference rules; persists nothing.
pub async fn c2b_validation(
    State(state): State<AppState>,
    Json(callback): Json<C2bCallback>,
) -> Json<C2bValidationResponse> {
    let credentials = CredentialRepository::new(state.pool.clone(), state.secrets.clone());
    let cred = match credentials
        .find_by_shortcode(callback.business_short_code.trim())
        .await
    {
        Ok((cred, _tenant)) => cred,
        Err(_) => {
            return Json(reject("Unknown ShortCode"));
        }
    };

    match check_bill_ref(&cred, &callback.bill_ref_number) {
        Ok(()) => Json(C2bValidationResponse {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }),
        Err(reason) => {
            info!(
                shortcode = %cred.shortcode,
                bill_ref = %callback.bill_ref_number,
                reason,
                "c2b validation rejected"
            );
            Json(reject(reason))
        }
    }
}

/// `POST /hooks/paywatch/c2b/confirmation`: persist the confirmed payment
/// event; only ACK once it is durably stored.
pub async fn c2b_confirmation(
    State(state): State<AppState>,
    Json(callback): Json<C2bCallback>,
) -> Result<Json<JsonValue>, AppError> {
    let trans_id = callback.trans_id.trim().to_string();
    if trans_id.is_empty() {
        return Err(AppError::Validation("TransID is required".to_string()));
    }

    let credentials = CredentialRepository::new(state.pool.clone(), state.secrets.clone());
    let (cred, _tenant) = credentials
        .find_by_shortcode(callback.business_short_code.trim())
        .await
        .map_err(|e| {
            if e.is_not_found() {
                AppError::NotFound("unknown shortcode".to_string())
            } else {
                AppError::Storage(e)
            }
        })?;

    let raw = serde_json::to_value(&callback)
        .map_err(|e| AppError::Internal(format!("cannot serialize callback: {}", e)))?;
    let event = CallbackEvent {
        kind: EventKind::C2b,
        external_id: trans_id.clone(),
        amount: c2b_amount(&callback.trans_amount),
        msisdn: callback.msisdn.trim().to_string(),
        invoice_ref: callback.bill_ref_number.trim().to_string(),
        transaction_id: trans_id,
        status: "completed".to_string(),
        response_description: String::new(),
        raw,
    };

    append_and_enqueue(&state, &cred, &event).await?;
    Ok(Json(json!({"ResultDesc": "Received"})))
}

fn reject(reason: &str) -> C2bValidationResponse {
    C2bValidationResponse {
        result_code: 1,
        result_desc: reason.to_string(),
    }
}

/// Bill-reference rules per credential: PayBill may require and
/// pattern-check the reference; BuyGoods ignores it entirely.
pub fn check_bill_ref(cred: &ProviderCredential, bill_ref: &str) -> Result<(), &'static str> {
    if cred.c2b_mode != "paybill" {
        return Ok(());
    }

    if cred.bill_ref_required && bill_ref.trim().is_empty() {
        return Err("BillRef required");
    }
    let pattern = cred.bill_ref_regex.trim();
    if !pattern.is_empty() {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(bill_ref) => {}
            _ => return Err("BillRef invalid"),
        }
    }
    Ok(())
}

fn c2b_amount(value: &JsonValue) -> i64 {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn credential(mode: &str, required: bool, regex: &str) -> ProviderCredential {
        ProviderCredential {
            id: 10,
            tenant_id: 1,
            provider: "mpesa_daraja".to_string(),
            shortcode: "174379".to_string(),
            environment: "sandbox".to_string(),
            webhook_token: "tok".to_string(),
            is_active: true,
            passkey_enc: String::new(),
            consumer_key_enc: String::new(),
            consumer_secret_enc: String::new(),
            c2b_mode: mode.to_string(),
            bill_ref_required: required,
            bill_ref_regex: regex.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn paybill_requires_bill_ref_when_configured() {
        let cred = credential("paybill", true, "");
        assert_eq!(check_bill_ref(&cred, ""), Err("BillRef required"));
        assert_eq!(check_bill_ref(&cred, "   "), Err("BillRef required"));
        assert_eq!(check_bill_ref(&cred, "INV-1"), Ok(()));
    }

    #[test]
    fn paybill_enforces_regex() {
        let cred = credential("paybill", true, r"^INV-\d+$");
        assert_eq!(check_bill_ref(&cred, "XYZ"), Err("BillRef invalid"));
        assert_eq!(check_bill_ref(&cred, "INV-12"), Ok(()));
    }

    #[test]
    fn paybill_without_requirement_still_checks_regex() {
        let cred = credential("paybill", false, r"^INV-\d+$");
        assert_eq!(check_bill_ref(&cred, "bogus"), Err("BillRef invalid"));
        assert_eq!(check_bill_ref(&cred, "INV-3"), Ok(()));
    }

    #[test]
    fn buygoods_ignores_bill_ref_entirely() {
        let cred = credential("buygoods", true, r"^INV-\d+$");
        assert_eq!(check_bill_ref(&cred, ""), Ok(()));
        assert_eq!(check_bill_ref(&cred, "anything"), Ok(()));
    }

    #[test]
    fn uncompilable_stored_regex_rejects() {
        let cred = credential("paybill", false, r"^INV-(\d+$");
        assert_eq!(check_bill_ref(&cred, "INV-1"), Err("BillRef invalid"));
    }

    #[test]
    fn c2b_amount_handles_string_and_number() {
        assert_eq!(c2b_amount(&serde_json::json!("100.00")), 100);
        assert_eq!(c2b_amount(&serde_json::json!(50)), 50);
        assert_eq!(c2b_amount(&serde_json::json!(null)), 0);
    }
}
