//! M-Pesa (Safaricom Daraja) adapter.
//!
//! Implements the provider contract against the Daraja REST API: OAuth token
//! acquisition with a per-(shortcode, environment) cache, STK push, B2C
//! payouts, C2B URL registration, and callback parsing for the three wire
//! shapes Daraja delivers (STK callback, C2B confirmation, B2C result).
//!
//! Daraja serializes numeric metadata inconsistently across environments
//! (number, string, or numeric-string); all extraction goes through the
//! flexible decoders at the bottom of this file.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{FixedOffset, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::crypto::{secure_eq, SecretBox};
use crate::database::credential_repository::ProviderCredential;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::{ProviderHttpClient, RequestAuth};
use crate::providers::provider::{CallbackHeaders, PaymentProvider};
use crate::providers::types::{
    B2cRequest, B2cResponse, CallbackEvent, CredentialField, EventKind, Operation, ProviderKind,
    StkPushRequest, StkPushResponse,
};

/// Side-channel header carrying the credential's webhook token. Daraja has no
/// signature of its own; when the header is absent validation passes.
pub const WEBHOOK_TOKEN_HEADER: &str = "x-pm-webhook-token";

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Daraja B2C initiator; provisioned per organization, not per shortcode.
    pub initiator_name: String,
    pub security_credential: String,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            initiator_name: "testapi".to_string(),
            security_credential: String::new(),
        }
    }
}

impl MpesaConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.timeout_secs = std::env::var("MPESA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.timeout_secs);
        cfg.max_retries = std::env::var("MPESA_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.max_retries);
        if let Ok(name) = std::env::var("MPESA_INITIATOR_NAME") {
            cfg.initiator_name = name;
        }
        if let Ok(sc) = std::env::var("MPESA_SECURITY_CREDENTIAL") {
            cfg.security_credential = sc;
        }
        cfg
    }
}

struct CachedToken {
    token: String,
    expires_at: chrono::DateTime<Utc>,
}

pub struct MpesaProvider {
    config: MpesaConfig,
    http: ProviderHttpClient,
    secrets: SecretBox,
    token_cache: Mutex<HashMap<String, CachedToken>>,
}

impl MpesaProvider {
    pub fn new(config: MpesaConfig, secrets: SecretBox) -> ProviderResult<Self> {
        let http = ProviderHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            config,
            http,
            secrets,
            token_cache: Mutex::new(HashMap::new()),
        })
    }

    fn decrypt(&self, ciphertext: &str, field: &str) -> ProviderResult<String> {
        self.secrets
            .decrypt(ciphertext)
            .map_err(|e| ProviderError::Crypto {
                message: format!("cannot decrypt {}: {}", field, e),
            })
    }

    async fn access_token(&self, cred: &ProviderCredential) -> ProviderResult<String> {
        let cache_key = token_cache_key(cred);
        {
            let cache = self.token_cache.lock().await;
            if let Some(cached) = cache.get(&cache_key) {
                let refresh_margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
                if cached.expires_at > Utc::now() + refresh_margin {
                    return Ok(cached.token.clone());
                }
            }
        }

        let consumer_key = self.decrypt(&cred.consumer_key_enc, "consumer key")?;
        let consumer_secret = self.decrypt(&cred.consumer_secret_enc, "consumer secret")?;

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            base_url(&cred.environment)
        );
        let response: OauthTokenResponse = self
            .http
            .request_json(
                reqwest::Method::GET,
                &url,
                RequestAuth::Basic {
                    user: &consumer_key,
                    password: &consumer_secret,
                },
                None,
            )
            .await?;

        let ttl_secs = response
            .expires_in
            .as_ref()
            .and_then(json_i64)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_secs);

        let mut cache = self.token_cache.lock().await;
        cache.insert(
            cache_key,
            CachedToken {
                token: response.access_token.clone(),
                expires_at,
            },
        );
        Ok(response.access_token)
    }

    async fn invalidate_token(&self, cred: &ProviderCredential) {
        self.token_cache.lock().await.remove(&token_cache_key(cred));
    }

    /// Authenticated POST with a single retry after a token refresh: any 4xx
    /// from Daraja usually means the cached token expired server-side, so the
    /// cached token is cleared and the call repeated once with a fresh one.
    async fn authed_post<T: serde::de::DeserializeOwned>(
        &self,
        cred: &ProviderCredential,
        url: &str,
        payload: &JsonValue,
    ) -> ProviderResult<T> {
        let token = self.access_token(cred).await?;
        match self
            .http
            .request_json(
                reqwest::Method::POST,
                url,
                RequestAuth::Bearer(&token),
                Some(payload),
            )
            .await
        {
            Err(err) if is_client_error(&err) => {
                warn!(shortcode = %cred.shortcode, "daraja rejected request, refreshing token: {}", err);
                self.invalidate_token(cred).await;
                let token = self.access_token(cred).await?;
                self.http
                    .request_json(
                        reqwest::Method::POST,
                        url,
                        RequestAuth::Bearer(&token),
                        Some(payload),
                    )
                    .await
            }
            other => other,
        }
    }
}

/// True for any HTTP 4xx coming back from an authenticated provider call:
/// 401/403 surface as `Auth`, the rest as `Rejected` carrying the status
/// code. Both clear the cached token and earn one retry.
fn is_client_error(err: &ProviderError) -> bool {
    match err {
        ProviderError::Auth { .. } => true,
        ProviderError::Rejected {
            code: Some(code), ..
        } => matches!(code.parse::<u16>(), Ok(status) if (400..500).contains(&status)),
        _ => false,
    }
}

#[async_trait]
impl PaymentProvider for MpesaProvider {
    async fn initiate_stk_push(
        &self,
        cred: &ProviderCredential,
        request: StkPushRequest,
    ) -> ProviderResult<StkPushResponse> {
        validate_stk_request(&request)?;

        let timestamp = daraja_timestamp();
        let passkey = self.decrypt(&cred.passkey_enc, "passkey")?;
        let password = stk_password(&cred.shortcode, &passkey, &timestamp);

        let payload = serde_json::json!({
            "BusinessShortCode": cred.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount,
            "PartyA": request.msisdn,
            "PartyB": cred.shortcode,
            "PhoneNumber": request.msisdn,
            "CallBackURL": request.callback_url,
            "AccountReference": request.account_ref,
            "TransactionDesc": request.description,
        });

        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            base_url(&cred.environment)
        );
        let response: StkPushEnvelope = self.authed_post(cred, &url, &payload).await?;

        if let Some(code) = response.error_code {
            return Err(ProviderError::Rejected {
                code: Some(code),
                message: response.error_message.unwrap_or_default(),
            });
        }
        if response.response_code.as_deref() != Some("0") {
            return Err(ProviderError::Rejected {
                code: response.response_code,
                message: response.response_description.unwrap_or_default(),
            });
        }

        let external_id = response.checkout_request_id.unwrap_or_default();
        if external_id.is_empty() {
            return Err(ProviderError::Rejected {
                code: None,
                message: "daraja response missing CheckoutRequestID".to_string(),
            });
        }

        info!(
            shortcode = %cred.shortcode,
            checkout_request_id = %external_id,
            amount = request.amount,
            "stk push initiated"
        );

        Ok(StkPushResponse {
            external_id,
            message: response.customer_message.unwrap_or_default(),
            provider_reference: response.merchant_request_id.unwrap_or_default(),
        })
    }

    async fn initiate_b2c(
        &self,
        cred: &ProviderCredential,
        request: B2cRequest,
    ) -> ProviderResult<B2cResponse> {
        if request.amount <= 0 {
            return Err(ProviderError::Validation {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if request.msisdn.trim().is_empty() {
            return Err(ProviderError::Validation {
                message: "msisdn is required".to_string(),
                field: Some("msisdn".to_string()),
            });
        }

        let payload = serde_json::json!({
            "InitiatorName": self.config.initiator_name,
            "SecurityCredential": self.config.security_credential,
            "CommandID": request.command.as_str(),
            "Amount": request.amount,
            "PartyA": cred.shortcode,
            "PartyB": request.msisdn,
            "Remarks": request.description,
            "QueueTimeOutURL": request.timeout_url,
            "ResultURL": request.result_url,
            "Occasion": request.occasion.unwrap_or_default(),
        });

        let url = format!(
            "{}/mpesa/b2c/v1/paymentrequest",
            base_url(&cred.environment)
        );
        let response: B2cEnvelope = self.authed_post(cred, &url, &payload).await?;

        if let Some(code) = response.error_code {
            return Err(ProviderError::Rejected {
                code: Some(code),
                message: response.error_message.unwrap_or_default(),
            });
        }
        if response.response_code.as_deref() != Some("0") {
            return Err(ProviderError::Rejected {
                code: response.response_code,
                message: response.response_description.unwrap_or_default(),
            });
        }

        let external_id = response.conversation_id.unwrap_or_default();
        if external_id.is_empty() {
            return Err(ProviderError::Rejected {
                code: None,
                message: "daraja response missing ConversationID".to_string(),
            });
        }

        info!(
            shortcode = %cred.shortcode,
            conversation_id = %external_id,
            amount = request.amount,
            "b2c payout initiated"
        );

        Ok(B2cResponse {
            external_id,
            message: response.response_description.unwrap_or_default(),
            provider_reference: response.originator_conversation_id.unwrap_or_default(),
        })
    }

    async fn register_c2b_urls(
        &self,
        cred: &ProviderCredential,
        confirmation_url: &str,
        validation_url: &str,
        response_type: &str,
    ) -> ProviderResult<()> {
        let payload = serde_json::json!({
            "ShortCode": cred.shortcode,
            "ResponseType": response_type,
            "ConfirmationURL": confirmation_url,
            "ValidationURL": validation_url,
        });

        let url = format!("{}/mpesa/c2b/v1/registerurl", base_url(&cred.environment));
        let _: JsonValue = self.authed_post(cred, &url, &payload).await?;

        info!(shortcode = %cred.shortcode, "c2b urls registered");
        Ok(())
    }

    fn parse_callback(
        &self,
        body: &[u8],
        _headers: &CallbackHeaders,
    ) -> ProviderResult<CallbackEvent> {
        let value: JsonValue =
            serde_json::from_slice(body).map_err(|e| ProviderError::BadPayload {
                message: format!("invalid callback JSON: {}", e),
            })?;

        parse_stk_callback(&value)
            .or_else(|| parse_c2b_confirmation(&value))
            .or_else(|| parse_b2c_result(&value))
            .ok_or_else(|| ProviderError::BadPayload {
                message: "unrecognized callback shape".to_string(),
            })
    }

    fn validate_callback(
        &self,
        _body: &[u8],
        headers: &CallbackHeaders,
        webhook_token: &str,
    ) -> ProviderResult<()> {
        // Daraja supplies no signature. The only check available is the
        // side-channel token header when the caller sends one.
        if let Some(presented) = headers.get(WEBHOOK_TOKEN_HEADER) {
            if !secure_eq(presented.trim().as_bytes(), webhook_token.as_bytes()) {
                return Err(ProviderError::BadSignature {
                    message: "webhook token mismatch".to_string(),
                });
            }
        }
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::MpesaDaraja
    }

    fn name(&self) -> &'static str {
        "M-Pesa (Safaricom Daraja)"
    }

    fn supported_operations(&self) -> &'static [Operation] {
        &[Operation::StkPush, Operation::C2b, Operation::B2c]
    }

    fn required_credential_fields(&self) -> &'static [CredentialField] {
        &[
            CredentialField {
                name: "shortcode",
                display_name: "Business Shortcode",
                required: true,
                secret: false,
            },
            CredentialField {
                name: "consumer_key",
                display_name: "Consumer Key",
                required: true,
                secret: true,
            },
            CredentialField {
                name: "consumer_secret",
                display_name: "Consumer Secret",
                required: true,
                secret: true,
            },
            CredentialField {
                name: "passkey",
                display_name: "LipaNaMpesa Passkey",
                required: true,
                secret: true,
            },
            CredentialField {
                name: "environment",
                display_name: "Environment",
                required: true,
                secret: false,
            },
        ]
    }
}

fn base_url(environment: &str) -> &'static str {
    if environment == "production" {
        PRODUCTION_BASE_URL
    } else {
        SANDBOX_BASE_URL
    }
}

fn token_cache_key(cred: &ProviderCredential) -> String {
    format!("{}_{}", cred.shortcode, cred.environment)
}

/// Daraja password stamp: YYYYMMDDHHMMSS in UTC+3, regardless of host TZ.
fn daraja_timestamp() -> String {
    let eat = FixedOffset::east_opt(3 * 3600).expect("UTC+3 is a valid offset");
    Utc::now()
        .with_timezone(&eat)
        .format("%Y%m%d%H%M%S")
        .to_string()
}

fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

fn validate_stk_request(request: &StkPushRequest) -> ProviderResult<()> {
    if request.amount <= 0 {
        return Err(ProviderError::Validation {
            message: "amount must be greater than zero".to_string(),
            field: Some("amount".to_string()),
        });
    }
    if request.msisdn.trim().is_empty() {
        return Err(ProviderError::Validation {
            message: "msisdn is required".to_string(),
            field: Some("msisdn".to_string()),
        });
    }
    if request.account_ref.trim().is_empty() {
        return Err(ProviderError::Validation {
            message: "account reference is required".to_string(),
            field: Some("account_ref".to_string()),
        });
    }
    Ok(())
}

/// STK callback: `Body.stkCallback` with a non-empty CheckoutRequestID.
fn parse_stk_callback(value: &JsonValue) -> Option<CallbackEvent> {
    let callback = value.get("Body")?.get("stkCallback")?;
    let checkout_id = callback.get("CheckoutRequestID")?.as_str()?;
    if checkout_id.is_empty() {
        return None;
    }

    let result_code = callback.get("ResultCode").and_then(json_i64).unwrap_or(-1);
    let result_desc = callback
        .get("ResultDesc")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let mut amount = 0;
    let mut msisdn = String::new();
    let mut invoice_ref = String::new();
    let mut receipt = String::new();
    if let Some(items) = callback
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(|i| i.as_array())
    {
        for item in items {
            let name = item.get("Name").and_then(|v| v.as_str()).unwrap_or("");
            let item_value = item.get("Value");
            match name {
                "Amount" => amount = item_value.and_then(json_i64).unwrap_or(0),
                "PhoneNumber" => msisdn = item_value.and_then(json_string).unwrap_or_default(),
                "AccountReference" => {
                    invoice_ref = item_value.and_then(json_string).unwrap_or_default()
                }
                "MpesaReceiptNumber" => {
                    receipt = item_value.and_then(json_string).unwrap_or_default()
                }
                _ => {}
            }
        }
    }

    Some(CallbackEvent {
        kind: EventKind::Stk,
        external_id: checkout_id.to_string(),
        amount,
        msisdn,
        invoice_ref,
        transaction_id: receipt,
        status: settlement_status(result_code == 0),
        response_description: result_desc.to_string(),
        raw: value.clone(),
    })
}

/// C2B confirmation: flat object with a non-empty TransID. These only arrive
/// for confirmed payments, so the status is always completed.
fn parse_c2b_confirmation(value: &JsonValue) -> Option<CallbackEvent> {
    let trans_id = value.get("TransID")?.as_str()?;
    if trans_id.is_empty() {
        return None;
    }

    Some(CallbackEvent {
        kind: EventKind::C2b,
        external_id: trans_id.to_string(),
        amount: value.get("TransAmount").and_then(json_i64).unwrap_or(0),
        msisdn: value
            .get("MSISDN")
            .and_then(json_string)
            .unwrap_or_default(),
        invoice_ref: value
            .get("BillRefNumber")
            .and_then(json_string)
            .unwrap_or_default(),
        transaction_id: trans_id.to_string(),
        status: "completed".to_string(),
        response_description: String::new(),
        raw: value.clone(),
    })
}

/// B2C result: `Result` with a non-empty ConversationID.
fn parse_b2c_result(value: &JsonValue) -> Option<CallbackEvent> {
    let result = value.get("Result")?;
    let conversation_id = result.get("ConversationID")?.as_str()?;
    if conversation_id.is_empty() {
        return None;
    }

    let result_code = result.get("ResultCode").and_then(json_i64).unwrap_or(-1);
    let result_desc = result
        .get("ResultDesc")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let mut amount = 0;
    let mut receipt = String::new();
    let mut receiver = String::new();
    if let Some(params) = result
        .get("ResultParameters")
        .and_then(|p| p.get("ResultParameter"))
        .and_then(|p| p.as_array())
    {
        for param in params {
            let key = param.get("Key").and_then(|v| v.as_str()).unwrap_or("");
            let param_value = param.get("Value");
            match key {
                "TransactionAmount" => amount = param_value.and_then(json_i64).unwrap_or(0),
                "TransactionReceipt" => {
                    receipt = param_value.and_then(json_string).unwrap_or_default()
                }
                "ReceiverPartyPublicName" => {
                    receiver = param_value.and_then(json_string).unwrap_or_default()
                }
                _ => {}
            }
        }
    }

    // ReceiverPartyPublicName looks like "254712345678 - JOHN DOE".
    let msisdn = receiver
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    Some(CallbackEvent {
        kind: EventKind::B2c,
        external_id: conversation_id.to_string(),
        amount,
        msisdn,
        invoice_ref: String::new(),
        transaction_id: receipt,
        status: settlement_status(result_code == 0),
        response_description: result_desc.to_string(),
        raw: value.clone(),
    })
}

fn settlement_status(success: bool) -> String {
    if success { "completed" } else { "failed" }.to_string()
}

/// Accept number, string, and numeric-string renditions of an integer amount.
fn json_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

fn json_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(
            n.as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| format!("{:.0}", n.as_f64().unwrap_or(0.0))),
        ),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct StkPushEnvelope {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct B2cEnvelope {
    #[serde(rename = "ConversationID")]
    conversation_id: Option<String>,
    #[serde(rename = "OriginatorConversationID")]
    originator_conversation_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers() -> CallbackHeaders {
        CallbackHeaders::new()
    }

    fn provider() -> MpesaProvider {
        MpesaProvider::new(
            MpesaConfig::default(),
            SecretBox::new(&[1u8; 32]).expect("key"),
        )
        .expect("provider init should succeed")
    }

    fn stk_callback(result_code: i64) -> JsonValue {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_X1",
                    "ResultCode": result_code,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 100.0},
                            {"Name": "MpesaReceiptNumber", "Value": "RAA1234"},
                            {"Name": "PhoneNumber", "Value": 254712345678u64},
                            {"Name": "AccountReference", "Value": "INV-7"}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn stk_callback_parses_success() {
        let event = provider()
            .parse_callback(stk_callback(0).to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.kind, EventKind::Stk);
        assert_eq!(event.external_id, "ws_CO_X1");
        assert_eq!(event.amount, 100);
        assert_eq!(event.msisdn, "254712345678");
        assert_eq!(event.invoice_ref, "INV-7");
        assert_eq!(event.transaction_id, "RAA1234");
        assert_eq!(event.status, "completed");
    }

    #[test]
    fn stk_callback_with_nonzero_result_code_is_failed() {
        let event = provider()
            .parse_callback(stk_callback(1032).to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.status, "failed");
        assert_eq!(event.external_id, "ws_CO_X1");
    }

    #[test]
    fn stk_metadata_accepts_string_numbers() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_X2",
                    "ResultCode": "0",
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": "250.00"},
                            {"Name": "PhoneNumber", "Value": "254700000001"}
                        ]
                    }
                }
            }
        });
        let event = provider()
            .parse_callback(body.to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.amount, 250);
        assert_eq!(event.msisdn, "254700000001");
        assert_eq!(event.status, "completed");
    }

    #[test]
    fn c2b_confirmation_parses() {
        let body = json!({
            "TransactionType": "Pay Bill",
            "TransID": "ABC1",
            "TransTime": "20260801121500",
            "TransAmount": "50.00",
            "BusinessShortCode": "174379",
            "BillRefNumber": "INV-9",
            "MSISDN": "254712345678"
        });
        let event = provider()
            .parse_callback(body.to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.kind, EventKind::C2b);
        assert_eq!(event.external_id, "ABC1");
        assert_eq!(event.amount, 50);
        assert_eq!(event.invoice_ref, "INV-9");
        assert_eq!(event.status, "completed");
    }

    #[test]
    fn b2c_result_parses_success_and_failure() {
        let body = json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "OriginatorConversationID": "10571-7910404-1",
                "ConversationID": "AG_20260801_000001",
                "TransactionID": "RAA5678",
                "ResultParameters": {
                    "ResultParameter": [
                        {"Key": "TransactionAmount", "Value": 1500},
                        {"Key": "TransactionReceipt", "Value": "RAA5678"},
                        {"Key": "ReceiverPartyPublicName", "Value": "254722000000 - JANE DOE"}
                    ]
                }
            }
        });
        let event = provider()
            .parse_callback(body.to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.kind, EventKind::B2c);
        assert_eq!(event.external_id, "AG_20260801_000001");
        assert_eq!(event.amount, 1500);
        assert_eq!(event.msisdn, "254722000000");
        assert_eq!(event.transaction_id, "RAA5678");
        assert_eq!(event.status, "completed");

        let failed = json!({
            "Result": {
                "ResultCode": 2001,
                "ResultDesc": "The initiator information is invalid.",
                "ConversationID": "AG_20260801_000002"
            }
        });
        let event = provider()
            .parse_callback(failed.to_string().as_bytes(), &headers())
            .expect("parse");
        assert_eq!(event.status, "failed");
    }

    #[test]
    fn unrecognized_shape_is_bad_payload() {
        let result = provider().parse_callback(br#"{"hello": "world"}"#, &headers());
        assert!(matches!(result, Err(ProviderError::BadPayload { .. })));

        let result = provider().parse_callback(b"not json", &headers());
        assert!(matches!(result, Err(ProviderError::BadPayload { .. })));
    }

    #[test]
    fn validate_passes_without_token_header() {
        let provider = provider();
        assert!(provider
            .validate_callback(b"{}", &headers(), "tok-1")
            .is_ok());
    }

    #[test]
    fn validate_enforces_token_header_when_present() {
        let provider = provider();
        let mut hdrs = headers();
        hdrs.insert(WEBHOOK_TOKEN_HEADER.to_string(), "tok-1".to_string());
        assert!(provider.validate_callback(b"{}", &hdrs, "tok-1").is_ok());

        hdrs.insert(WEBHOOK_TOKEN_HEADER.to_string(), "tok-2".to_string());
        assert!(matches!(
            provider.validate_callback(b"{}", &hdrs, "tok-1"),
            Err(ProviderError::BadSignature { .. })
        ));
    }

    #[test]
    fn stk_password_matches_daraja_formula() {
        let password = stk_password("174379", "passkey", "20260801120000");
        let decoded = BASE64.decode(password).expect("base64");
        assert_eq!(decoded, b"174379passkey20260801120000");
    }

    #[test]
    fn daraja_timestamp_is_fourteen_digits() {
        let ts = daraja_timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn flexible_decoding_handles_all_numeric_renditions() {
        assert_eq!(json_i64(&json!(100)), Some(100));
        assert_eq!(json_i64(&json!(100.4)), Some(100));
        assert_eq!(json_i64(&json!("100.00")), Some(100));
        assert_eq!(json_i64(&json!("garbage")), None);
        assert_eq!(json_i64(&json!(null)), None);

        assert_eq!(json_string(&json!(254712345678u64)).as_deref(), Some("254712345678"));
        assert_eq!(json_string(&json!("254712345678")).as_deref(), Some("254712345678"));
    }

    #[test]
    fn every_http_4xx_clears_the_cached_token() {
        assert!(is_client_error(&ProviderError::Auth {
            message: "HTTP 401".to_string()
        }));
        for status in ["400", "404", "409", "422"] {
            assert!(is_client_error(&ProviderError::Rejected {
                code: Some(status.to_string()),
                message: format!("HTTP {}", status),
            }));
        }

        // Server errors and transport failures retry via backoff, not via a
        // token refresh; malformed bodies carry no status at all.
        assert!(!is_client_error(&ProviderError::Rejected {
            code: Some("500".to_string()),
            message: "HTTP 500".to_string(),
        }));
        assert!(!is_client_error(&ProviderError::Rejected {
            code: None,
            message: "invalid provider JSON response".to_string(),
        }));
        assert!(!is_client_error(&ProviderError::Network {
            message: "timeout".to_string()
        }));
    }

    #[test]
    fn stk_request_validation_rejects_bad_input() {
        let base = StkPushRequest {
            amount: 100,
            msisdn: "254712345678".to_string(),
            account_ref: "INV-7".to_string(),
            description: "order".to_string(),
            callback_url: "https://example.com/hooks/mpesa/174379".to_string(),
        };
        assert!(validate_stk_request(&base).is_ok());

        let mut bad = base.clone();
        bad.amount = 0;
        assert!(validate_stk_request(&bad).is_err());

        let mut bad = base.clone();
        bad.msisdn = "  ".to_string();
        assert!(validate_stk_request(&bad).is_err());

        let mut bad = base;
        bad.account_ref = String::new();
        assert!(validate_stk_request(&bad).is_err());
    }
}
