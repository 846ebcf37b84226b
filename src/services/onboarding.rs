//! Tenant onboarding: one admin call provisions the tenant, its first API
//! key, and an encrypted provider credential.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::{hash_api_key, random_hex, SecretBox};
use crate::database::credential_repository::{CredentialRepository, NewProviderCredential};
use crate::database::tenant_repository::TenantRepository;
use crate::error::AppError;

pub const C2B_MODE_PAYBILL: &str = "paybill";
pub const C2B_MODE_BUYGOODS: &str = "buygoods";

const DEFAULT_PROVIDER: &str = "mpesa_daraja";
const API_KEY_BYTES: usize = 32;
const WEBHOOK_TOKEN_BYTES: usize = 24;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub name: String,
    #[serde(default)]
    pub api_key_name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub shortcode: String,
    pub environment: String,
    pub c2b_mode: String,
    #[serde(default)]
    pub bill_ref_required: Option<bool>,
    #[serde(default)]
    pub bill_ref_regex: Option<String>,
    pub passkey: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub tenant_id: i64,
    /// Plaintext key, returned exactly once; only its hash is stored.
    pub api_key: String,
    pub api_key_name: String,
    pub webhook_token: String,
    pub shortcode: String,
    pub environment: String,
    pub c2b_mode: String,
    pub bill_ref_required: bool,
    pub bill_ref_regex: String,
}

pub struct OnboardingService {
    tenants: TenantRepository,
    credentials: CredentialRepository,
    secrets: SecretBox,
}

impl OnboardingService {
    pub fn new(
        tenants: TenantRepository,
        credentials: CredentialRepository,
        secrets: SecretBox,
    ) -> Self {
        Self {
            tenants,
            credentials,
            secrets,
        }
    }

    pub async fn onboard(&self, req: OnboardingRequest) -> Result<OnboardingResponse, AppError> {
        let input = validate_request(req)?;

        let tenant = self.tenants.create_tenant(&input.name).await?;

        let api_key = random_hex(API_KEY_BYTES);
        let key_name = input.api_key_name;
        self.tenants
            .insert_api_key(tenant.id, &key_name, &hash_api_key(&api_key))
            .await?;

        let webhook_token = random_hex(WEBHOOK_TOKEN_BYTES);
        let cred = self
            .credentials
            .insert(NewProviderCredential {
                tenant_id: tenant.id,
                provider: input.provider,
                shortcode: input.shortcode,
                environment: input.environment,
                webhook_token,
                passkey_enc: self.secrets.encrypt(&input.passkey)?,
                consumer_key_enc: self.secrets.encrypt(&input.consumer_key)?,
                consumer_secret_enc: self.secrets.encrypt(&input.consumer_secret)?,
                c2b_mode: input.c2b_mode,
                bill_ref_required: input.bill_ref_required,
                bill_ref_regex: input.bill_ref_regex,
            })
            .await?;

        info!(
            tenant_id = tenant.id,
            shortcode = %cred.shortcode,
            environment = %cred.environment,
            "tenant onboarded"
        );

        Ok(OnboardingResponse {
            tenant_id: tenant.id,
            api_key,
            api_key_name: key_name,
            webhook_token: cred.webhook_token,
            shortcode: cred.shortcode,
            environment: cred.environment,
            c2b_mode: cred.c2b_mode,
            bill_ref_required: cred.bill_ref_required,
            bill_ref_regex: cred.bill_ref_regex,
        })
    }
}

struct ValidatedRequest {
    name: String,
    api_key_name: String,
    provider: String,
    shortcode: String,
    environment: String,
    c2b_mode: String,
    bill_ref_required: bool,
    bill_ref_regex: String,
    passkey: String,
    consumer_key: String,
    consumer_secret: String,
}

fn validate_request(req: OnboardingRequest) -> Result<ValidatedRequest, AppError> {
    let environment = req.environment.trim().to_lowercase();
    if environment != "sandbox" && environment != "production" {
        return Err(AppError::Validation(
            "environment must be sandbox|production".to_string(),
        ));
    }

    let c2b_mode = req.c2b_mode.trim().to_lowercase();
    if c2b_mode != C2B_MODE_PAYBILL && c2b_mode != C2B_MODE_BUYGOODS {
        return Err(AppError::Validation(
            "c2bMode must be paybill|buygoods".to_string(),
        ));
    }

    let name = req.name.trim().to_string();
    let shortcode = req.shortcode.trim().to_string();
    let passkey = req.passkey.trim().to_string();
    let consumer_key = req.consumer_key.trim().to_string();
    let consumer_secret = req.consumer_secret.trim().to_string();
    if name.is_empty()
        || shortcode.is_empty()
        || passkey.is_empty()
        || consumer_key.is_empty()
        || consumer_secret.is_empty()
    {
        return Err(AppError::Validation(
            "name, shortcode, passkey, consumerKey, consumerSecret are required".to_string(),
        ));
    }

    // PayBill customers type a bill reference; BuyGoods has none to require.
    let bill_ref_required = req
        .bill_ref_required
        .unwrap_or(c2b_mode == C2B_MODE_PAYBILL);

    let bill_ref_regex = req
        .bill_ref_regex
        .map(|r| r.trim().to_string())
        .unwrap_or_default();
    if !bill_ref_regex.is_empty() && Regex::new(&bill_ref_regex).is_err() {
        return Err(AppError::Validation("invalid billRefRegex".to_string()));
    }

    Ok(ValidatedRequest {
        name,
        api_key_name: req
            .api_key_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "default".to_string()),
        provider: req
            .provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        shortcode,
        environment,
        c2b_mode,
        bill_ref_required,
        bill_ref_regex,
        passkey,
        consumer_key,
        consumer_secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OnboardingRequest {
        OnboardingRequest {
            name: "Acme Ltd".to_string(),
            api_key_name: None,
            provider: None,
            shortcode: "174379".to_string(),
            environment: "sandbox".to_string(),
            c2b_mode: "paybill".to_string(),
            bill_ref_required: None,
            bill_ref_regex: None,
            passkey: "pk".to_string(),
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
        }
    }

    #[test]
    fn defaults_are_applied() {
        let validated = validate_request(request()).expect("valid");
        assert_eq!(validated.provider, "mpesa_daraja");
        assert_eq!(validated.api_key_name, "default");
        assert!(validated.bill_ref_required);
    }

    #[test]
    fn buygoods_defaults_bill_ref_to_optional() {
        let mut req = request();
        req.c2b_mode = "buygoods".to_string();
        let validated = validate_request(req).expect("valid");
        assert!(!validated.bill_ref_required);
    }

    #[test]
    fn explicit_bill_ref_required_wins_over_mode_default() {
        let mut req = request();
        req.c2b_mode = "buygoods".to_string();
        req.bill_ref_required = Some(true);
        let validated = validate_request(req).expect("valid");
        assert!(validated.bill_ref_required);
    }

    #[test]
    fn rejects_unknown_environment_and_mode() {
        let mut req = request();
        req.environment = "staging".to_string();
        assert!(validate_request(req).is_err());

        let mut req = request();
        req.c2b_mode = "tillnumber".to_string();
        assert!(validate_request(req).is_err());
    }

    #[test]
    fn rejects_missing_secrets() {
        let mut req = request();
        req.consumer_secret = "  ".to_string();
        assert!(validate_request(req).is_err());
    }

    #[test]
    fn rejects_regex_that_does_not_compile() {
        let mut req = request();
        req.bill_ref_regex = Some("^INV-(\\d+$".to_string());
        assert!(validate_request(req).is_err());

        let mut req = request();
        req.bill_ref_regex = Some("^INV-\\d+$".to_string());
        assert!(validate_request(req).is_ok());
    }
}
