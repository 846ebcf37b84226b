//! The provider adapter contract.
//!
//! Every mobile-money rail is plugged in through this trait: initiation RPCs,
//! pure callback parsing/validation, and provisioning metadata. Dispatch by
//! `ProviderKind` happens in the registry.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::database::credential_repository::ProviderCredential;
use crate::providers::error::ProviderResult;
use crate::providers::types::{
    B2cRequest, B2cResponse, CallbackEvent, CredentialField, Operation, ProviderKind,
    StkPushRequest, StkPushResponse,
};

/// Request headers as a lowercase-keyed map, so adapters stay independent of
/// the HTTP framework.
pub type CallbackHeaders = HashMap<String, String>;

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn initiate_stk_push(
        &self,
        cred: &ProviderCredential,
        request: StkPushRequest,
    ) -> ProviderResult<StkPushResponse>;

    async fn initiate_b2c(
        &self,
        cred: &ProviderCredential,
        request: B2cRequest,
    ) -> ProviderResult<B2cResponse>;

    async fn register_c2b_urls(
        &self,
        cred: &ProviderCredential,
        confirmation_url: &str,
        validation_url: &str,
        response_type: &str,
    ) -> ProviderResult<()>;

    /// Pure transformation of a provider callback body into the canonical
    /// event. No persistence, no network.
    fn parse_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> ProviderResult<CallbackEvent>;

    /// Verify callback authenticity against the credential's webhook token.
    fn validate_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
        webhook_token: &str,
    ) -> ProviderResult<()>;

    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str;

    fn supported_operations(&self) -> &'static [Operation];

    fn required_credential_fields(&self) -> &'static [CredentialField];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;
    use chrono::Utc;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        async fn initiate_stk_push(
            &self,
            _cred: &ProviderCredential,
            request: StkPushRequest,
        ) -> ProviderResult<StkPushResponse> {
            Ok(StkPushResponse {
                external_id: format!("ws_CO_{}", request.account_ref),
                message: "prompt sent".to_string(),
                provider_reference: "mock_ref".to_string(),
            })
        }

        async fn initiate_b2c(
            &self,
            _cred: &ProviderCredential,
            _request: B2cRequest,
        ) -> ProviderResult<B2cResponse> {
            Ok(B2cResponse {
                external_id: "AG_mock".to_string(),
                message: "accepted".to_string(),
                provider_reference: "mock_b2c".to_string(),
            })
        }

        async fn register_c2b_urls(
            &self,
            _cred: &ProviderCredential,
            _confirmation_url: &str,
            _validation_url: &str,
            _response_type: &str,
        ) -> ProviderResult<()> {
            Ok(())
        }

        fn parse_callback(
            &self,
            _body: &[u8],
            _headers: &CallbackHeaders,
        ) -> ProviderResult<CallbackEvent> {
            Err(ProviderError::BadPayload {
                message: "mock".to_string(),
            })
        }

        fn validate_callback(
            &self,
            _body: &[u8],
            _headers: &CallbackHeaders,
            _webhook_token: &str,
        ) -> ProviderResult<()> {
            Ok(())
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::MpesaDaraja
        }

        fn name(&self) -> &'static str {
            "mock"
        }

        fn supported_operations(&self) -> &'static [Operation] {
            &[Operation::StkPush]
        }

        fn required_credential_fields(&self) -> &'static [CredentialField] {
            &[]
        }
    }

    fn sample_credential() -> ProviderCredential {
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
            c2b_mode: "paybill".to_string(),
            bill_ref_required: true,
            bill_ref_regex: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);
        let response = provider
            .initiate_stk_push(
                &sample_credential(),
                StkPushRequest {
                    amount: 100,
                    msisdn: "254712345678".to_string(),
                    account_ref: "INV-7".to_string(),
                    description: "order".to_string(),
                    callback_url: "https://example.com/hooks/mpesa/174379".to_string(),
                },
            )
            .await
            .expect("stk initiation should succeed");
        assert_eq!(response.external_id, "ws_CO_INV-7");

        let event = provider.parse_callback(b"{}", &CallbackHeaders::new());
        assert!(matches!(event, Err(ProviderError::BadPayload { .. })));
    }
}
