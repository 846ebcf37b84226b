//! Provider registry: resolves the adapter for a credential's provider type.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::database::credential_repository::ProviderCredential;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::provider::PaymentProvider;
use crate::providers::types::{Operation, ProviderKind};

/// Built once at startup and shared read-only afterwards.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        info!(
            provider = %provider.kind(),
            name = provider.name(),
            "registered payment provider"
        );
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> ProviderResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Unsupported {
                operation: format!("provider {} not registered", kind),
            })
    }

    pub fn for_credential(
        &self,
        cred: &ProviderCredential,
    ) -> ProviderResult<Arc<dyn PaymentProvider>> {
        let kind = ProviderKind::from_str(&cred.provider)?;
        self.get(kind)
    }

    pub fn supports(&self, kind: ProviderKind, operation: Operation) -> bool {
        self.providers
            .get(&kind)
            .map(|p| p.supported_operations().contains(&operation))
            .unwrap_or(false)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
