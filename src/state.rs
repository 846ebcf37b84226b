//! Shared application state handed to every handler.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::crypto::SecretBox;
use crate::middleware::rate_limit::RateLimiter;
use crate::providers::registry::ProviderRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub secrets: SecretBox,
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: RateLimiter,
}
