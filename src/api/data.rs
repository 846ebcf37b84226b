//! Tenant-scoped listing endpoints.

use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::database::event_repository::{EventListItem, EventRepository};
use crate::database::payment_repository::{PaymentRecord, PaymentRepository};
use crate::error::AppError;
use crate::middleware::auth::TenantContext;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `GET /v1/payments?limit&offset`
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PaymentRecord>>, AppError> {
    let payments = PaymentRepository::new(state.pool.clone());
    let rows = payments
        .list(tenant.tenant_id, params.limit(), params.offset())
        .await?;
    Ok(Json(rows))
}

/// `GET /v1/events?limit&offset`
pub async fn list_events(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<EventListItem>>, AppError> {
    let events = EventRepository::new(state.pool.clone());
    let rows = events
        .list(tenant.tenant_id, params.limit(), params.offset())
        .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_defaulted_and_clamped() {
        assert_eq!(ListParams::default().limit(), 50);
        assert_eq!(
            ListParams {
                limit: Some(500),
                offset: None
            }
            .limit(),
            200
        );
        assert_eq!(
            ListParams {
                limit: Some(0),
                offset: None
            }
            .limit(),
            1
        );
    }

    #[test]
    fn offset_is_never_negative() {
        assert_eq!(
            ListParams {
                limit: None,
                offset: Some(-10)
            }
            .offset(),
            0
        );
        assert_eq!(
            ListParams {
                limit: None,
                offset: Some(25)
            }
            .offset(),
            25
        );
    }
}
