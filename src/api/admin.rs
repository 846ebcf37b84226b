//! Admin surface: tenant onboarding and event replay. Both sit behind the
//! static admin token gate.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::credential_repository::CredentialRepository;
use crate::database::event_repository::EventRepository;
use crate::database::queue_repository::QueueRepository;
use crate::database::tenant_repository::TenantRepository;
use crate::error::AppError;
use crate::services::onboarding::{OnboardingRequest, OnboardingResponse, OnboardingService};
use crate::services::replay::{ReplayRequest, ReplayService};
use crate::state::AppState;

/// `POST /v1/admin/tenants/onboard`
pub async fn onboard_tenant(
    State(state): State<AppState>,
    Json(request): Json<OnboardingRequest>,
) -> Result<Json<OnboardingResponse>, AppError> {
    let service = OnboardingService::new(
        TenantRepository::new(state.pool.clone()),
        CredentialRepository::new(state.pool.clone(), state.secrets.clone()),
        state.secrets.clone(),
    );
    let response = service.onboard(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayApiRequest {
    pub tenant_id: i64,
    #[serde(default)]
    pub event_ids: Vec<i64>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max: i64,
}

#[derive(Debug, Serialize)]
pub struct ReplayApiResponse {
    pub requeued: usize,
}

/// `POST /admin/events/replay`: requeue events by id list or time window.
pub async fn replay_events(
    State(state): State<AppState>,
    Json(request): Json<ReplayApiRequest>,
) -> Result<Json<ReplayApiResponse>, AppError> {
    if request.tenant_id <= 0 {
        return Err(AppError::Validation("tenantId is required".to_string()));
    }

    let service = ReplayService::new(
        EventRepository::new(state.pool.clone()),
        QueueRepository::new(state.pool.clone()),
    );
    let outcome = service
        .replay(
            request.tenant_id,
            ReplayRequest {
                event_ids: request.event_ids,
                since: request.since,
                until: request.until,
                max: request.max,
            },
        )
        .await?;

    Ok(Json(ReplayApiResponse {
        requeued: outcome.requeued,
    }))
}
