//! Campaign routes.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::Campaign;
use mailcast_engine::cache::CampaignCache;
use mailcast_engine::campaign::{CampaignParams, CampaignResult, RecipientPage};
use mailcast_engine::dispatcher::{SendOutcome, SendRequest};

use crate::middleware::auth::ProjectAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/campaigns", post(create_campaign).get(list_campaigns))
        .route("/api/campaigns/send", post(send_campaign))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign).put(update_campaign).delete(delete_campaign),
        )
        .route("/api/campaigns/{id}/duplicate", post(duplicate_campaign))
        .route("/api/campaigns/{id}/recipients", get(list_recipients))
}

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

/// POST /api/campaigns: Create a campaign.
async fn create_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Json(params): Json<CampaignParams>,
) -> Result<Json<CampaignResult>, AppError> {
    let result = state.campaigns().create(&auth.project, &params).await?;
    Ok(Json(result))
}

/// GET /api/campaigns: List the project's campaigns, newest first.
async fn list_campaigns(
    State(state): State<AppState>,
    auth: ProjectAuth,
) -> Result<Json<Vec<Campaign>>, AppError> {
    let project_id = auth.project.id;
    let service = state.campaigns();
    let campaigns = state
        .cache()
        .get_or_load(&CampaignCache::project_campaigns_key(project_id), || {
            service.list_by_project(project_id)
        })
        .await?;
    Ok(Json(campaigns))
}

/// GET /api/campaigns/{id}: Fetch one campaign.
async fn get_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    let project_id = auth.project.id;
    let service = state.campaigns();
    let campaign = state
        .cache()
        .get_or_load(&CampaignCache::campaign_key(id), || service.get(project_id, id))
        .await?;

    // The campaign key is shared across projects.
    if campaign.project_id != project_id {
        return Err(AppError::NotFound(format!("Campaign {} not found", id)));
    }
    Ok(Json(campaign))
}

/// PUT /api/campaigns/{id}: Replace a campaign's content and recipients.
async fn update_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Path(id): Path<Uuid>,
    Json(params): Json<CampaignParams>,
) -> Result<Json<CampaignResult>, AppError> {
    let result = state.campaigns().update(&auth.project, id, &params).await?;
    Ok(Json(result))
}

/// DELETE /api/campaigns/{id}: Delete a campaign.
async fn delete_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    let campaign = state.campaigns().delete(auth.project.id, id).await?;
    Ok(Json(campaign))
}

/// POST /api/campaigns/{id}/duplicate: Copy a campaign into a new draft.
async fn duplicate_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    let copy = state.campaigns().duplicate(&auth.project, id).await?;
    Ok(Json(copy))
}

/// GET /api/campaigns/{id}/recipients: Page through a campaign's recipients.
async fn list_recipients(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Path(id): Path<Uuid>,
    Query(query): Query<RecipientQuery>,
) -> Result<Json<RecipientPage>, AppError> {
    let page = state
        .campaigns()
        .list_recipients(auth.project.id, id, query.page, query.page_size)
        .await?;
    Ok(Json(page))
}

/// POST /api/campaigns/send: Schedule a live send or mail a test copy.
async fn send_campaign(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendOutcome>, AppError> {
    let outcome = state.dispatcher().send(&auth.project, &request).await?;
    Ok(Json(outcome))
}
