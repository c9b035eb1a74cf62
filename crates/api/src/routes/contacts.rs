//! Contact subscription routes.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use mailcast_common::error::AppError;
use mailcast_engine::contacts::{ContactRef, SubscriptionChange};

use crate::middleware::auth::ProjectAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/contacts/subscribe", post(subscribe))
        .route("/api/contacts/unsubscribe", post(unsubscribe))
}

/// POST /api/contacts/subscribe: Mark a contact as subscribed.
async fn subscribe(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Json(target): Json<ContactRef>,
) -> Result<Json<SubscriptionChange>, AppError> {
    let change = state.contacts().subscribe(auth.project.id, &target).await?;
    Ok(Json(change))
}

/// POST /api/contacts/unsubscribe: Mark a contact as unsubscribed.
async fn unsubscribe(
    State(state): State<AppState>,
    auth: ProjectAuth,
    Json(target): Json<ContactRef>,
) -> Result<Json<SubscriptionChange>, AppError> {
    let change = state.contacts().unsubscribe(auth.project.id, &target).await?;
    Ok(Json(change))
}
