//! Stored interactions and user feedback

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{FeedbackRequest, Interaction, UserFeedback};

/// GET /api/interactions/:id
pub async fn get_interaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Interaction>> {
    Ok(Json(state.service().get_interaction(id)?))
}

/// POST /api/interactions/:id/feedback - Rate an answer from 1 to 5
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<UserFeedback>)> {
    let feedback = state.service().submit_feedback(id, request)?;
    Ok((StatusCode::CREATED, Json(feedback)))
}
