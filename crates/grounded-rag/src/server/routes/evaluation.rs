//! Evaluation and quality report endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::evaluation::QualityReport;
use crate::server::state::AppState;
use crate::service::BatchEvaluationReport;
use crate::types::{
    BatchEvaluationRequest, DatasetEvaluationRequest, EvaluateRequest, EvaluationRecord,
    EvaluationStatus,
};

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub interaction_id: Uuid,
    #[serde(flatten)]
    pub status: EvaluationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct QualityParams {
    /// Trailing window; defaults to `evaluation.report_window_days`
    #[serde(default)]
    pub days: Option<i64>,
}

/// POST /api/evaluations/:id - Evaluate one interaction, inline or deferred.
///
/// Deferred requests answer 202 with the queue status.
pub async fn evaluate_interaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<EvaluateRequest>>,
) -> Result<Response> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    if request.deferred {
        let status = state.service().enqueue_evaluation(id, request.ground_truth)?;
        let response = StatusResponse {
            interaction_id: id,
            status,
        };
        return Ok((StatusCode::ACCEPTED, Json(response)).into_response());
    }

    let record = state
        .service()
        .evaluate_interaction(id, request.ground_truth.as_deref())
        .await?;
    Ok(Json(record).into_response())
}

/// GET /api/evaluations/:id - Stored evaluation record
pub async fn get_evaluation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EvaluationRecord>> {
    Ok(Json(state.service().get_evaluation(id)?))
}

/// GET /api/evaluations/:id/status - Deferred evaluation state
pub async fn evaluation_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>> {
    let status = state.service().evaluation_status(id)?;
    Ok(Json(StatusResponse {
        interaction_id: id,
        status,
    }))
}

/// POST /api/evaluations - Batch evaluation of stored interactions
pub async fn evaluate_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchEvaluationRequest>,
) -> Result<Json<BatchEvaluationReport>> {
    Ok(Json(state.service().evaluate_batch(request).await?))
}

/// POST /api/evaluations/dataset - Answer and evaluate question/ground-truth samples
pub async fn evaluate_dataset(
    State(state): State<AppState>,
    Json(request): Json<DatasetEvaluationRequest>,
) -> Result<Json<BatchEvaluationReport>> {
    Ok(Json(state.service().evaluate_dataset(request).await?))
}

/// GET /api/quality - Quality report over a trailing window
pub async fn quality_report(
    State(state): State<AppState>,
    Query(params): Query<QualityParams>,
) -> Result<Json<QualityReport>> {
    Ok(Json(state.service().quality_report(params.days)?))
}
