//! Score API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::TraceId;
use crate::models::{ApiResponse, ContestRequest, ScoreRequest};
use crate::scoring::{ContestReceipt, ModelInfo, ScoreOrchestrator, ScoreResult};

/// POST /api/v1/scores/calculate - Compute a score for a user
pub async fn calculate_score(
    State(orchestrator): State<Arc<ScoreOrchestrator>>,
    trace_id: TraceId,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<ApiResponse<ScoreResult>>, ApiError> {
    request.validate()?;
    let input = request.into_input(Some(trace_id.0))?;

    let result = orchestrator.calculate(input).await?;

    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/v1/scores/history/:user_id - Score history, newest first
pub async fn get_score_history(
    State(orchestrator): State<Arc<ScoreOrchestrator>>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ScoreResult>>>, ApiError> {
    let history = orchestrator.history(&user_id).await?;

    Ok(Json(ApiResponse::ok(history)))
}

/// POST /api/v1/scores/contest/:user_id - Dispute a user's score
pub async fn contest_score(
    State(orchestrator): State<Arc<ScoreOrchestrator>>,
    trace_id: TraceId,
    Path(user_id): Path<String>,
    Json(request): Json<ContestRequest>,
) -> Result<Json<ApiResponse<ContestReceipt>>, ApiError> {
    request.validate()?;

    let receipt = orchestrator
        .contest(&user_id, &request.reason, Some(&trace_id.0))
        .await?;

    Ok(Json(ApiResponse::ok(receipt)))
}

/// GET /api/v1/scores/model/info - Currently loaded model
pub async fn get_model_info(
    State(orchestrator): State<Arc<ScoreOrchestrator>>,
) -> Json<ApiResponse<ModelInfo>> {
    Json(ApiResponse::ok(orchestrator.model_info()))
}
