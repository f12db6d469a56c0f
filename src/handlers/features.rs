//! Feature profile handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::features::{FeatureStore, UserFeatureProfile};
use crate::models::ApiResponse;

/// GET /api/v1/features/:user_id - Stored profile through the cache
pub async fn get_features(
    State(feature_store): State<Arc<FeatureStore>>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserFeatureProfile>>, ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::ValidationError("user_id must not be empty".to_string()));
    }

    let profile = feature_store.get(&user_id).await;

    Ok(Json(ApiResponse::ok(profile)))
}
