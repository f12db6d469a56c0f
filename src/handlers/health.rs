//! Health check handler

use axum::{extract::State, http::StatusCode, Json};

use crate::db;
use crate::models::HealthResponse;
use crate::state::AppState;

/// GET /health - Liveness plus database connectivity
pub async fn health_check(State(app_state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &app_state.db_pool {
        Some(pool) => match db::check_health(pool).await {
            Ok(()) => "connected",
            Err(e) => {
                tracing::warn!(error = %e, "Health check could not reach the database");
                "disconnected"
            }
        },
        None => "in_memory",
    };

    let status = if database == "disconnected" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(HealthResponse {
            status: if status.is_success() { "healthy" } else { "degraded" }.to_string(),
            database: database.to_string(),
            model_version: app_state.orchestrator.model_info().version,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
