//! Event ingestion handler

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::error::ApiError;
use crate::ingress::{EventMessage, PublishError};
use crate::models::{ApiResponse, EventAccepted};
use crate::state::AppState;

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// POST /api/v1/events - Queue a user event for the consumer
pub async fn ingest_event(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(message): Json<EventMessage>,
) -> Result<(StatusCode, Json<ApiResponse<EventAccepted>>), ApiError> {
    match &app_state.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let provided = headers
                .get(WEBHOOK_SECRET_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if provided != secret {
                return Err(ApiError::Unauthorized("Invalid webhook secret".to_string()));
            }
        }
        _ => {
            // Fail closed without a configured secret
            tracing::error!("Webhook secret not configured - rejecting event");
            return Err(ApiError::ServiceUnavailable(
                "Event ingestion is not configured".to_string(),
            ));
        }
    }

    if message.to_user_event().is_none() {
        return Err(ApiError::ValidationError(format!(
            "unsupported event '{}' or missing user_id",
            message.event_type
        )));
    }

    let offset = app_state
        .event_publisher
        .publish(message)
        .map_err(|e| match e {
            PublishError::Full => ApiError::ServiceUnavailable("Event queue is full".to_string()),
            PublishError::Closed => {
                ApiError::ServiceUnavailable("Event consumer is not running".to_string())
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(EventAccepted { offset })),
    ))
}
