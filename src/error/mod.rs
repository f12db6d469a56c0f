//! Centralized error handling for the score engine
//!
//! `ApiError` is the HTTP-facing error with status code mapping and JSON
//! error bodies. The domain errors below it (`StoreError`, `ModelError`,
//! `ScoringError`) are what the feature store, model registry and score
//! orchestrator return; they convert into `ApiError` with generic messages so
//! internal detail stays in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::InternalError(_)
            | ApiError::DatabaseError(_)
            | ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// ============================================================================
// Domain errors
// ============================================================================

/// Failure of a cache or durable record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Failure raised by a scoring model, an explainer, or the model registry
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("no model artifact found in {0}")]
    NoArtifact(String),

    #[error("model version {0} is not available")]
    UnknownVersion(String),

    #[error("invalid model artifact {path}: {reason}")]
    InvalidArtifact { path: String, reason: String },

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("explanation failed: {0}")]
    Explanation(String),
}

/// Failures of the scoring pipeline
#[derive(Error, Debug)]
pub enum ScoringError {
    /// No model could be loaded. Raised at startup only.
    #[error("scoring model not configured: {0}")]
    NotConfigured(String),

    /// The model or explainer failed or exceeded its time budget
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Fresh computation failed and there is no prior score to fall back to
    #[error("no fallback score available for user {user_id}: {cause}")]
    NoFallbackAvailable { user_id: String, cause: String },

    #[error("invalid request: {0}")]
    Validation(String),
}

impl From<ModelError> for ScoringError {
    fn from(err: ModelError) -> Self {
        ScoringError::ModelInvocation(err.to_string())
    }
}

impl From<ScoringError> for ApiError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::Validation(msg) => ApiError::ValidationError(msg),
            ScoringError::NotConfigured(detail) => {
                tracing::error!(error = %detail, "Scoring requested without a configured model");
                ApiError::ServiceUnavailable("Scoring is not available".to_string())
            }
            ScoringError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Score store failure");
                ApiError::DatabaseError("Score store is unavailable".to_string())
            }
            other => {
                tracing::error!(error = %other, "Score computation failed");
                ApiError::InternalError("Score computation failed".to_string())
            }
        }
    }
}
