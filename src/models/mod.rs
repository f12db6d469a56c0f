//! Request and response models for the HTTP API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::error::ApiError;
use crate::features::FeatureSet;
use crate::scoring::ScoringInput;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of `POST /api/v1/scores/calculate`
#[derive(Debug, Deserialize, Validate)]
pub struct ScoreRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,

    /// Ad-hoc features. Values must be numbers, booleans or numeric strings.
    #[serde(default)]
    pub features: HashMap<String, Value>,

    #[validate(length(min = 1, max = 128))]
    pub source_app: String,

    #[serde(default)]
    pub model_version: Option<String>,
}

impl ScoreRequest {
    /// Convert into orchestrator input, rejecting non-numeric feature values
    pub fn into_input(self, trace_id: Option<String>) -> Result<ScoringInput, ApiError> {
        let features = parse_features(&self.features)?;
        Ok(ScoringInput {
            user_id: self.user_id,
            features,
            source_app: self.source_app,
            model_version: self.model_version.filter(|v| !v.trim().is_empty()),
            trace_id,
        })
    }
}

fn parse_features(raw: &HashMap<String, Value>) -> Result<FeatureSet, ApiError> {
    let mut features = FeatureSet::new();
    for (name, value) in raw {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            ApiError::ValidationError(format!("feature '{}' must be numeric", name))
        })?;
        features.insert(name, number);
    }
    Ok(features)
}

/// Body of `POST /api/v1/scores/contest/:user_id`
#[derive(Debug, Deserialize, Validate)]
pub struct ContestRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

/// Acknowledgement of an accepted event
#[derive(Debug, Serialize, Deserialize)]
pub struct EventAccepted {
    pub offset: u64,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub model_version: String,
    pub version: String,
}
