//! Score, explanation and contest models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sentinel model version carried by degraded (fallback) answers
pub const UNKNOWN_MODEL_VERSION: &str = "unknown";

/// Scores below this are high risk
pub const HIGH_RISK_CEILING: f64 = 40.0;

/// Scores below this (and at or above `HIGH_RISK_CEILING`) are medium risk
pub const MEDIUM_RISK_CEILING: f64 = 70.0;

/// Attributions larger than this, in score points, are described as significant
pub const SIGNIFICANT_ATTRIBUTION_THRESHOLD: f64 = 5.0;

/// Risk tier classification
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Score below 40
    High,
    /// Score in [40, 70)
    Medium,
    /// Score of 70 or more
    Low,
    /// Degraded answer served from score history
    Unknown,
}

impl RiskTier {
    pub fn from_score(score: f64) -> Self {
        if score < HIGH_RISK_CEILING {
            RiskTier::High
        } else if score < MEDIUM_RISK_CEILING {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskTier::High => "High risk based on transactional behavior",
            RiskTier::Medium => "Moderate risk, behavior partially consistent",
            RiskTier::Low => "Low risk with consistent transactional behavior",
            RiskTier::Unknown => "Fresh score unavailable, last known score returned",
        }
    }
}

/// One feature's contribution to a score
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExplanationItem {
    pub feature: String,
    pub value: f64,
    pub attribution: f64,
    pub description: String,
}

impl ExplanationItem {
    pub fn new(feature: String, value: f64, attribution: f64) -> Self {
        let description = describe_attribution(&feature, attribution);
        Self {
            feature,
            value,
            attribution,
            description,
        }
    }
}

/// Human-readable direction and magnitude of an attribution
pub fn describe_attribution(feature: &str, attribution: f64) -> String {
    let magnitude = if attribution.abs() > SIGNIFICANT_ATTRIBUTION_THRESHOLD {
        "significantly"
    } else {
        "slightly"
    };

    if attribution > 0.0 {
        format!("{} increased the score {}", feature, magnitude)
    } else if attribution < 0.0 {
        format!("{} decreased the score {}", feature, magnitude)
    } else {
        format!("{} did not affect the score", feature)
    }
}

/// Persisted, immutable result of one score computation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScoreRecord {
    pub id: Uuid,
    pub user_id: String,
    pub score: f64,
    /// Feature snapshot the score was computed from
    pub features: BTreeMap<String, f64>,
    pub explanation: Vec<ExplanationItem>,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

impl ScoreRecord {
    /// Whether this record was written by the fallback path
    pub fn is_degraded(&self) -> bool {
        self.model_version == UNKNOWN_MODEL_VERSION
    }

    /// Copy of this record marking a degraded answer served at `now`
    pub fn degraded_copy(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_version: UNKNOWN_MODEL_VERSION.to_string(),
            timestamp: now,
            ..self.clone()
        }
    }
}

/// Score as returned to callers. Fresh and fallback answers share this shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScoreResult {
    pub user_id: String,
    pub score: f64,
    pub risk: RiskTier,
    pub explanation: Vec<ExplanationItem>,
    pub features_used: Vec<String>,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

impl ScoreResult {
    /// Result for a record, tiered from its score unless it is degraded
    pub fn from_record(record: &ScoreRecord) -> Self {
        if record.is_degraded() {
            return Self::degraded(record);
        }
        Self {
            user_id: record.user_id.clone(),
            score: record.score,
            risk: RiskTier::from_score(record.score),
            explanation: record.explanation.clone(),
            features_used: record.features.keys().cloned().collect(),
            model_version: record.model_version.clone(),
            timestamp: record.timestamp,
        }
    }

    /// A prior record served verbatim with the degraded sentinels
    pub fn degraded(record: &ScoreRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            score: record.score,
            risk: RiskTier::Unknown,
            explanation: record.explanation.clone(),
            features_used: record.features.keys().cloned().collect(),
            model_version: UNKNOWN_MODEL_VERSION.to_string(),
            timestamp: record.timestamp,
        }
    }
}

/// Progress of one score request through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStage {
    Start,
    FeaturesResolved,
    Scored,
    Explained,
    Persisted,
    Responded,
    Fallback,
}

/// Contest lifecycle
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "contest_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A user's dispute of their score
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ScoreContestRecord {
    pub id: Uuid,
    pub user_id: String,
    pub reason: String,
    pub status: ContestStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ScoreContestRecord {
    pub fn pending(user_id: &str, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            reason: reason.to_string(),
            status: ContestStatus::Pending,
            resolution: None,
            created_at: now,
            resolved_at: None,
        }
    }
}

/// Acknowledgement of a contest submission
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContestReceipt {
    pub status: ContestStatus,
    pub contest_id: Uuid,
}

/// Description of the currently loaded model
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelInfo {
    pub version: String,
    pub features: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(score: f64, model_version: &str) -> ScoreRecord {
        ScoreRecord {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            score,
            features: BTreeMap::from([("pix_volume".to_string(), 10.0)]),
            explanation: vec![ExplanationItem::new("pix_volume".to_string(), 10.0, 2.0)],
            model_version: model_version.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_risk_tier_boundaries() {
        assert_eq!(RiskTier::from_score(0.0), RiskTier::High);
        assert_eq!(RiskTier::from_score(39.999), RiskTier::High);
        assert_eq!(RiskTier::from_score(40.0), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(69.999), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(70.0), RiskTier::Low);
        assert_eq!(RiskTier::from_score(100.0), RiskTier::Low);
    }

    #[test]
    fn test_risk_tier_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RiskTier::Unknown).unwrap(), "\"unknown\"");
        assert_eq!(serde_json::to_string(&RiskTier::High).unwrap(), "\"high\"");
    }

    #[test]
    fn test_describe_attribution_direction_and_magnitude() {
        assert_eq!(
            describe_attribution("chargeback_rate", -12.0),
            "chargeback_rate decreased the score significantly"
        );
        assert_eq!(
            describe_attribution("pix_volume", 1.5),
            "pix_volume increased the score slightly"
        );
        assert_eq!(
            describe_attribution("pix_volume", SIGNIFICANT_ATTRIBUTION_THRESHOLD),
            "pix_volume increased the score slightly"
        );
        assert!(describe_attribution("x", 0.0).contains("did not affect"));
    }

    #[test]
    fn test_degraded_result_keeps_score_and_explanation() {
        let prior = record(55.0, "v3");
        let result = ScoreResult::degraded(&prior);

        assert_eq!(result.score, prior.score);
        assert_eq!(result.explanation, prior.explanation);
        assert_eq!(result.timestamp, prior.timestamp);
        assert_eq!(result.risk, RiskTier::Unknown);
        assert_eq!(result.model_version, UNKNOWN_MODEL_VERSION);
    }

    #[test]
    fn test_from_record_tiers_fresh_records_only() {
        assert_eq!(ScoreResult::from_record(&record(80.0, "v1")).risk, RiskTier::Low);
        assert_eq!(
            ScoreResult::from_record(&record(80.0, UNKNOWN_MODEL_VERSION)).risk,
            RiskTier::Unknown
        );
    }

    #[test]
    fn test_degraded_copy_is_a_new_record() {
        let prior = record(55.0, "v3");
        let copy = prior.degraded_copy(Utc::now());

        assert_ne!(copy.id, prior.id);
        assert!(copy.is_degraded());
        assert_eq!(copy.score, prior.score);
        assert_eq!(copy.explanation, prior.explanation);
    }
}
