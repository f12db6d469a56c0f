//! Score orchestration
//!
//! One request moves through
//! `Start -> FeaturesResolved -> Scored -> Explained -> Persisted -> Responded`.
//! A model or explainer failure, including a timeout, diverts it to the
//! fallback path, which answers with the user's most recent stored score
//! marked as degraded.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit;
use super::history::ScoreHistoryStore;
use super::ml::{Attribution, LoadedModel, ModelRegistry, Prediction};
use super::model::{
    ContestReceipt, ExplanationItem, ModelInfo, ScoreContestRecord, ScoreRecord, ScoreResult,
    ScoreStage,
};
use crate::error::{ModelError, ScoringError};
use crate::features::{recompute, FeatureSet, FeatureStore};

/// Default bound on a single model or explainer call
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(2);

/// A score request after transport-level validation
#[derive(Debug, Clone)]
pub struct ScoringInput {
    pub user_id: String,
    /// Ad-hoc features supplied by the caller; these win over stored ones
    pub features: FeatureSet,
    pub source_app: String,
    pub model_version: Option<String>,
    pub trace_id: Option<String>,
}

impl ScoringInput {
    pub fn new(user_id: impl Into<String>, source_app: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            features: FeatureSet::new(),
            source_app: source_app.into(),
            model_version: None,
            trace_id: None,
        }
    }
}

/// Fresh computation failure, tagged with the last stage reached
struct StageFailure {
    stage: ScoreStage,
    error: ScoringError,
}

pub struct ScoreOrchestrator {
    features: Arc<FeatureStore>,
    history: Arc<dyn ScoreHistoryStore>,
    models: Arc<ModelRegistry>,
    invocation_timeout: Duration,
}

impl ScoreOrchestrator {
    pub fn new(
        features: Arc<FeatureStore>,
        history: Arc<dyn ScoreHistoryStore>,
        models: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            features,
            history,
            models,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
        }
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Compute, explain and persist a score, falling back to the last known
    /// score when the model or explainer fails.
    pub async fn calculate(&self, input: ScoringInput) -> Result<ScoreResult, ScoringError> {
        if input.user_id.trim().is_empty() {
            return Err(ScoringError::Validation("user_id must not be empty".to_string()));
        }
        let trace_id = input
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::debug!(
            trace_id = %trace_id,
            user_id = %input.user_id,
            source_app = %input.source_app,
            stage = ?ScoreStage::Start,
            "Score requested"
        );

        // Time-relative features are brought up to date on this copy only;
        // the stored profile is left as the last event wrote it.
        let mut profile = self.features.get(&input.user_id).await;
        recompute(&mut profile, Utc::now());
        let mut features = profile.to_feature_set();
        features.merge(input.features);

        tracing::debug!(
            trace_id = %trace_id,
            user_id = %input.user_id,
            feature_count = features.len(),
            stage = ?ScoreStage::FeaturesResolved,
            "Features resolved"
        );

        let record = match self
            .compute(&input.user_id, features, input.model_version.as_deref())
            .await
        {
            Ok(record) => record,
            Err(failure) => {
                let cause = failure.error.to_string();
                audit::log_score_failure(&trace_id, &input.user_id, failure.stage, &cause);
                return self
                    .fallback(&input.user_id, &trace_id, &input.source_app, cause)
                    .await;
            }
        };

        // A lost history write does not invalidate the score that was computed.
        if let Err(e) = self.history.append(&record).await {
            tracing::error!(
                trace_id = %trace_id,
                user_id = %record.user_id,
                error = %e,
                "Failed to persist score record"
            );
        } else {
            tracing::debug!(
                trace_id = %trace_id,
                record_id = %record.id,
                stage = ?ScoreStage::Persisted,
                "Score persisted"
            );
        }

        let result = ScoreResult::from_record(&record);
        audit::log_score_calculation(&trace_id, &result, &input.source_app, false);
        tracing::debug!(trace_id = %trace_id, stage = ?ScoreStage::Responded, "Score returned");
        Ok(result)
    }

    async fn compute(
        &self,
        user_id: &str,
        features: FeatureSet,
        model_version: Option<&str>,
    ) -> Result<ScoreRecord, StageFailure> {
        // Resolving a non-current version reads the model directory.
        let models = self.models.clone();
        let version = model_version.map(str::to_string);
        let loaded: LoadedModel = self
            .invoke("model registry", move || models.resolve(version.as_deref()))
            .await
            .map_err(|error| StageFailure {
                stage: ScoreStage::FeaturesResolved,
                error,
            })?;

        let features = Arc::new(features);

        let model = loaded.model.clone();
        let input = features.clone();
        let prediction: Prediction = self
            .invoke("model", move || model.predict(&input))
            .await
            .map_err(|error| StageFailure {
                stage: ScoreStage::FeaturesResolved,
                error,
            })?;

        if !prediction.score.is_finite() {
            return Err(StageFailure {
                stage: ScoreStage::Scored,
                error: ScoringError::ModelInvocation("non-finite score".to_string()),
            });
        }

        let explainer = loaded.explainer.clone();
        let input = features.clone();
        let score = prediction.score;
        let attributions: Vec<Attribution> = self
            .invoke("explainer", move || explainer.explain(&input, score))
            .await
            .map_err(|error| StageFailure {
                stage: ScoreStage::Scored,
                error,
            })?;

        let explanation: Vec<ExplanationItem> = attributions
            .into_iter()
            .map(|a| ExplanationItem::new(a.feature, a.value, a.attribution))
            .collect();
        tracing::debug!(
            user_id = %user_id,
            score = prediction.score,
            attributions = explanation.len(),
            stage = ?ScoreStage::Explained,
            "Score explained"
        );

        Ok(ScoreRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            score: prediction.score,
            features: features.to_map(),
            explanation,
            model_version: prediction.version,
            timestamp: Utc::now(),
        })
    }

    /// Run a blocking model call off the async workers, bounded by the invocation timeout
    async fn invoke<T, F>(&self, what: &'static str, call: F) -> Result<T, ScoringError>
    where
        F: FnOnce() -> Result<T, ModelError> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.invocation_timeout, tokio::task::spawn_blocking(call)).await
        {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(join_error)) => Err(ScoringError::ModelInvocation(format!(
                "{} call aborted: {}",
                what, join_error
            ))),
            Err(_) => Err(ScoringError::ModelInvocation(format!(
                "{} call exceeded {:?}",
                what, self.invocation_timeout
            ))),
        }
    }

    async fn fallback(
        &self,
        user_id: &str,
        trace_id: &str,
        source_app: &str,
        cause: String,
    ) -> Result<ScoreResult, ScoringError> {
        let prior = match self.history.latest(user_id).await {
            Ok(prior) => prior,
            Err(e) => {
                tracing::error!(trace_id = %trace_id, user_id = %user_id, error = %e, "Score history unavailable during fallback");
                None
            }
        };

        let Some(prior) = prior else {
            return Err(ScoringError::NoFallbackAvailable {
                user_id: user_id.to_string(),
                cause,
            });
        };

        if let Err(e) = self.history.append(&prior.degraded_copy(Utc::now())).await {
            tracing::warn!(trace_id = %trace_id, user_id = %user_id, error = %e, "Failed to record degraded answer");
        }

        let result = ScoreResult::degraded(&prior);
        tracing::warn!(
            trace_id = %trace_id,
            user_id = %user_id,
            stage = ?ScoreStage::Fallback,
            prior_score = prior.score,
            "Serving last known score"
        );
        audit::log_score_calculation(trace_id, &result, source_app, true);
        Ok(result)
    }

    /// Score results for a user, newest first
    pub async fn history(&self, user_id: &str) -> Result<Vec<ScoreResult>, ScoringError> {
        let records = self.history.history(user_id).await?;
        Ok(records.iter().map(ScoreResult::from_record).collect())
    }

    /// Record a pending contest against the user's score
    pub async fn contest(
        &self,
        user_id: &str,
        reason: &str,
        trace_id: Option<&str>,
    ) -> Result<ContestReceipt, ScoringError> {
        if user_id.trim().is_empty() {
            return Err(ScoringError::Validation("user_id must not be empty".to_string()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ScoringError::Validation("reason must not be empty".to_string()));
        }

        let contest = ScoreContestRecord::pending(user_id, reason, Utc::now());
        self.history.create_contest(&contest).await?;

        let latest_score = self
            .history
            .latest(user_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.score);
        let trace_id = trace_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        audit::log_score_contest(&trace_id, user_id, contest.id, reason, latest_score);

        Ok(ContestReceipt {
            status: contest.status,
            contest_id: contest.id,
        })
    }

    pub fn model_info(&self) -> ModelInfo {
        self.models.info()
    }
}
