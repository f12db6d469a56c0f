//! Score audit trail
//!
//! Structured events on the `score_audit` target, one per calculation and one
//! per contest. Route them to a separate sink with
//! `RUST_LOG=score_audit=info`.

use uuid::Uuid;

use super::model::{ScoreResult, ScoreStage};

pub const AUDIT_TARGET: &str = "score_audit";

pub fn log_score_calculation(trace_id: &str, result: &ScoreResult, source_app: &str, degraded: bool) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "score_calculation",
        trace_id = %trace_id,
        user_id = %result.user_id,
        score = result.score,
        risk = ?result.risk,
        model_version = %result.model_version,
        source_app = %source_app,
        degraded,
        features_used = result.features_used.len(),
        "Score calculated"
    );
}

pub fn log_score_failure(trace_id: &str, user_id: &str, stage: ScoreStage, cause: &str) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event = "score_failure",
        trace_id = %trace_id,
        user_id = %user_id,
        stage = ?stage,
        cause = %cause,
        "Fresh score computation failed"
    );
}

pub fn log_score_contest(
    trace_id: &str,
    user_id: &str,
    contest_id: Uuid,
    reason: &str,
    latest_score: Option<f64>,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "score_contest",
        trace_id = %trace_id,
        user_id = %user_id,
        contest_id = %contest_id,
        reason_length = reason.len(),
        latest_score = ?latest_score,
        "Score contested"
    );
}
