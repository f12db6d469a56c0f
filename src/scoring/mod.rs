//! Scoring domain module
//!
//! Model contracts and registry, the score orchestrator with its fallback
//! path, score history, and the audit trail.

pub mod audit;
mod history;
mod ml;
mod model;
mod orchestrator;

pub use history::{InMemoryScoreHistoryStore, PgScoreHistoryStore, ScoreHistoryStore};
pub use ml::{
    Attribution, Explainer, LinearArtifact, LinearModel, LoadedModel, ModelRegistry, Prediction,
    ScoringModel, MAX_SCORE, MIN_SCORE,
};
pub use model::*;
pub use orchestrator::{ScoreOrchestrator, ScoringInput, DEFAULT_INVOCATION_TIMEOUT};
