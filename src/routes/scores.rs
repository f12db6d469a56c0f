//! Score route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::scores::{calculate_score, contest_score, get_model_info, get_score_history};
use crate::state::AppState;

pub fn score_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/scores/calculate", post(calculate_score))
        .route("/api/v1/scores/history/:user_id", get(get_score_history))
        .route("/api/v1/scores/contest/:user_id", post(contest_score))
        .route("/api/v1/scores/model/info", get(get_model_info))
}
