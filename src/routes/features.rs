//! Feature profile route definitions

use axum::{routing::get, Router};

use crate::handlers::features::get_features;
use crate::state::AppState;

pub fn feature_routes() -> Router<AppState> {
    Router::new().route("/api/v1/features/:user_id", get(get_features))
}
