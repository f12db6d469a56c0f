//! Route definitions

mod events;
mod features;
mod scores;

pub use events::event_routes;
pub use features::feature_routes;
pub use scores::score_routes;

use axum::{routing::get, Router};

use crate::handlers::health_check;
use crate::middleware;
use crate::state::AppState;

/// Every API route plus `/health`, with request tracing applied
pub fn app_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(score_routes())
        .merge(feature_routes())
        .merge(event_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
