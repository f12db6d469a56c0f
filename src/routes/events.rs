//! Event ingestion route definitions

use axum::{routing::post, Router};

use crate::handlers::events::ingest_event;
use crate::state::AppState;

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/api/v1/events", post(ingest_event))
}
