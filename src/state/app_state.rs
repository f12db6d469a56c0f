//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::features::FeatureStore;
use crate::ingress::EventPublisher;
use crate::scoring::ScoreOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ScoreOrchestrator>,
    pub feature_store: Arc<FeatureStore>,
    pub event_publisher: EventPublisher,
    /// `None` when running against in-memory stores
    pub db_pool: Option<PgPool>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ScoreOrchestrator>,
        feature_store: Arc<FeatureStore>,
        event_publisher: EventPublisher,
        db_pool: Option<PgPool>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            feature_store,
            event_publisher,
            db_pool,
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for Arc<ScoreOrchestrator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<FeatureStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.feature_store.clone()
    }
}

impl FromRef<AppState> for EventPublisher {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.event_publisher.clone()
    }
}
