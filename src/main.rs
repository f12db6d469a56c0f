//! Score engine server
//!
//! Wires the feature store, model registry, score orchestrator and event
//! consumer together and serves the HTTP API.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use score_engine::config::Config;
use score_engine::error::ScoringError;
use score_engine::features::{FeatureStore, InMemoryCache, PgProfileRepository};
use score_engine::ingress::{self, EventConsumer};
use score_engine::scoring::{ModelRegistry, PgScoreHistoryStore, ScoreOrchestrator};
use score_engine::state::AppState;
use score_engine::{db, routes};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(error = ?e, "Server terminated");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(environment = config.environment.as_str(), "Starting score engine");

    // A missing model is fatal: there is nothing to score with.
    let models = ModelRegistry::load_latest(&config.model_dir)
        .map_err(|e| ScoringError::NotConfigured(e.to_string()))
        .context("Failed to load scoring model")?;

    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let feature_store = Arc::new(
        FeatureStore::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(PgProfileRepository::new(db_pool.clone())),
        )
        .with_ttl(config.feature_cache_ttl),
    );

    let orchestrator = Arc::new(
        ScoreOrchestrator::new(
            feature_store.clone(),
            Arc::new(PgScoreHistoryStore::new(db_pool.clone())),
            Arc::new(models),
        )
        .with_invocation_timeout(config.model_timeout),
    );

    // Start event consumer in background
    let (event_publisher, event_source) = ingress::channel(config.event_channel_capacity);
    let consumer = EventConsumer::new(event_source, feature_store.clone(), config.event_max_attempts)
        .spawn();

    let app_state = AppState::new(
        orchestrator,
        feature_store,
        event_publisher,
        Some(db_pool),
        config.webhook_secret.clone(),
    );

    let app = routes::app_router(app_state).layer(configure_cors(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Serve with graceful shutdown. The router owns every publisher, so once
    // serve returns the queue closes and the consumer can drain it.
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    if consumer.shutdown(config.event_drain_timeout).await.is_none() {
        tracing::warn!("Queued events may have been lost during shutdown");
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(config: &Config) -> CorsLayer {
    let allowed_origins = config.cors_allowed_origins.as_deref().unwrap_or_default();

    if allowed_origins.is_empty() {
        if config.environment.is_production() {
            tracing::warn!("CORS_ALLOWED_ORIGINS not set in production, cross-origin requests are denied");
            return CorsLayer::new();
        }
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
