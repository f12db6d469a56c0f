//! Configuration management for the score engine
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Shared secret expected on the event ingestion endpoint
    pub webhook_secret: Option<String>,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// Directory holding `model_<version>.json` artifacts
    pub model_dir: PathBuf,

    /// Upper bound on a single model or explainer invocation
    pub model_timeout: Duration,

    /// Time-to-live of cached feature profiles
    pub feature_cache_ttl: Duration,

    /// Capacity of the in-process event queue
    pub event_channel_capacity: usize,

    /// Attempts made on a single event before it is dead-lettered
    pub event_max_attempts: u32,

    /// How long shutdown waits for the consumer to drain queued events
    pub event_drain_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 5u32);

        let webhook_secret = env::var("WEBHOOK_SECRET").ok();

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let model_dir = PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string()));

        let model_timeout = Duration::from_millis(parse_or("MODEL_TIMEOUT_MS", 2000u64));

        let feature_cache_ttl =
            Duration::from_secs(parse_or("FEATURE_CACHE_TTL_SECONDS", 3600u64));

        let event_channel_capacity = parse_or("EVENT_CHANNEL_CAPACITY", 1024usize);
        if event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "EVENT_CHANNEL_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let event_max_attempts = parse_or("EVENT_MAX_ATTEMPTS", 3u32).max(1);

        let event_drain_timeout =
            Duration::from_secs(parse_or("EVENT_DRAIN_TIMEOUT_SECONDS", 30u64));

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections,
            webhook_secret,
            cors_allowed_origins,
            log_level,
            model_dir,
            model_timeout,
            feature_cache_ttl,
            event_channel_capacity,
            event_max_attempts,
            event_drain_timeout,
        })
    }

    /// Get database URL with the password masked, for logging
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }
}

/// Read a numeric variable, falling back to `default` when unset or malformed
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
