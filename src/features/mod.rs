//! Feature domain module
//!
//! Contains the profile model, the aggregation rules, and the cache-aside
//! feature store with its cache and durable-store collaborators.

mod aggregator;
mod cache;
mod model;
mod repository;
mod store;

pub use aggregator::{apply_event, derive_features, recompute, UserEvent, UNCATEGORIZED};
pub use cache::{cache_key, FeatureCache, InMemoryCache};
pub use model::*;
pub use repository::{
    InMemoryProfileRepository, PgProfileRepository, ProfileRepository, StoredProfile,
};
pub use store::{FeatureStore, DEFAULT_CACHE_TTL};
