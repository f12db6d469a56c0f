//! Cache-aside feature store
//!
//! Reads go cache first, then the durable store, then the default profile,
//! and populate the cache on the way back. Writes go to the durable store
//! first and then refresh the cache entry. Other instances may keep serving a
//! stale cached profile for up to one TTL.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::aggregator::{apply_event, UserEvent};
use super::cache::{cache_key, FeatureCache};
use super::model::UserFeatureProfile;
use super::repository::ProfileRepository;
use crate::error::StoreError;

/// Default time-to-live of a cached profile
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Owner of the per-user profile lifecycle
pub struct FeatureStore {
    cache: Arc<dyn FeatureCache>,
    repository: Arc<dyn ProfileRepository>,
    ttl: Duration,
}

impl FeatureStore {
    pub fn new(cache: Arc<dyn FeatureCache>, repository: Arc<dyn ProfileRepository>) -> Self {
        Self {
            cache,
            repository,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Resolve a user's profile. Never fails: unknown users and unreachable
    /// stores both resolve to a profile, the latter with a warning.
    pub async fn get(&self, user_id: &str) -> UserFeatureProfile {
        let key = cache_key(user_id);

        match self.cache.get(&key).await {
            Ok(Some(payload)) => match serde_json::from_str::<UserFeatureProfile>(&payload) {
                Ok(profile) => {
                    tracing::debug!(user_id = %user_id, "Feature cache hit");
                    return profile;
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Discarding unreadable cached profile");
                }
            },
            Ok(None) => {
                tracing::debug!(user_id = %user_id, "Feature cache miss");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Feature cache unavailable, reading durable store");
            }
        }

        let profile = match self.repository.load(user_id).await {
            Ok(Some(stored)) => stored.profile,
            Ok(None) => UserFeatureProfile::default(),
            Err(e) => {
                // Not cached: the default must not mask the real record once the store is back.
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Durable feature store unavailable, serving default profile"
                );
                return UserFeatureProfile::default();
            }
        };

        self.refresh_cache(user_id, &profile).await;
        profile
    }

    /// Write a profile through: durable record first, then the cache entry
    pub async fn put(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError> {
        self.repository.save(user_id, profile).await?;
        self.refresh_cache(user_id, profile).await;
        Ok(())
    }

    /// Read-modify-write of one event against the durable store.
    ///
    /// Unlike `get`, a durable read failure aborts the update instead of
    /// falling back to the default profile, which would overwrite the record.
    pub async fn apply(
        &self,
        user_id: &str,
        event: &UserEvent,
        now: DateTime<Utc>,
    ) -> Result<UserFeatureProfile, StoreError> {
        let current = self
            .repository
            .load(user_id)
            .await?
            .map(|stored| stored.profile)
            .unwrap_or_default();

        let updated = apply_event(current, event, now);
        self.put(user_id, &updated).await?;

        tracing::debug!(
            user_id = %user_id,
            event = event.kind(),
            total_transactions = updated.total_transactions,
            "Profile updated"
        );

        Ok(updated)
    }

    async fn refresh_cache(&self, user_id: &str, profile: &UserFeatureProfile) {
        let payload = match serde_json::to_string(profile) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Could not serialize profile for cache");
                return;
            }
        };

        if let Err(e) = self.cache.set(&cache_key(user_id), payload, self.ttl).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to refresh feature cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::cache::InMemoryCache;
    use crate::features::repository::{InMemoryProfileRepository, StoredProfile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Repository that counts loads and can be switched off
    #[derive(Default)]
    struct FlakyRepository {
        inner: InMemoryProfileRepository,
        loads: AtomicUsize,
        down: std::sync::atomic::AtomicBool,
    }

    impl FlakyRepository {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProfileRepository for FlakyRepository {
        async fn load(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.load(user_id).await
        }

        async fn save(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.save(user_id, profile).await
        }
    }

    /// Cache that always errors
    struct BrokenCache;

    #[async_trait]
    impl FeatureCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("cache down".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("cache down".to_string()))
        }
    }

    fn payment(amount: f64) -> UserEvent {
        UserEvent::Payment {
            amount,
            category: "food".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_user_gets_default_profile() {
        let store = FeatureStore::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryProfileRepository::new()),
        );
        assert_eq!(store.get("nobody").await, UserFeatureProfile::default());
    }

    #[tokio::test]
    async fn test_miss_populates_cache_and_second_read_hits() {
        let repo = Arc::new(FlakyRepository::default());
        let cache = Arc::new(InMemoryCache::new());
        let store = FeatureStore::new(cache.clone(), repo.clone());

        store.get("u1").await;
        store.get("u1").await;

        assert_eq!(repo.loads.load(Ordering::SeqCst), 1);
        assert!(cache.get("features:u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_writes_through_to_cache_and_store() {
        let repo = Arc::new(FlakyRepository::default());
        let cache = Arc::new(InMemoryCache::new());
        let store = FeatureStore::new(cache.clone(), repo.clone());

        let mut profile = UserFeatureProfile::default();
        profile.pix_volume = 75.0;
        store.put("u1", &profile).await.unwrap();

        assert_eq!(repo.inner.load("u1").await.unwrap().unwrap().profile, profile);
        assert_eq!(store.get("u1").await, profile);
        assert_eq!(repo.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_durable_failure_serves_default_without_caching_it() {
        let repo = Arc::new(FlakyRepository::default());
        let cache = Arc::new(InMemoryCache::new());
        let store = FeatureStore::new(cache.clone(), repo.clone());

        let mut saved = UserFeatureProfile::default();
        saved.app_connections = 3;
        repo.inner.save("u1", &saved).await.unwrap();

        repo.set_down(true);
        assert_eq!(store.get("u1").await, UserFeatureProfile::default());
        assert!(cache.is_empty().await);

        repo.set_down(false);
        assert_eq!(store.get("u1").await.app_connections, 3);
    }

    #[tokio::test]
    async fn test_cache_failure_falls_through_to_durable_store() {
        let repo = Arc::new(InMemoryProfileRepository::new());
        let mut saved = UserFeatureProfile::default();
        saved.total_transactions = 9;
        repo.save("u1", &saved).await.unwrap();

        let store = FeatureStore::new(Arc::new(BrokenCache), repo);
        assert_eq!(store.get("u1").await.total_transactions, 9);
        // a failed cache refresh does not fail the write
        store.put("u1", &saved).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_treated_as_miss() {
        let repo = Arc::new(InMemoryProfileRepository::new());
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set("features:u1", "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let store = FeatureStore::new(cache, repo);
        assert_eq!(store.get("u1").await, UserFeatureProfile::default());
    }

    #[tokio::test]
    async fn test_apply_reads_durable_store_not_cache() {
        let repo = Arc::new(FlakyRepository::default());
        let cache = Arc::new(InMemoryCache::new());
        let store = FeatureStore::new(cache.clone(), repo.clone());

        let mut stale = UserFeatureProfile::default();
        stale.pix_volume = 999.0;
        cache
            .set("features:u1", serde_json::to_string(&stale).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        let updated = store.apply("u1", &payment(10.0), Utc::now()).await.unwrap();
        assert_eq!(updated.pix_volume, 10.0);
        assert_eq!(store.get("u1").await.pix_volume, 10.0);
    }

    #[tokio::test]
    async fn test_apply_aborts_when_durable_store_is_down() {
        let repo = Arc::new(FlakyRepository::default());
        let store = FeatureStore::new(Arc::new(InMemoryCache::new()), repo.clone());

        repo.set_down(true);
        assert!(store.apply("u1", &payment(10.0), Utc::now()).await.is_err());
    }
}
