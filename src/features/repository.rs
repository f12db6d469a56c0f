//! Durable profile records
//!
//! The durable store is used as a key-value table: one JSON document per user
//! id plus a last-updated timestamp. A single save is atomic; concurrent
//! read-modify-write cycles on the same user are last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::model::UserFeatureProfile;
use crate::error::StoreError;

/// A profile as read back from the durable store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProfile {
    pub profile: UserFeatureProfile,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError>;

    async fn save(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError>;
}

/// Postgres-backed profile records in `user_features`
#[derive(Clone)]
pub struct PgProfileRepository {
    db_pool: PgPool,
}

impl PgProfileRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn load(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
        let row = sqlx::query_as::<_, (serde_json::Value, DateTime<Utc>)>(
            "SELECT feature_data, last_updated FROM user_features WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some((feature_data, last_updated)) => Ok(Some(StoredProfile {
                profile: serde_json::from_value(feature_data)?,
                last_updated,
            })),
            None => Ok(None),
        }
    }

    async fn save(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError> {
        let feature_data = serde_json::to_value(profile)?;

        sqlx::query(
            r#"
            INSERT INTO user_features (user_id, feature_data, last_updated)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET feature_data = EXCLUDED.feature_data, last_updated = NOW()
            "#,
        )
        .bind(user_id)
        .bind(feature_data)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

/// In-process profile records, for tests and local runs
#[derive(Default)]
pub struct InMemoryProfileRepository {
    records: RwLock<HashMap<String, StoredProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn load(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError> {
        self.records.write().await.insert(
            user_id.to_string(),
            StoredProfile {
                profile: profile.clone(),
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }
}
