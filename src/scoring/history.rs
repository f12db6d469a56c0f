//! Score history store
//!
//! Append-only log of score records per user, plus the contests raised
//! against them. Reads are newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{ExplanationItem, ScoreContestRecord, ScoreRecord};
use crate::error::StoreError;

#[async_trait]
pub trait ScoreHistoryStore: Send + Sync {
    async fn append(&self, record: &ScoreRecord) -> Result<(), StoreError>;

    /// All records for a user, newest first. Unknown users have an empty history.
    async fn history(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError>;

    async fn latest(&self, user_id: &str) -> Result<Option<ScoreRecord>, StoreError>;

    async fn create_contest(&self, contest: &ScoreContestRecord) -> Result<(), StoreError>;

    async fn contests(&self, user_id: &str) -> Result<Vec<ScoreContestRecord>, StoreError>;
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(sqlx::FromRow)]
struct ScoreRow {
    id: Uuid,
    user_id: String,
    score: f64,
    features: Json<BTreeMap<String, f64>>,
    explanation: Json<Vec<ExplanationItem>>,
    model_version: String,
    created_at: DateTime<Utc>,
}

impl From<ScoreRow> for ScoreRecord {
    fn from(row: ScoreRow) -> Self {
        ScoreRecord {
            id: row.id,
            user_id: row.user_id,
            score: row.score,
            features: row.features.0,
            explanation: row.explanation.0,
            model_version: row.model_version,
            timestamp: row.created_at,
        }
    }
}

const SCORE_COLUMNS: &str = "id, user_id, score, features, explanation, model_version, created_at";

/// Score records in `scores`, contests in `score_contests`
#[derive(Clone)]
pub struct PgScoreHistoryStore {
    db_pool: PgPool,
}

impl PgScoreHistoryStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ScoreHistoryStore for PgScoreHistoryStore {
    async fn append(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scores (id, user_id, score, features, explanation, model_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.score)
        .bind(Json(&record.features))
        .bind(Json(&record.explanation))
        .bind(&record.model_version)
        .bind(record.timestamp)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn history(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ScoreRow>(&format!(
            "SELECT {} FROM scores WHERE user_id = $1 ORDER BY created_at DESC, seq DESC",
            SCORE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(ScoreRecord::from).collect())
    }

    async fn latest(&self, user_id: &str) -> Result<Option<ScoreRecord>, StoreError> {
        let row = sqlx::query_as::<_, ScoreRow>(&format!(
            "SELECT {} FROM scores WHERE user_id = $1 ORDER BY created_at DESC, seq DESC LIMIT 1",
            SCORE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(ScoreRecord::from))
    }

    async fn create_contest(&self, contest: &ScoreContestRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO score_contests (id, user_id, reason, status, resolution, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(contest.id)
        .bind(&contest.user_id)
        .bind(&contest.reason)
        .bind(contest.status)
        .bind(&contest.resolution)
        .bind(contest.created_at)
        .bind(contest.resolved_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn contests(&self, user_id: &str) -> Result<Vec<ScoreContestRecord>, StoreError> {
        let contests = sqlx::query_as::<_, ScoreContestRecord>(
            r#"
            SELECT id, user_id, reason, status, resolution, created_at, resolved_at
            FROM score_contests
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(contests)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process history, for tests and local runs. Records are kept in append order.
#[derive(Default)]
pub struct InMemoryScoreHistoryStore {
    scores: RwLock<HashMap<String, Vec<ScoreRecord>>>,
    contests: RwLock<HashMap<String, Vec<ScoreContestRecord>>>,
}

impl InMemoryScoreHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScoreHistoryStore for InMemoryScoreHistoryStore {
    async fn append(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        self.scores
            .write()
            .await
            .entry(record.user_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn history(&self, user_id: &str) -> Result<Vec<ScoreRecord>, StoreError> {
        let mut records = self
            .scores
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        // stable: equal timestamps keep append order before the reverse
        records.sort_by_key(|r| r.timestamp);
        records.reverse();
        Ok(records)
    }

    async fn latest(&self, user_id: &str) -> Result<Option<ScoreRecord>, StoreError> {
        Ok(self.history(user_id).await?.into_iter().next())
    }

    async fn create_contest(&self, contest: &ScoreContestRecord) -> Result<(), StoreError> {
        self.contests
            .write()
            .await
            .entry(contest.user_id.clone())
            .or_default()
            .push(contest.clone());
        Ok(())
    }

    async fn contests(&self, user_id: &str) -> Result<Vec<ScoreContestRecord>, StoreError> {
        let mut contests = self
            .contests
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        contests.reverse();
        Ok(contests)
    }
}
