//! Long-lived event consumer
//!
//! Each delivery is applied to the feature store to completion, durable write
//! and cache refresh included, before its offset is committed. A delivery that
//! keeps failing is retried a bounded number of times and then dead-lettered
//! to the log so the stream keeps moving.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::source::{Delivery, EventSource};
use crate::features::FeatureStore;

/// Default delay before the first retry; later retries back off linearly
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Counters for one consumer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub applied: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
}

pub struct EventConsumer<S: EventSource> {
    source: S,
    store: Arc<FeatureStore>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl<S: EventSource> EventConsumer<S> {
    pub fn new(source: S, store: Arc<FeatureStore>, max_attempts: u32) -> Self {
        Self {
            source,
            store,
            max_attempts: max_attempts.max(1),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Consume until the source closes
    pub async fn run(mut self) -> ConsumerStats {
        tracing::info!(max_attempts = self.max_attempts, "Starting event consumer");
        let mut stats = ConsumerStats::default();

        while let Some(delivery) = self.source.recv().await {
            let offset = delivery.offset;
            match self.process(delivery).await {
                Outcome::Applied => stats.applied += 1,
                Outcome::Skipped => stats.skipped += 1,
                Outcome::DeadLettered => stats.dead_lettered += 1,
            }

            if let Err(e) = self.source.commit(offset).await {
                tracing::error!(offset, error = %e, "Failed to commit event offset");
            }
        }

        tracing::info!(
            applied = stats.applied,
            skipped = stats.skipped,
            dead_lettered = stats.dead_lettered,
            "Event source closed, consumer stopped"
        );
        stats
    }

    async fn process(&self, delivery: Delivery) -> Outcome {
        let Some((user_id, event)) = delivery.message.to_user_event() else {
            tracing::warn!(
                offset = delivery.offset,
                event_type = %delivery.message.event_type,
                "Skipping event without a user or with an unknown type"
            );
            return Outcome::Skipped;
        };

        for attempt in 1..=self.max_attempts {
            match self.store.apply(&user_id, &event, Utc::now()).await {
                Ok(_) => {
                    tracing::debug!(offset = delivery.offset, user_id = %user_id, event = event.kind(), "Event applied");
                    return Outcome::Applied;
                }
                Err(e) => {
                    tracing::warn!(
                        offset = delivery.offset,
                        user_id = %user_id,
                        attempt,
                        error = %e,
                        "Failed to apply event"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_backoff * attempt).await;
                    }
                }
            }
        }

        tracing::error!(
            offset = delivery.offset,
            user_id = %user_id,
            event = event.kind(),
            message = ?delivery.message,
            "Event dead-lettered after exhausting retries"
        );
        Outcome::DeadLettered
    }
}

impl<S: EventSource + Sync + 'static> EventConsumer<S> {
    /// Run on a background task, keeping the handle so shutdown can drain it
    pub fn spawn(self) -> ConsumerHandle {
        ConsumerHandle {
            handle: tokio::spawn(self.run()),
        }
    }
}

/// Handle to a spawned consumer
pub struct ConsumerHandle {
    handle: JoinHandle<ConsumerStats>,
}

impl ConsumerHandle {
    /// Wait for the consumer to finish the queued events.
    ///
    /// The consumer only returns once every publisher is dropped, so callers
    /// release those first. Gives up and aborts the task after `grace`,
    /// returning `None`.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ConsumerStats> {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(stats)) => {
                tracing::info!(
                    applied = stats.applied,
                    skipped = stats.skipped,
                    dead_lettered = stats.dead_lettered,
                    "Event consumer drained"
                );
                Some(stats)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Event consumer task failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Event consumer did not drain in time, aborting"
                );
                self.handle.abort();
                None
            }
        }
    }
}

enum Outcome {
    Applied,
    Skipped,
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::features::{
        InMemoryCache, InMemoryProfileRepository, ProfileRepository, StoredProfile,
        UserFeatureProfile,
    };
    use crate::ingress::message::EventMessage;
    use crate::ingress::source::channel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` saves
    struct UnreliableRepository {
        inner: InMemoryProfileRepository,
        failures: AtomicU32,
    }

    #[async_trait]
    impl ProfileRepository for UnreliableRepository {
        async fn load(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
            self.inner.load(user_id).await
        }

        async fn save(&self, user_id: &str, profile: &UserFeatureProfile) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("timeout".to_string()));
            }
            self.inner.save(user_id, profile).await
        }
    }

    fn store_with(failures: u32) -> (Arc<FeatureStore>, Arc<UnreliableRepository>) {
        let repo = Arc::new(UnreliableRepository {
            inner: InMemoryProfileRepository::new(),
            failures: AtomicU32::new(failures),
        });
        let store = Arc::new(FeatureStore::new(Arc::new(InMemoryCache::new()), repo.clone()));
        (store, repo)
    }

    #[tokio::test]
    async fn test_consumer_applies_events_in_order() {
        let (store, _) = store_with(0);
        let (publisher, source) = channel(8);
        for amount in [100.0, 200.0, 300.0] {
            publisher
                .publish(EventMessage::new("u1", "pix_payment", json!({ "amount": amount })))
                .unwrap();
        }
        publisher.publish(EventMessage::new("u1", "chargeback", json!({}))).unwrap();
        drop(publisher);

        let stats = EventConsumer::new(source, store.clone(), 3).run().await;
        assert_eq!(stats.applied, 4);

        let profile = store.get("u1").await;
        assert_eq!(profile.pix_volume, 600.0);
        assert_eq!(profile.total_transactions, 3);
        assert_eq!(profile.total_chargebacks, 1);
        assert!(profile.transactions.back().unwrap().chargeback);
    }

    #[tokio::test]
    async fn test_unroutable_events_are_skipped_and_committed() {
        let (store, _) = store_with(0);
        let (publisher, source) = channel(8);
        publisher.publish(EventMessage::new("u1", "unknown_kind", json!({}))).unwrap();
        drop(publisher);

        let stats = EventConsumer::new(source, store, 3).run().await;
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.applied, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (store, _) = store_with(2);
        let (publisher, source) = channel(8);
        publisher.publish(EventMessage::new("u1", "app_connection", json!({}))).unwrap();
        drop(publisher);

        let stats = EventConsumer::new(source, store.clone(), 3)
            .with_retry_backoff(Duration::from_millis(1))
            .run()
            .await;
        assert_eq!(stats.applied, 1);
        assert_eq!(store.get("u1").await.app_connections, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_dead_lettered() {
        let (store, repo) = store_with(10);
        let (publisher, source) = channel(8);
        publisher.publish(EventMessage::new("u1", "app_connection", json!({}))).unwrap();
        publisher.publish(EventMessage::new("u2", "app_connection", json!({}))).unwrap();
        drop(publisher);

        let stats = EventConsumer::new(source, store, 2)
            .with_retry_backoff(Duration::from_millis(1))
            .run()
            .await;
        assert_eq!(stats.dead_lettered, 2);
        assert!(repo.inner.load("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_events() {
        let (store, _) = store_with(0);
        let (publisher, source) = channel(8);
        let consumer = EventConsumer::new(source, store.clone(), 3).spawn();
        for amount in [10.0, 20.0, 30.0] {
            publisher
                .publish(EventMessage::new("u1", "pix_payment", json!({ "amount": amount })))
                .unwrap();
        }
        drop(publisher);

        let stats = consumer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats.applied, 3);
        assert_eq!(store.get("u1").await.pix_volume, 60.0);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_while_publishers_remain() {
        let (store, _) = store_with(0);
        let (publisher, source) = channel(8);
        let consumer = EventConsumer::new(source, store, 3).spawn();

        assert!(consumer.shutdown(Duration::from_millis(50)).await.is_none());
        drop(publisher);
    }
}
