//! In-process queue store used by tests and single-instance deployments.
//!
//! Buckets keep a `BTreeSet` ordered by (rating, candidate) so the lowest
//! window can be read without scanning. Not suitable once more than one
//! service instance runs: the atomicity only holds within this process.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    queue_store::{QueueEntry, QueueKey, QueueStore},
    storage::StorageResult,
};

#[derive(Default)]
struct Bucket {
    by_rating: BTreeSet<(u32, Uuid)>,
    ratings: HashMap<Uuid, u32>,
    wait_started_ms: HashMap<Uuid, u64>,
}

impl Bucket {
    fn remove(&mut self, candidate_id: Uuid) -> Option<u64> {
        let rating = self.ratings.remove(&candidate_id)?;
        self.by_rating.remove(&(rating, candidate_id));
        self.wait_started_ms.remove(&candidate_id)
    }
}

/// Shared-nothing in-memory implementation of [`QueueStore`].
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    buckets: Arc<Mutex<HashMap<QueueKey, Bucket>>>,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(
        &self,
        key: QueueKey,
        candidate_id: Uuid,
        rating: u32,
        enqueued_at_ms: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let buckets = self.buckets.clone();
        Box::pin(async move {
            let mut guard = buckets.lock().expect("queue store lock poisoned");
            let bucket = guard.entry(key).or_default();
            bucket.remove(candidate_id);
            bucket.by_rating.insert((rating, candidate_id));
            bucket.ratings.insert(candidate_id, rating);
            bucket.wait_started_ms.insert(candidate_id, enqueued_at_ms);
            Ok(())
        })
    }

    fn peek_lowest_window(
        &self,
        key: QueueKey,
        window: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntry>>> {
        let buckets = self.buckets.clone();
        Box::pin(async move {
            let guard = buckets.lock().expect("queue store lock poisoned");
            let entries = guard
                .get(&key)
                .map(|bucket| {
                    bucket
                        .by_rating
                        .iter()
                        .take(window)
                        .map(|&(rating, candidate_id)| QueueEntry {
                            candidate_id,
                            rating,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(entries)
        })
    }

    fn claim_group(
        &self,
        key: QueueKey,
        members: Vec<Uuid>,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<u64>>>> {
        let buckets = self.buckets.clone();
        Box::pin(async move {
            let mut guard = buckets.lock().expect("queue store lock poisoned");
            let Some(bucket) = guard.get_mut(&key) else {
                return Ok(None);
            };
            if !members.iter().all(|id| bucket.ratings.contains_key(id)) {
                return Ok(None);
            }
            let wait_started = members
                .iter()
                .map(|&id| bucket.remove(id).unwrap_or(0))
                .collect();
            Ok(Some(wait_started))
        })
    }

    fn cancel(
        &self,
        key: QueueKey,
        candidate_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let buckets = self.buckets.clone();
        Box::pin(async move {
            let mut guard = buckets.lock().expect("queue store lock poisoned");
            let removed = guard
                .get_mut(&key)
                .map(|bucket| {
                    let present = bucket.ratings.contains_key(&candidate_id);
                    bucket.remove(candidate_id);
                    present
                })
                .unwrap_or(false);
            Ok(removed)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::queue_store::DistanceClass;

    fn key() -> QueueKey {
        QueueKey::new(DistanceClass::Km5, 2)
    }

    #[tokio::test]
    async fn enqueue_is_an_idempotent_upsert() {
        let store = MemoryQueueStore::new();
        let candidate = Uuid::new_v4();

        store.enqueue(key(), candidate, 1200, 10).await.unwrap();
        store.enqueue(key(), candidate, 1350, 20).await.unwrap();

        let window = store.peek_lowest_window(key(), 10).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].rating, 1350);

        let wait = store
            .claim_group(key(), vec![candidate])
            .await
            .unwrap()
            .expect("candidate should still be queued");
        assert_eq!(wait, vec![20]);
    }

    #[tokio::test]
    async fn peek_returns_lowest_ratings_ascending() {
        let store = MemoryQueueStore::new();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (id, rating) in ids.iter().zip([1800u32, 1000, 1820, 1050]) {
            store.enqueue(key(), *id, rating, 0).await.unwrap();
        }

        let window = store.peek_lowest_window(key(), 2).await.unwrap();
        let ratings: Vec<u32> = window.iter().map(|e| e.rating).collect();
        assert_eq!(ratings, vec![1000, 1050]);
    }

    #[tokio::test]
    async fn claim_is_all_or_nothing() {
        let store = MemoryQueueStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.enqueue(key(), a, 1000, 5).await.unwrap();

        // b never enqueued: the claim must abort without touching a.
        let claimed = store.claim_group(key(), vec![a, b]).await.unwrap();
        assert!(claimed.is_none());
        assert_eq!(store.peek_lowest_window(key(), 10).await.unwrap().len(), 1);

        store.enqueue(key(), b, 1050, 7).await.unwrap();
        let claimed = store.claim_group(key(), vec![a, b]).await.unwrap();
        assert_eq!(claimed, Some(vec![5, 7]));
        assert!(store.peek_lowest_window(key(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_reports_whether_an_entry_was_removed() {
        let store = MemoryQueueStore::new();
        let candidate = Uuid::new_v4();
        store.enqueue(key(), candidate, 900, 0).await.unwrap();

        assert!(store.cancel(key(), candidate).await.unwrap());
        assert!(!store.cancel(key(), candidate).await.unwrap());
    }

    #[tokio::test]
    async fn buckets_are_independent() {
        let store = MemoryQueueStore::new();
        let candidate = Uuid::new_v4();
        store.enqueue(key(), candidate, 900, 0).await.unwrap();

        let other = QueueKey::new(DistanceClass::Km10, 2);
        assert!(store.peek_lowest_window(other, 10).await.unwrap().is_empty());
        assert!(!store.cancel(other, candidate).await.unwrap());
        assert_eq!(store.peek_lowest_window(key(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one_winner() {
        let store = MemoryQueueStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.enqueue(key(), a, 1000, 1).await.unwrap();
        store.enqueue(key(), b, 1050, 2).await.unwrap();

        let (first, second) = tokio::join!(
            store.claim_group(key(), vec![a, b]),
            store.claim_group(key(), vec![a, b]),
        );
        let winners = [first.unwrap(), second.unwrap()];
        assert_eq!(winners.iter().filter(|w| w.is_some()).count(), 1);
        assert!(store.peek_lowest_window(key(), 10).await.unwrap().is_empty());
    }
}
