//! Waiting-queue storage: one priority-ordered bucket per (distance, group size).

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::storage::StorageResult;

/// Discrete race distance bucket partitioning the waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum DistanceClass {
    /// 3 kilometre race.
    #[serde(rename = "KM_3")]
    Km3,
    /// 5 kilometre race.
    #[serde(rename = "KM_5")]
    Km5,
    /// 10 kilometre race.
    #[serde(rename = "KM_10")]
    Km10,
}

impl DistanceClass {
    /// Every distance class the service knows about.
    pub const ALL: [DistanceClass; 3] = [DistanceClass::Km3, DistanceClass::Km5, DistanceClass::Km10];

    /// Race target in metres; a participant finishes once their cumulative
    /// distance reaches this value.
    pub fn target_meters(self) -> f64 {
        match self {
            DistanceClass::Km3 => 3_000.0,
            DistanceClass::Km5 => 5_000.0,
            DistanceClass::Km10 => 10_000.0,
        }
    }

    /// Stable identifier used in storage keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceClass::Km3 => "KM_3",
            DistanceClass::Km5 => "KM_5",
            DistanceClass::Km10 => "KM_10",
        }
    }
}

impl fmt::Display for DistanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one waiting-queue bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    /// Distance class the candidates want to race.
    pub distance: DistanceClass,
    /// Number of runners the candidates want to be grouped with.
    pub group_size: u8,
}

impl QueueKey {
    /// Build a bucket key.
    pub fn new(distance: DistanceClass, group_size: u8) -> Self {
        Self {
            distance,
            group_size,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.distance, self.group_size)
    }
}

/// One waiting candidate as returned by [`QueueStore::peek_lowest_window`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Candidate identifier.
    pub candidate_id: Uuid,
    /// Skill rating recorded at enqueue time.
    pub rating: u32,
}

/// Abstraction over the shared waiting-queue store.
///
/// Multiple service instances may run against the same backing store, so every
/// mutation must be atomic at the store level. [`QueueStore::claim_group`] is
/// the primitive that protects against double-matching: it removes a whole
/// window or nothing at all.
pub trait QueueStore: Send + Sync {
    /// Idempotent upsert: a candidate occupies at most one slot per bucket.
    /// Re-enqueueing replaces the rating and resets the wait-start timestamp.
    fn enqueue(
        &self,
        key: QueueKey,
        candidate_id: Uuid,
        rating: u32,
        enqueued_at_ms: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Up to `window` entries with the lowest ratings, ascending, without
    /// removing anything.
    fn peek_lowest_window(
        &self,
        key: QueueKey,
        window: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntry>>>;

    /// Atomic all-or-nothing removal of a matched window.
    ///
    /// Succeeds only when every member is still queued, removing all of them
    /// together with their wait markers and returning the recorded wait-start
    /// timestamps (parallel to `members`, `0` when a marker was missing).
    /// Returns `None` without side effects when any member has vanished, which
    /// is the expected outcome when a cancel or a concurrent tick won the race.
    fn claim_group(
        &self,
        key: QueueKey,
        members: Vec<Uuid>,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<u64>>>>;

    /// Remove a single waiting entry; reports whether anything was removed.
    fn cancel(&self, key: QueueKey, candidate_id: Uuid)
    -> BoxFuture<'static, StorageResult<bool>>;

    /// Cheap connectivity probe used by the store supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
