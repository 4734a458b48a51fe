//! Periodic scheduler that turns waiting candidates into race sessions.
//!
//! Every tick the scheduler visits each configured (distance, group size)
//! bucket once: it reads the group-sized window of lowest-rated candidates
//! and claims it when the rating spread fits the fairness tolerance. A window
//! that fails the check leaves the whole bucket untouched until the next
//! tick; the head of the queue is never skipped over. Claims are atomic at
//! the store, so two instances ticking at once cannot match the same
//! candidate twice.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::queue_store::{QueueEntry, QueueKey, QueueStore},
    services::session_factory,
    state::{SharedState, now_ms},
};

/// Run the scheduler until the process exits.
pub async fn run(state: SharedState) {
    let mut ticker = tokio::time::interval(state.config().matching.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        interval_ms = state.config().matching.tick_interval_ms,
        "matchmaking scheduler started"
    );
    loop {
        ticker.tick().await;
        run_tick(&state).await;
    }
}

/// One scheduler pass over every configured bucket.
///
/// Buckets are isolated: a storage error in one bucket is logged and the
/// remaining buckets still get their pass.
pub async fn run_tick(state: &SharedState) {
    let Some(store) = state.queue_store().await else {
        debug!("queue store unavailable; skipping matchmaking tick");
        return;
    };

    let matching = &state.config().matching;
    for &distance in &matching.distances {
        for &group_size in &matching.group_sizes {
            let key = QueueKey::new(distance, group_size);
            if let Err(err) = match_bucket(state, &store, key).await {
                warn!(bucket = %key, error = %err, "bucket pass failed");
            }
        }
    }
}

/// Try to match the head window of one bucket.
async fn match_bucket(
    state: &SharedState,
    store: &Arc<dyn QueueStore>,
    key: QueueKey,
) -> Result<(), crate::dao::storage::StorageError> {
    let group_size = key.group_size as usize;
    let window = store.peek_lowest_window(key, group_size).await?;
    if window.len() < group_size {
        return Ok(());
    }

    if !within_tolerance(&window, state.config().matching.rating_tolerance) {
        // Fairness over throughput: the bucket waits rather than matching
        // around its lowest-rated candidate.
        debug!(bucket = %key, "head window exceeds the rating tolerance; skipping this tick");
        return Ok(());
    }

    let members: Vec<Uuid> = window.iter().map(|entry| entry.candidate_id).collect();
    match store.claim_group(key, members.clone()).await? {
        Some(wait_started) => {
            let avg_wait = average_wait_secs(&wait_started, now_ms());
            if let Err(err) =
                session_factory::create_session(state, key.distance, &members, avg_wait)
            {
                error!(bucket = %key, error = %err, "claimed group could not become a session");
            }
        }
        None => {
            // Someone in the window cancelled or was claimed elsewhere since
            // the peek. Wait for the next tick.
            debug!(bucket = %key, "claim lost the race; window stale");
        }
    }
    Ok(())
}

/// Whether a rating-sorted run of candidates fits the fairness bound.
fn within_tolerance(candidates: &[QueueEntry], tolerance: u32) -> bool {
    match (candidates.first(), candidates.last()) {
        (Some(lowest), Some(highest)) => highest.rating - lowest.rating <= tolerance,
        _ => false,
    }
}

/// Average queue wait in seconds; entries without a wait marker are skipped.
fn average_wait_secs(wait_started_ms: &[u64], now_ms: u64) -> f64 {
    let waits: Vec<f64> = wait_started_ms
        .iter()
        .filter(|&&started| started > 0)
        .map(|&started| now_ms.saturating_sub(started) as f64 / 1_000.0)
        .collect();
    if waits.is_empty() {
        return 0.0;
    }
    waits.iter().sum::<f64>() / waits.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::queue_store::{DistanceClass, memory::MemoryQueueStore},
        state::AppState,
    };

    async fn state_with_store() -> (SharedState, Arc<dyn QueueStore>) {
        let state = AppState::new(AppConfig::default());
        let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
        state.install_queue_store(store.clone()).await;
        (state, store)
    }

    async fn enqueue(store: &Arc<dyn QueueStore>, key: QueueKey, rating: u32) -> Uuid {
        let id = Uuid::new_v4();
        store.enqueue(key, id, rating, 1_000).await.unwrap();
        id
    }

    #[tokio::test]
    async fn tight_pairs_match_low_with_low_and_high_with_high() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km5, 2);
        for rating in [1_000, 1_050, 1_800, 1_820] {
            enqueue(&store, key, rating).await;
        }

        // One group per bucket per tick: the head pair first, then the next.
        run_tick(&state).await;
        assert_eq!(state.live_session_count(), 1);

        run_tick(&state).await;
        assert_eq!(state.live_session_count(), 2);
        assert!(store.peek_lowest_window(key, 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wide_rating_gap_blocks_matching() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km5, 2);
        enqueue(&store, key, 1_000).await;
        enqueue(&store, key, 1_300).await;

        run_tick(&state).await;

        assert_eq!(state.live_session_count(), 0);
        assert_eq!(store.peek_lowest_window(key, 16).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_tolerance_head_holds_the_whole_bucket() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km3, 2);
        // 500 fits nobody; the bucket waits rather than matching around it.
        enqueue(&store, key, 500).await;
        enqueue(&store, key, 1_400).await;
        enqueue(&store, key, 1_450).await;

        run_tick(&state).await;

        assert_eq!(state.live_session_count(), 0);
        assert_eq!(store.peek_lowest_window(key, 16).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn undersized_bucket_is_left_alone() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km10, 3);
        enqueue(&store, key, 1_000).await;
        enqueue(&store, key, 1_010).await;

        run_tick(&state).await;

        assert_eq!(state.live_session_count(), 0);
        assert_eq!(store.peek_lowest_window(key, 16).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gap_exactly_at_tolerance_still_matches() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km5, 2);
        enqueue(&store, key, 1_000).await;
        enqueue(&store, key, 1_200).await;

        run_tick(&state).await;

        assert_eq!(state.live_session_count(), 1);
    }

    #[tokio::test]
    async fn matched_members_get_tickets_for_the_same_session() {
        let (state, store) = state_with_store().await;
        let key = QueueKey::new(DistanceClass::Km5, 2);
        let a = enqueue(&store, key, 1_000).await;
        let b = enqueue(&store, key, 1_100).await;

        run_tick(&state).await;

        let ticket_a = state.pending_ticket(a).expect("ticket for a");
        let ticket_b = state.pending_ticket(b).expect("ticket for b");
        assert_eq!(ticket_a.session_id, ticket_b.session_id);
        assert_ne!(ticket_a.ticket_id, ticket_b.ticket_id);
    }

    #[tokio::test]
    async fn average_wait_ignores_missing_markers() {
        assert_eq!(average_wait_secs(&[0, 0], 10_000), 0.0);
        assert_eq!(average_wait_secs(&[4_000, 0, 8_000], 10_000), 4.0);
    }
}
