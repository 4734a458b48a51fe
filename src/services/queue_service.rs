//! Waiting-queue entry, withdrawal, and ticket polling.

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::queue_store::QueueKey,
    dto::queue::{
        CancelRequest, CancelResponse, EnqueueRequest, EnqueueResponse, TicketResponse,
    },
    error::ServiceError,
    state::{SharedState, now_ms},
};

/// Place a candidate into the waiting queue for its chosen bucket.
///
/// Re-enqueueing is an upsert: the stored rating is refreshed and the wait
/// clock restarts. Candidates already racing are turned away.
pub async fn enqueue(
    state: &SharedState,
    request: &EnqueueRequest,
) -> Result<EnqueueResponse, ServiceError> {
    if !state
        .config()
        .matching
        .supports(request.distance, request.group_size)
    {
        return Err(ServiceError::InvalidInput(format!(
            "no queue for distance {} with group size {}",
            request.distance, request.group_size
        )));
    }
    if state.is_participating(request.candidate_id) {
        return Err(ServiceError::InvalidState(
            "candidate is already in a live session".into(),
        ));
    }

    let store = state.require_queue_store().await?;
    let key = QueueKey::new(request.distance, request.group_size);
    let queued_at_ms = now_ms();
    store
        .enqueue(key, request.candidate_id, request.rating, queued_at_ms)
        .await?;

    info!(
        candidate_id = %request.candidate_id,
        bucket = %key,
        rating = request.rating,
        "candidate queued"
    );
    Ok(EnqueueResponse {
        distance: request.distance,
        group_size: request.group_size,
        queued_at_ms,
    })
}

/// Withdraw a candidate from the waiting queue.
///
/// `removed: false` means the entry was gone already, usually because the
/// scheduler matched the candidate first. The caller should then poll for a
/// ticket instead of assuming the withdrawal succeeded.
pub async fn cancel(
    state: &SharedState,
    request: &CancelRequest,
) -> Result<CancelResponse, ServiceError> {
    let store = state.require_queue_store().await?;
    let key = QueueKey::new(request.distance, request.group_size);
    let removed = store.cancel(key, request.candidate_id).await?;

    info!(
        candidate_id = %request.candidate_id,
        bucket = %key,
        removed,
        "queue withdrawal processed"
    );
    Ok(CancelResponse { removed })
}

/// Pending match ticket for a candidate, if the scheduler matched them.
pub fn pending_ticket(
    state: &SharedState,
    candidate_id: Uuid,
) -> Result<TicketResponse, ServiceError> {
    let ticket = state
        .pending_ticket(candidate_id)
        .ok_or_else(|| ServiceError::NotFound("no pending match ticket".into()))?;
    Ok(TicketResponse {
        ticket_id: ticket.ticket_id,
        session_id: ticket.session_id,
        expires_in_secs: ticket.remaining_secs(std::time::Instant::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        config::AppConfig,
        dao::queue_store::{DistanceClass, QueueStore, memory::MemoryQueueStore},
        state::AppState,
    };

    async fn ready_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        let store: Arc<dyn QueueStore> = Arc::new(MemoryQueueStore::new());
        state.install_queue_store(store).await;
        state
    }

    fn request(candidate_id: Uuid) -> EnqueueRequest {
        EnqueueRequest {
            candidate_id,
            distance: DistanceClass::Km5,
            group_size: 2,
            rating: 1_200,
        }
    }

    #[tokio::test]
    async fn enqueue_then_cancel_round_trip() {
        let state = ready_state().await;
        let candidate = Uuid::new_v4();

        enqueue(&state, &request(candidate)).await.unwrap();
        let response = cancel(
            &state,
            &CancelRequest {
                candidate_id: candidate,
                distance: DistanceClass::Km5,
                group_size: 2,
            },
        )
        .await
        .unwrap();
        assert!(response.removed);

        // A second cancel finds nothing.
        let response = cancel(
            &state,
            &CancelRequest {
                candidate_id: candidate,
                distance: DistanceClass::Km5,
                group_size: 2,
            },
        )
        .await
        .unwrap();
        assert!(!response.removed);
    }

    #[tokio::test]
    async fn unsupported_bucket_is_rejected() {
        let state = ready_state().await;
        let mut bad = request(Uuid::new_v4());
        bad.group_size = 7;

        let err = enqueue(&state, &bad).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn degraded_mode_refuses_enqueues() {
        let state = AppState::new(AppConfig::default());
        let err = enqueue(&state, &request(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn racing_candidate_cannot_requeue() {
        let state = ready_state().await;
        let candidate = Uuid::new_v4();
        crate::services::session_factory::create_session(
            &state,
            DistanceClass::Km3,
            &[candidate, Uuid::new_v4()],
            0.0,
        )
        .unwrap();

        let err = enqueue(&state, &request(candidate)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn ticket_poll_reports_not_found_without_a_match() {
        let state = ready_state().await;
        let err = pending_ticket(&state, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
