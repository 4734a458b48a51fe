use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::queue::{
        CancelRequest, CancelResponse, EnqueueRequest, EnqueueResponse, TicketResponse,
    },
    error::AppError,
    services::queue_service,
    state::SharedState,
};

/// Routes handling waiting-queue operations.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/queue", post(enqueue))
        .route("/queue/cancel", post(cancel))
        .route("/queue/ticket/{candidate_id}", get(pending_ticket))
}

/// Join the waiting queue of a (distance, group size) bucket.
#[utoipa::path(
    post,
    path = "/queue",
    tag = "queue",
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Candidate queued", body = EnqueueResponse),
        (status = 409, description = "Candidate is already racing"),
        (status = 503, description = "Queue store unavailable")
    )
)]
pub async fn enqueue(
    State(state): State<SharedState>,
    Json(payload): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    payload.validate()?;
    let response = queue_service::enqueue(&state, &payload).await?;
    Ok(Json(response))
}

/// Withdraw from the waiting queue.
#[utoipa::path(
    post,
    path = "/queue/cancel",
    tag = "queue",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Withdrawal processed", body = CancelResponse),
        (status = 503, description = "Queue store unavailable")
    )
)]
pub async fn cancel(
    State(state): State<SharedState>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    payload.validate()?;
    let response = queue_service::cancel(&state, &payload).await?;
    Ok(Json(response))
}

/// Poll for the match ticket of a candidate.
#[utoipa::path(
    get,
    path = "/queue/ticket/{candidate_id}",
    tag = "queue",
    params(("candidate_id" = Uuid, Path, description = "Candidate to look up")),
    responses(
        (status = 200, description = "Pending ticket", body = TicketResponse),
        (status = 404, description = "No pending ticket")
    )
)]
pub async fn pending_ticket(
    State(state): State<SharedState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<TicketResponse>, AppError> {
    let response = queue_service::pending_ticket(&state, candidate_id)?;
    Ok(Json(response))
}
