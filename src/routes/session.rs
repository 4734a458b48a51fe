use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::session::SessionSummaryResponse, error::AppError, services::race_service,
    state::SharedState,
};

/// Routes exposing read-only session projections.
pub fn router() -> Router<SharedState> {
    Router::new().route("/sessions/{id}", get(session_summary))
}

/// Current standings and lifecycle status of one live session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Identifier of the session")),
    responses(
        (status = 200, description = "Live session summary", body = SessionSummaryResponse),
        (status = 404, description = "Session is not live")
    )
)]
pub async fn session_summary(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummaryResponse>, AppError> {
    let summary = race_service::session_summary(&state, id).await?;
    Ok(Json(summary))
}
