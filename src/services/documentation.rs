use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Stride Race Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::queue::enqueue,
        crate::routes::queue::cancel,
        crate::routes::queue::pending_ticket,
        crate::routes::session::session_summary,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::queue::EnqueueRequest,
            crate::dto::queue::CancelRequest,
            crate::dto::queue::EnqueueResponse,
            crate::dto::queue::CancelResponse,
            crate::dto::queue::TicketResponse,
            crate::dto::session::SessionSummaryResponse,
            crate::dto::session::ParticipantStanding,
            crate::dto::ws::RunnerInboundMessage,
            crate::dto::ws::RunnerOutboundMessage,
            crate::dto::ws::TelemetryFrame,
            crate::dto::ws::FinishFrame,
            crate::dto::ws::PositionDto,
            crate::dto::ws::JoinedFrame,
            crate::dto::ws::RankedUpdateFrame,
            crate::dao::queue_store::DistanceClass,
            crate::state::session::SessionStatus,
            crate::state::session::RunnerStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "queue", description = "Matchmaking waiting queue"),
        (name = "sessions", description = "Live race sessions"),
        (name = "runners", description = "WebSocket operations for runner clients"),
    )
)]
pub struct ApiDoc;
