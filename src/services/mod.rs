/// Ranked-update fanout to connected runners.
pub mod broadcast;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Periodic matchmaking scheduler.
pub mod matchmaking;
/// Waiting-queue entry and exit operations.
pub mod queue_service;
/// Live race telemetry and lifecycle handling.
pub mod race_service;
/// Deterministic standings computation.
pub mod ranking;
/// Delivery of final standings to the results collaborator.
pub mod results;
/// Session creation from matched groups.
pub mod session_factory;
/// Queue-store connection supervisor with reconnection backoff.
pub mod storage_supervisor;
/// Timeout governor sweeping overdue sessions.
pub mod timeout;
/// WebSocket connection and message handling service.
pub mod ws_service;
