use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::queue_store::DistanceClass,
    dto::format_timestamp,
    services::ranking::RankedParticipant,
    state::session::{RaceSession, RunnerStatus, SessionStatus},
};

/// One line of the live or final standings.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantStanding {
    /// Runner identifier.
    pub participant_id: Uuid,
    /// 1-based rank within the session.
    pub rank: u32,
    /// Current runner status.
    pub status: RunnerStatus,
    /// Metres covered so far.
    pub cumulative_distance: f64,
    /// Metres left to the target, clamped at zero.
    pub remaining_distance: f64,
    /// Progress toward the target, 0..=100.
    pub progress_percent: f64,
    /// Smoothed pace in seconds per kilometre, once enough reports arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pace_secs_per_km: Option<f64>,
    /// Server finish time for finished runners, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl From<RankedParticipant> for ParticipantStanding {
    fn from(value: RankedParticipant) -> Self {
        Self {
            participant_id: value.participant_id,
            rank: value.rank,
            status: value.status,
            cumulative_distance: value.cumulative_distance,
            remaining_distance: value.remaining_distance,
            progress_percent: value.progress_percent,
            pace_secs_per_km: value.pace_secs_per_km,
            finished_at_ms: value.finished_at_ms,
        }
    }
}

/// Public projection of one live session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummaryResponse {
    /// Session identifier.
    pub session_id: Uuid,
    /// Distance class being raced.
    pub distance: DistanceClass,
    /// Race target in metres.
    pub target_meters: f64,
    /// Session lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp, RFC3339.
    pub created_at: String,
    /// Average queue wait of the matched members, seconds.
    pub avg_wait_secs: f64,
    /// Current ranked standings.
    pub standings: Vec<ParticipantStanding>,
}

impl SessionSummaryResponse {
    /// Build the projection from a session and its computed standings.
    pub fn from_session(session: &RaceSession, standings: Vec<ParticipantStanding>) -> Self {
        Self {
            session_id: session.session_id,
            distance: session.distance,
            target_meters: session.target_meters(),
            status: session.status,
            created_at: format_timestamp(session.created_at),
            avg_wait_secs: session.avg_wait_secs,
            standings,
        }
    }
}

/// Final standings handed to the external results collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct FinalResultsPayload {
    /// Session the results belong to.
    pub session_id: Uuid,
    /// Distance class that was raced.
    pub distance: DistanceClass,
    /// Terminal lifecycle status (`COMPLETED` or `CANCELLED`).
    pub status: SessionStatus,
    /// Server time the session closed, epoch milliseconds.
    pub closed_at_ms: u64,
    /// Ordered participant results, rank 1 first.
    pub results: Vec<ParticipantStanding>,
}
