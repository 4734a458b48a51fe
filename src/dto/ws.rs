use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::queue_store::DistanceClass,
    dto::{
        session::ParticipantStanding,
        validation::{validate_distance, validate_latitude, validate_longitude},
    },
    state::session::{GeoPoint, SessionStatus},
};

/// Error raised while decoding an inbound runner frame.
#[derive(Debug, Error)]
pub enum InboundFrameError {
    /// Frame was not valid JSON for any known message.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Frame decoded but carried out-of-range values.
    #[error("invalid frame: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// A GPS fix as sent by the app.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct PositionDto {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Validate for PositionDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_latitude(self.lat) {
            errors.add("lat", e);
        }
        if let Err(e) = validate_longitude(self.lng) {
            errors.add("lng", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl From<PositionDto> for GeoPoint {
    fn from(value: PositionDto) -> Self {
        Self {
            lat: value.lat,
            lng: value.lng,
        }
    }
}

/// Periodic telemetry report streamed during a race.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct TelemetryFrame {
    /// Total metres covered since the race started.
    pub cumulative_distance: f64,
    /// Current GPS fix.
    pub position: PositionDto,
    /// Client-side capture time, epoch milliseconds.
    pub client_timestamp_ms: u64,
}

impl Validate for TelemetryFrame {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_distance(self.cumulative_distance) {
            errors.add("cumulative_distance", e);
        }
        if let Err(position_errors) = self.position.validate() {
            errors.merge_self("position", Err(position_errors));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Explicit end-of-run signal with the client's closing numbers.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema)]
pub struct FinishFrame {
    /// Final cumulative distance, metres.
    pub final_distance: f64,
    /// Total run time as measured by the client, seconds.
    #[serde(default)]
    pub final_time_secs: Option<f64>,
    /// Final average pace as measured by the client, seconds per kilometre.
    #[serde(default)]
    pub final_pace_secs_per_km: Option<f64>,
    /// Client-side capture time, epoch milliseconds.
    pub client_timestamp_ms: u64,
}

impl Validate for FinishFrame {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_distance(self.final_distance) {
            errors.add("final_distance", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Messages accepted from runner WebSocket clients.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerInboundMessage {
    /// Handshake: present a match ticket to enter the session.
    Join {
        /// Participant joining.
        participant_id: Uuid,
        /// Session the ticket was issued for.
        session_id: Uuid,
        /// The single-use match ticket.
        ticket_id: Uuid,
    },
    /// Live position report.
    Telemetry(TelemetryFrame),
    /// The client finished its run.
    Finish(FinishFrame),
    /// The runner quits the race.
    GiveUp,
    /// Anything newer clients may send that this server does not know.
    #[serde(other)]
    Unknown,
}

impl RunnerInboundMessage {
    /// Parse and validate a frame from raw socket text.
    pub fn from_json_str(raw: &str) -> Result<Self, InboundFrameError> {
        let message: Self = serde_json::from_str(raw)?;
        match &message {
            RunnerInboundMessage::Telemetry(frame) => frame.validate()?,
            RunnerInboundMessage::Finish(frame) => frame.validate()?,
            _ => {}
        }
        Ok(message)
    }
}

/// Ranked broadcast pushed to every connected runner of a session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RankedUpdateFrame {
    /// Session this update belongs to.
    pub session_id: Uuid,
    /// Session lifecycle status at broadcast time.
    pub status: SessionStatus,
    /// Server time of the broadcast, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Standings ordered by rank.
    pub participants: Vec<ParticipantStanding>,
}

/// Acknowledgement completing the join handshake.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JoinedFrame {
    /// Session the runner entered.
    pub session_id: Uuid,
    /// Distance class being raced.
    pub distance: DistanceClass,
    /// Race target in metres.
    pub target_meters: f64,
    /// Session lifecycle status at join time.
    pub status: SessionStatus,
}

/// Messages pushed to runner WebSocket clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerOutboundMessage {
    /// Join handshake succeeded.
    Joined(JoinedFrame),
    /// Live ranked standings.
    RankedUpdate(RankedUpdateFrame),
    /// The previous inbound frame was rejected.
    Rejected {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_frame_round_trips_through_the_tag() {
        let raw = r#"{
            "type": "telemetry",
            "cumulative_distance": 1250.5,
            "position": { "lat": 37.51, "lng": 127.04 },
            "client_timestamp_ms": 1700000000000
        }"#;
        match RunnerInboundMessage::from_json_str(raw).unwrap() {
            RunnerInboundMessage::Telemetry(frame) => {
                assert_eq!(frame.cumulative_distance, 1250.5);
            }
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let raw = r#"{
            "type": "telemetry",
            "cumulative_distance": 10.0,
            "position": { "lat": 95.0, "lng": 127.04 },
            "client_timestamp_ms": 1700000000000
        }"#;
        assert!(matches!(
            RunnerInboundMessage::from_json_str(raw),
            Err(InboundFrameError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_message_type_parses_as_unknown() {
        let raw = r#"{ "type": "cheer", "emoji": "👏" }"#;
        assert!(matches!(
            RunnerInboundMessage::from_json_str(raw).unwrap(),
            RunnerInboundMessage::Unknown
        ));
    }
}
