use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dao::queue_store::DistanceClass;
use crate::dto::validation::{validate_group_size, validate_rating};

/// Payload used to join a waiting queue.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    /// Candidate asking to be matched.
    pub candidate_id: Uuid,
    /// Distance class the candidate wants to race.
    pub distance: DistanceClass,
    /// Desired number of runners in the matched group.
    pub group_size: u8,
    /// Current skill rating of the candidate.
    pub rating: u32,
}

impl Validate for EnqueueRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_group_size(self.group_size) {
            errors.add("group_size", e);
        }
        if let Err(e) = validate_rating(self.rating) {
            errors.add("rating", e);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload used to leave a waiting queue.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    /// Candidate withdrawing from the queue.
    pub candidate_id: Uuid,
    /// Distance class of the entry to remove.
    pub distance: DistanceClass,
    /// Group size of the entry to remove.
    pub group_size: u8,
}

impl Validate for CancelRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_group_size(self.group_size) {
            errors.add("group_size", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Acknowledgement that a candidate now occupies a queue slot.
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    /// Distance class of the joined bucket.
    pub distance: DistanceClass,
    /// Group size of the joined bucket.
    pub group_size: u8,
    /// Server time the wait started, epoch milliseconds.
    pub queued_at_ms: u64,
}

/// Result of a cancel request.
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    /// Whether a waiting entry was actually removed. `false` means the
    /// candidate was never queued or has already been matched.
    pub removed: bool,
}

/// A pending match ticket, as returned by the poll endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct TicketResponse {
    /// Ticket to present during the session-join handshake.
    pub ticket_id: Uuid,
    /// Session the ticket admits into.
    pub session_id: Uuid,
    /// Seconds left before the ticket expires unconsumed.
    pub expires_in_secs: u64,
}
