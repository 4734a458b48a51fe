//! Turns a claimed queue group into a live session plus match tickets.

use tracing::{error, info};
use uuid::Uuid;

use crate::{
    dao::queue_store::DistanceClass,
    error::ServiceError,
    state::{SharedState, session::RaceSession},
};

/// Create a standby session for a matched group and issue one single-use
/// ticket per member.
///
/// The group was already removed from the queue by the claim, so a failure
/// here drops the match entirely; the members are not silently requeued with
/// stale wait times. They re-enter the queue themselves.
pub fn create_session(
    state: &SharedState,
    distance: DistanceClass,
    members: &[Uuid],
    avg_wait_secs: f64,
) -> Result<Uuid, ServiceError> {
    if members.len() < 2 {
        return Err(ServiceError::InvalidState(format!(
            "refusing to create a session with {} member(s)",
            members.len()
        )));
    }
    if let Some(busy) = members.iter().find(|id| state.is_participating(**id)) {
        error!(
            participant_id = %busy,
            "matched candidate already belongs to a live session; dropping the match"
        );
        return Err(ServiceError::InvalidState(format!(
            "participant `{busy}` is already in a session"
        )));
    }

    let session = RaceSession::new(Uuid::new_v4(), distance, members, avg_wait_secs);
    let session_id = session.session_id;
    state.insert_session(session);

    for &participant_id in members {
        state.issue_ticket(participant_id, session_id);
    }

    info!(
        session_id = %session_id,
        distance = %distance,
        members = members.len(),
        avg_wait_secs,
        "session created, tickets issued"
    );
    Ok(session_id)
}
