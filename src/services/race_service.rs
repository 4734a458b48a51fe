//! Live race operations: joining, telemetry, finishing, quitting, and
//! session close-out.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::{FinalResultsPayload, ParticipantStanding, SessionSummaryResponse},
        ws::{FinishFrame, JoinedFrame, TelemetryFrame},
    },
    error::ServiceError,
    services::{broadcast, ranking},
    state::{
        SharedState, now_ms,
        session::{
            GeoPoint, PositionReport, RaceSession, ReportOutcome, RunnerStatus, SessionEvent,
            SessionStatus,
        },
    },
};

/// Consume a match ticket and admit the runner into its session.
///
/// The ticket removal is atomic, so the same ticket presented over two
/// sockets at once admits exactly one of them.
pub async fn join_session(
    state: &SharedState,
    participant_id: Uuid,
    session_id: Uuid,
    ticket_id: Uuid,
) -> Result<JoinedFrame, ServiceError> {
    state.take_ticket(participant_id, ticket_id, session_id)?;

    let session = state
        .session(session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` is not live")))?;
    let session = session.lock().await;
    if session.status.is_terminal() {
        return Err(ServiceError::InvalidState(
            "session already closed".into(),
        ));
    }

    info!(participant_id = %participant_id, session_id = %session_id, "runner joined");
    Ok(JoinedFrame {
        session_id,
        distance: session.distance,
        target_meters: session.target_meters(),
        status: session.status,
    })
}

/// Apply one telemetry frame from a connected runner.
pub async fn handle_report(
    state: &SharedState,
    participant_id: Uuid,
    frame: &TelemetryFrame,
) -> Result<(), ServiceError> {
    let report = PositionReport {
        position: frame.position.into(),
        cumulative_distance: frame.cumulative_distance,
        client_timestamp_ms: frame.client_timestamp_ms,
    };
    apply_and_broadcast(state, participant_id, report).await
}

/// Apply a finish frame.
///
/// The client-side totals are advisory; the server keeps its own finish
/// decision. A final distance short of the target is folded in as ordinary
/// telemetry and the runner keeps racing until the target or the timeout.
pub async fn handle_finish(
    state: &SharedState,
    participant_id: Uuid,
    frame: &FinishFrame,
) -> Result<(), ServiceError> {
    let session_handle = session_of(state, participant_id)?;
    let last_position = {
        let session = session_handle.lock().await;
        session
            .participants
            .get(&participant_id)
            .and_then(|p| p.last_position)
    };
    let report = PositionReport {
        position: last_position.unwrap_or(GeoPoint { lat: 0.0, lng: 0.0 }),
        cumulative_distance: frame.final_distance,
        client_timestamp_ms: frame.client_timestamp_ms,
    };
    apply_and_broadcast(state, participant_id, report).await
}

/// The runner quits its race; a terminal status that never reverts.
pub async fn give_up(state: &SharedState, participant_id: Uuid) -> Result<(), ServiceError> {
    let session_handle = session_of(state, participant_id)?;
    let mut session = session_handle.lock().await;

    let outcome = session.terminate_participant(participant_id, RunnerStatus::GaveUp, now_ms())?;
    if !outcome.changed {
        debug!(participant_id = %participant_id, "give-up ignored; runner already terminal");
        return Ok(());
    }
    info!(participant_id = %participant_id, session_id = %session.session_id, "runner gave up");

    let standings = broadcast::broadcast_ranked_update(state, &session);
    if outcome.completed {
        close_session(state, &session, standings);
    }
    Ok(())
}

/// Handle a runner's socket going away.
///
/// A standby session whose last socket disappears before any telemetry is
/// abandoned outright; nobody is left to start it. Running sessions are left
/// to the timeout governor.
pub async fn handle_disconnect(state: &SharedState, participant_id: Uuid) {
    let Ok(session_handle) = session_of(state, participant_id) else {
        return;
    };
    let session = session_handle.lock().await;
    if session.status != SessionStatus::Standby
        || state.session_has_connected_runners(session.session_id)
    {
        return;
    }

    let mut session = session;
    match session.apply_event(SessionEvent::Cancel) {
        Ok(_) => {
            info!(session_id = %session.session_id, "standby session abandoned; cancelling");
            close_session(state, &session, Vec::new());
        }
        Err(err) => warn!(session_id = %session.session_id, error = %err, "cancel failed"),
    }
}

/// Public read-only projection of one live session.
pub async fn session_summary(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionSummaryResponse, ServiceError> {
    let session = state
        .session(session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` is not live")))?;
    let session = session.lock().await;
    let standings = ranking::rank_participants(&session)
        .into_iter()
        .map(ParticipantStanding::from)
        .collect();
    Ok(SessionSummaryResponse::from_session(&session, standings))
}

/// Run the lifecycle checks of one session; used by the periodic governor.
///
/// A session still in standby past its join window with no connected runner
/// is abandoned: its tickets have expired, so nobody can ever start it, and
/// keeping it would lock its roster out of matchmaking forever.
pub async fn sweep_session(state: &SharedState, session_id: Uuid, now_ms: u64) {
    let Some(session_handle) = state.session(session_id) else {
        return;
    };
    let mut session = session_handle.lock().await;

    let join_window_ms = state.config().matching.ticket_ttl().as_millis() as u64;
    if session.standby_expired(now_ms, join_window_ms)
        && !state.session_has_connected_runners(session_id)
    {
        match session.apply_event(SessionEvent::Cancel) {
            Ok(_) => {
                info!(session_id = %session.session_id, "standby session never started; cancelling");
                close_session(state, &session, Vec::new());
            }
            Err(err) => warn!(session_id = %session.session_id, error = %err, "cancel failed"),
        }
        return;
    }

    match session.force_timeouts(now_ms) {
        Ok(Some(sweep)) if !sweep.timed_out.is_empty() => {
            info!(
                session_id = %session.session_id,
                timed_out = sweep.timed_out.len(),
                "timeout window closed; stragglers forced out"
            );
            let standings = broadcast::broadcast_ranked_update(state, &session);
            if sweep.completed {
                close_session(state, &session, standings);
            }
        }
        Ok(_) => {}
        Err(err) => warn!(session_id = %session.session_id, error = %err, "timeout sweep failed"),
    }
}

fn session_of(
    state: &SharedState,
    participant_id: Uuid,
) -> Result<std::sync::Arc<tokio::sync::Mutex<RaceSession>>, ServiceError> {
    state
        .participant_session(participant_id)
        .and_then(|session_id| state.session(session_id))
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "participant `{participant_id}` has no live session"
            ))
        })
}

async fn apply_and_broadcast(
    state: &SharedState,
    participant_id: Uuid,
    report: PositionReport,
) -> Result<(), ServiceError> {
    let session_handle = session_of(state, participant_id)?;
    let mut session = session_handle.lock().await;

    let outcome = session.apply_report(
        participant_id,
        &report,
        now_ms(),
        state.config().session.timeout_window_ms(),
    )?;

    match outcome {
        ReportOutcome::Rejected(reason) => {
            debug!(
                participant_id = %participant_id,
                session_id = %session.session_id,
                ?reason,
                "telemetry report rejected"
            );
        }
        ReportOutcome::Stale { stored_distance } => {
            debug!(
                participant_id = %participant_id,
                stored_distance,
                reported = report.cumulative_distance,
                "stale report dropped"
            );
        }
        ReportOutcome::Applied(applied) => {
            if applied.first_finish {
                info!(
                    participant_id = %participant_id,
                    session_id = %session.session_id,
                    "first finisher; timeout window armed"
                );
            }
            let standings = broadcast::broadcast_ranked_update(state, &session);
            if applied.completed {
                close_session(state, &session, standings);
            }
        }
    }
    Ok(())
}

/// Publish final standings for completed sessions and reclaim the memory.
///
/// Cancelled sessions produced nothing worth ranking and are dropped without
/// a results POST.
fn close_session(state: &SharedState, session: &RaceSession, standings: Vec<ParticipantStanding>) {
    if session.status == SessionStatus::Completed {
        state.results().publish(FinalResultsPayload {
            session_id: session.session_id,
            distance: session.distance,
            status: session.status,
            closed_at_ms: now_ms(),
            results: standings,
        });
    }
    let members: Vec<Uuid> = session.participants.keys().copied().collect();
    state.remove_session(session.session_id, &members);
    info!(session_id = %session.session_id, status = ?session.status, "session closed");
}
