//! Fanout of ranked updates to the runners of one session.

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        session::ParticipantStanding,
        ws::{RankedUpdateFrame, RunnerOutboundMessage},
    },
    services::ranking,
    state::{SharedState, now_ms, session::RaceSession},
};

/// Serialize a payload and push it onto a socket's writer channel.
///
/// Serialization failure is a bug, not a connection problem; it is logged and
/// treated as sent. A closed writer is reported so the caller can drop the
/// registration.
pub fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> bool
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound message `{value:?}`");
            return true;
        }
    };
    tx.send(Message::Text(payload.into())).is_ok()
}

/// Compute the standings of a session and push them to every connected runner.
///
/// Returns the standings so lifecycle handlers can reuse them for the final
/// results payload without ranking twice.
pub fn broadcast_ranked_update(
    state: &SharedState,
    session: &RaceSession,
) -> Vec<ParticipantStanding> {
    let standings: Vec<ParticipantStanding> = ranking::rank_participants(session)
        .into_iter()
        .map(ParticipantStanding::from)
        .collect();

    let message = RunnerOutboundMessage::RankedUpdate(RankedUpdateFrame {
        session_id: session.session_id,
        status: session.status,
        timestamp_ms: now_ms(),
        participants: standings.clone(),
    });

    let recipients: Vec<(Uuid, mpsc::UnboundedSender<Message>)> = state
        .runners()
        .iter()
        .filter(|entry| entry.session_id == session.session_id)
        .map(|entry| (entry.participant_id, entry.tx.clone()))
        .collect();

    for (participant_id, tx) in recipients {
        if !send_message_to_websocket(&tx, &message) {
            warn!(
                participant_id = %participant_id,
                session_id = %session.session_id,
                "ranked update hit a closed writer; dropping runner registration"
            );
            state.runners().remove(&participant_id);
        }
    }

    standings
}
