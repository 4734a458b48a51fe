//! Periodic governor closing the timeout window of overdue sessions.

use tracing::info;

use crate::{
    services::race_service,
    state::{SharedState, now_ms},
};

/// Run the governor until the process exits.
pub async fn run(state: SharedState) {
    let mut ticker = tokio::time::interval(state.config().session.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(
        interval_ms = state.config().session.sweep_interval_ms,
        "timeout governor started"
    );
    loop {
        ticker.tick().await;
        sweep(&state, now_ms()).await;
    }
}

/// One pass over every live session.
pub async fn sweep(state: &SharedState, now_ms: u64) {
    for session_id in state.live_session_ids() {
        race_service::sweep_session(state, session_id, now_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::{
        config::AppConfig,
        dao::queue_store::DistanceClass,
        dto::ws::{PositionDto, TelemetryFrame},
        services::{race_service, session_factory},
        state::{AppState, session::RunnerStatus},
    };

    fn frame(distance: f64, ts: u64) -> TelemetryFrame {
        TelemetryFrame {
            cumulative_distance: distance,
            position: PositionDto {
                lat: 37.51,
                lng: 127.04,
            },
            client_timestamp_ms: ts,
        }
    }

    #[tokio::test]
    async fn due_sessions_are_closed_and_undue_ones_left_alone() {
        let state = AppState::new(AppConfig::default());
        let window_ms = state.config().session.timeout_window_ms();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session_id =
            session_factory::create_session(&state, DistanceClass::Km3, &[a, b], 0.0).unwrap();

        race_service::handle_report(&state, b, &frame(500.0, 1_000))
            .await
            .unwrap();
        // a finishing arms the deadline at roughly now + window.
        race_service::handle_report(&state, a, &frame(3_000.0, 2_000))
            .await
            .unwrap();

        // Well before the deadline nothing changes.
        sweep(&state, now_ms()).await;
        assert!(state.session(session_id).is_some());

        // Past the deadline the straggler is forced out, which completes and
        // frees the session.
        sweep(&state, now_ms() + window_ms + 1_000).await;
        assert!(state.session(session_id).is_none());
    }

    #[tokio::test]
    async fn unjoined_standby_session_is_abandoned_after_the_join_window() {
        let state = AppState::new(AppConfig::default());
        let join_window_ms = state.config().matching.ticket_ttl().as_millis() as u64;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session_id =
            session_factory::create_session(&state, DistanceClass::Km5, &[a, b], 0.0).unwrap();

        // Inside the join window the session waits for its runners.
        sweep(&state, now_ms()).await;
        assert!(state.session(session_id).is_some());

        // Past the window, with nobody connected, the session is dropped and
        // its roster is free to queue again.
        sweep(&state, now_ms() + join_window_ms + 1_000).await;
        assert!(state.session(session_id).is_none());
        assert!(!state.is_participating(a));
        assert!(!state.is_participating(b));
    }

    #[tokio::test]
    async fn sweep_without_a_first_finisher_is_a_no_op() {
        let state = AppState::new(AppConfig::default());
        let a = Uuid::new_v4();
        let session_id = session_factory::create_session(
            &state,
            DistanceClass::Km3,
            &[a, Uuid::new_v4()],
            0.0,
        )
        .unwrap();

        race_service::handle_report(&state, a, &frame(500.0, 1_000))
            .await
            .unwrap();

        sweep(&state, now_ms() + 3_600_000).await;
        let session = state.session(session_id).expect("session still live");
        let session = session.lock().await;
        assert_eq!(session.participants[&a].status, RunnerStatus::Running);
    }
}
