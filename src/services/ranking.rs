//! Deterministic live standings for a race session.
//!
//! Ordering rules, applied in sequence:
//! 1. finished runners before everyone else, earliest finish first;
//! 2. unfinished runners by distance covered, descending;
//! 3. at equal distance, the earlier last report wins (the other runner had
//!    strictly more time to cover the same ground);
//! 4. participant id as the final, stable tie-break.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::state::session::{ParticipantState, RaceSession, RunnerStatus};

/// One participant with its computed rank and progress figures.
#[derive(Debug, Clone)]
pub struct RankedParticipant {
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
    /// Smoothed pace in seconds per kilometre.
    pub pace_secs_per_km: Option<f64>,
    /// Server finish time, present for finished runners.
    pub finished_at_ms: Option<u64>,
}

/// Compute the full ranked standings of a session.
///
/// The ordering is a total order over the roster, so two calls against the
/// same telemetry always yield the same ranks.
pub fn rank_participants(session: &RaceSession) -> Vec<RankedParticipant> {
    let target = session.target_meters();
    let mut roster: Vec<&ParticipantState> = session.participants.values().collect();
    roster.sort_by(|a, b| compare(a, b));

    roster
        .into_iter()
        .enumerate()
        .map(|(index, participant)| {
            let remaining = (target - participant.cumulative_distance).max(0.0);
            let progress = if target > 0.0 {
                (participant.cumulative_distance / target * 100.0).min(100.0)
            } else {
                0.0
            };
            RankedParticipant {
                participant_id: participant.participant_id,
                rank: index as u32 + 1,
                status: participant.status,
                cumulative_distance: participant.cumulative_distance,
                remaining_distance: remaining,
                progress_percent: progress,
                pace_secs_per_km: participant.pace_secs_per_km,
                finished_at_ms: participant.finished_at_ms,
            }
        })
        .collect()
}

fn compare(a: &ParticipantState, b: &ParticipantState) -> Ordering {
    let a_finished = a.status == RunnerStatus::Finished;
    let b_finished = b.status == RunnerStatus::Finished;

    match (a_finished, b_finished) {
        (true, true) => a
            .finished_at_ms
            .cmp(&b.finished_at_ms)
            .then_with(|| a.participant_id.cmp(&b.participant_id)),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b
            .cumulative_distance
            .total_cmp(&a.cumulative_distance)
            .then_with(|| {
                // A runner that has not reported yet sorts behind one that has.
                let a_last = a.last_report_ms.unwrap_or(u64::MAX);
                let b_last = b.last_report_ms.unwrap_or(u64::MAX);
                a_last.cmp(&b_last)
            })
            .then_with(|| a.participant_id.cmp(&b.participant_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::queue_store::DistanceClass,
        state::session::{GeoPoint, PositionReport, RaceSession},
    };

    const WINDOW_MS: u64 = 300_000;

    fn report(distance: f64, ts: u64) -> PositionReport {
        PositionReport {
            position: GeoPoint {
                lat: 37.51,
                lng: 127.04,
            },
            cumulative_distance: distance,
            client_timestamp_ms: ts,
        }
    }

    fn ranks(session: &RaceSession) -> Vec<Uuid> {
        rank_participants(session)
            .into_iter()
            .map(|r| r.participant_id)
            .collect()
    }

    #[test]
    fn finished_runners_rank_above_unfinished_ones() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = RaceSession::new(Uuid::new_v4(), DistanceClass::Km3, &[a, b], 0.0);

        session
            .apply_report(b, &report(2_900.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        session
            .apply_report(a, &report(3_000.0, 2_000), 2_000, WINDOW_MS)
            .unwrap();

        assert_eq!(ranks(&session), vec![a, b]);
    }

    #[test]
    fn finishers_are_ordered_by_finish_time() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = RaceSession::new(Uuid::new_v4(), DistanceClass::Km3, &[a, b], 0.0);

        session
            .apply_report(b, &report(3_000.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        session
            .apply_report(a, &report(3_000.0, 2_000), 2_000, WINDOW_MS)
            .unwrap();

        // b finished first even though a reported the same distance.
        assert_eq!(ranks(&session), vec![b, a]);
    }

    #[test]
    fn equal_distance_favors_the_earlier_report() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = RaceSession::new(Uuid::new_v4(), DistanceClass::Km5, &[a, b], 0.0);

        session
            .apply_report(b, &report(1_500.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        session
            .apply_report(a, &report(1_500.0, 5_000), 5_000, WINDOW_MS)
            .unwrap();

        // Same distance, but b got there with an earlier report.
        assert_eq!(ranks(&session), vec![b, a]);
    }

    #[test]
    fn silent_runner_sorts_last() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = RaceSession::new(Uuid::new_v4(), DistanceClass::Km5, &[a, b], 0.0);

        session
            .apply_report(a, &report(0.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();

        // Both at zero metres; the one that reported ranks first.
        assert_eq!(ranks(&session), vec![a, b]);
    }

    #[test]
    fn progress_is_clamped_to_one_hundred() {
        let a = Uuid::new_v4();
        let mut session = RaceSession::new(Uuid::new_v4(), DistanceClass::Km3, &[a], 0.0);
        session
            .apply_report(a, &report(3_250.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();

        let standings = rank_participants(&session);
        assert_eq!(standings[0].progress_percent, 100.0);
        assert_eq!(standings[0].remaining_distance, 0.0);
        assert_eq!(standings[0].rank, 1);
    }

    #[test]
    fn ranking_is_stable_across_calls() {
        let members: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut session =
            RaceSession::new(Uuid::new_v4(), DistanceClass::Km10, &members, 0.0);
        for (i, id) in members.iter().enumerate() {
            session
                .apply_report(*id, &report(500.0 * i as f64, 1_000), 1_000, WINDOW_MS)
                .unwrap();
        }

        assert_eq!(ranks(&session), ranks(&session));
    }
}
