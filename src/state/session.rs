//! Live race-session state machine and per-participant telemetry.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dao::queue_store::DistanceClass, state::now_ms};

/// Weight of the newest sample in the smoothed pace estimate.
const PACE_SMOOTHING: f64 = 0.3;

/// High-level session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, waiting for the first telemetry report.
    Standby,
    /// At least one runner is reporting.
    InProgress,
    /// Every participant reached a terminal status.
    Completed,
    /// Abandoned before producing a result.
    Cancelled,
}

impl SessionStatus {
    /// Whether the session can no longer accept reports.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// Per-participant status; transitions are monotone, a runner never returns
/// to `Running` once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    /// Still racing.
    Running,
    /// Crossed the target distance.
    Finished,
    /// Force-finished by the timeout window.
    TimedOut,
    /// Explicitly quit mid-session.
    GaveUp,
}

impl RunnerStatus {
    /// Whether this status can never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunnerStatus::Running)
    }
}

/// Events driving the session machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// First accepted telemetry report arrived.
    Start,
    /// Every participant is terminal.
    Complete,
    /// External cancellation before a result exists.
    Cancel,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the invalid event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from this status.
    pub event: SessionEvent,
}

/// Latest GPS fix reported by a runner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// One incoming telemetry report.
#[derive(Debug, Clone, Copy)]
pub struct PositionReport {
    /// Where the runner currently is.
    pub position: GeoPoint,
    /// Total distance covered since the session started, metres.
    pub cumulative_distance: f64,
    /// Client-side capture timestamp, epoch milliseconds.
    pub client_timestamp_ms: u64,
}

/// Live telemetry tracked for one participant.
#[derive(Debug, Clone)]
pub struct ParticipantState {
    /// Runner identifier.
    pub participant_id: Uuid,
    /// Metres covered so far; never decreases.
    pub cumulative_distance: f64,
    /// Latest applied GPS fix, if any report arrived.
    pub last_position: Option<GeoPoint>,
    /// Client timestamp of the latest applied report. Also the ranking
    /// tie-break for unfinished runners at identical distance.
    pub last_report_ms: Option<u64>,
    /// Smoothed pace in seconds per kilometre.
    pub pace_secs_per_km: Option<f64>,
    /// Current status.
    pub status: RunnerStatus,
    /// Server time the runner finished, epoch milliseconds.
    pub finished_at_ms: Option<u64>,
}

impl ParticipantState {
    fn new(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            cumulative_distance: 0.0,
            last_position: None,
            last_report_ms: None,
            pace_secs_per_km: None,
            status: RunnerStatus::Running,
            finished_at_ms: None,
        }
    }

    /// Fold a new distance/time delta into the smoothed pace estimate.
    fn update_pace(&mut self, report: &PositionReport) {
        let (Some(last_ms), prev_distance) = (self.last_report_ms, self.cumulative_distance) else {
            return;
        };
        let delta_secs = report.client_timestamp_ms.saturating_sub(last_ms) as f64 / 1_000.0;
        let delta_km = (report.cumulative_distance - prev_distance) / 1_000.0;
        if delta_secs <= 0.0 || delta_km <= 0.0 {
            return;
        }
        let sample = delta_secs / delta_km;
        self.pace_secs_per_km = Some(match self.pace_secs_per_km {
            Some(previous) => PACE_SMOOTHING * sample + (1.0 - PACE_SMOOTHING) * previous,
            None => sample,
        });
    }

    /// Move to a terminal status, returning whether anything changed.
    /// Terminal statuses are sticky so repeated calls are no-ops.
    fn terminate(&mut self, status: RunnerStatus, now_ms: u64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status == RunnerStatus::Finished {
            self.finished_at_ms = Some(now_ms);
        }
        true
    }
}

/// Why a telemetry report was rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The session already completed or was cancelled.
    SessionClosed,
    /// The reporting runner is not part of this session's roster.
    UnknownParticipant,
    /// The runner already reached a terminal status.
    ParticipantTerminal,
}

/// Effect of one accepted telemetry report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedReport {
    /// The report flipped the session from standby to in-progress.
    pub started: bool,
    /// The reporting runner crossed the target distance.
    pub finished: bool,
    /// The runner was the very first finisher of the session.
    pub first_finish: bool,
    /// The report completed the whole session.
    pub completed: bool,
}

/// Outcome of feeding a report into the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportOutcome {
    /// Report was dropped; the reason is logged, never surfaced to clients.
    Rejected(RejectReason),
    /// Out-of-order packet carrying less distance than already stored.
    Stale {
        /// Distance currently on record for the runner.
        stored_distance: f64,
    },
    /// Report was applied to the roster.
    Applied(AppliedReport),
}

/// Result of terminating one participant (give-up or timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationOutcome {
    /// Whether the participant actually changed status.
    pub changed: bool,
    /// Whether the termination completed the whole session.
    pub completed: bool,
}

/// Result of a due timeout sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSweep {
    /// Runners forced into `TimedOut`.
    pub timed_out: Vec<Uuid>,
    /// Whether the sweep completed the session.
    pub completed: bool,
}

/// One live race session: roster, telemetry, and lifecycle.
#[derive(Debug, Clone)]
pub struct RaceSession {
    /// Session identifier.
    pub session_id: Uuid,
    /// Distance class everyone in this session races.
    pub distance: DistanceClass,
    /// Roster in match order; mutated only through the methods below.
    pub participants: IndexMap<Uuid, ParticipantState>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation time, for operators and the public summary.
    pub created_at: OffsetDateTime,
    /// Creation time as epoch milliseconds; anchors the standby join window.
    pub created_at_ms: u64,
    /// Average time the members waited in the queue, seconds.
    pub avg_wait_secs: f64,
    /// Server time of the first finisher; set exactly once.
    pub first_finish_at_ms: Option<u64>,
    /// Deadline after which stragglers are forced out, epoch milliseconds.
    pub timeout_deadline_ms: Option<u64>,
}

impl RaceSession {
    /// Build a standby session with a zeroed roster.
    pub fn new(session_id: Uuid, distance: DistanceClass, members: &[Uuid], avg_wait_secs: f64) -> Self {
        let participants = members
            .iter()
            .map(|&id| (id, ParticipantState::new(id)))
            .collect();
        Self {
            session_id,
            distance,
            participants,
            status: SessionStatus::Standby,
            created_at: OffsetDateTime::now_utc(),
            created_at_ms: now_ms(),
            avg_wait_secs,
            first_finish_at_ms: None,
            timeout_deadline_ms: None,
        }
    }

    /// Race target in metres.
    pub fn target_meters(&self) -> f64 {
        self.distance.target_meters()
    }

    /// Apply a lifecycle event, returning the new status.
    pub fn apply_event(&mut self, event: SessionEvent) -> Result<SessionStatus, InvalidTransition> {
        let next = match (self.status, event) {
            (SessionStatus::Standby, SessionEvent::Start) => SessionStatus::InProgress,
            (SessionStatus::InProgress, SessionEvent::Complete) => SessionStatus::Completed,
            (SessionStatus::Standby | SessionStatus::InProgress, SessionEvent::Cancel) => {
                SessionStatus::Cancelled
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        self.status = next;
        Ok(next)
    }

    /// Feed one telemetry report into the session.
    ///
    /// `now_ms` is the server receive time; it stamps finishes and arms the
    /// timeout deadline (`now + timeout_window_ms`) for the first finisher.
    pub fn apply_report(
        &mut self,
        participant_id: Uuid,
        report: &PositionReport,
        now_ms: u64,
        timeout_window_ms: u64,
    ) -> Result<ReportOutcome, InvalidTransition> {
        if self.status.is_terminal() {
            return Ok(ReportOutcome::Rejected(RejectReason::SessionClosed));
        }
        let target = self.target_meters();
        let Some(participant) = self.participants.get_mut(&participant_id) else {
            return Ok(ReportOutcome::Rejected(RejectReason::UnknownParticipant));
        };
        if participant.status.is_terminal() {
            return Ok(ReportOutcome::Rejected(RejectReason::ParticipantTerminal));
        }
        if report.cumulative_distance < participant.cumulative_distance {
            // Network reordering, not a client error: drop, keep the record.
            return Ok(ReportOutcome::Stale {
                stored_distance: participant.cumulative_distance,
            });
        }

        participant.update_pace(report);
        participant.cumulative_distance = report.cumulative_distance;
        participant.last_position = Some(report.position);
        participant.last_report_ms = Some(report.client_timestamp_ms);

        let finished = report.cumulative_distance >= target;
        if finished {
            participant.terminate(RunnerStatus::Finished, now_ms);
        }

        let started = self.status == SessionStatus::Standby;
        if started {
            self.apply_event(SessionEvent::Start)?;
        }

        let first_finish = finished && self.first_finish_at_ms.is_none();
        if first_finish {
            self.first_finish_at_ms = Some(now_ms);
            self.timeout_deadline_ms = Some(now_ms + timeout_window_ms);
        }

        let completed = finished && self.check_completion()?;

        Ok(ReportOutcome::Applied(AppliedReport {
            started,
            finished,
            first_finish,
            completed,
        }))
    }

    /// Move one participant to a terminal status (give-up or timeout).
    pub fn terminate_participant(
        &mut self,
        participant_id: Uuid,
        status: RunnerStatus,
        now_ms: u64,
    ) -> Result<TerminationOutcome, InvalidTransition> {
        if self.status.is_terminal() {
            return Ok(TerminationOutcome {
                changed: false,
                completed: false,
            });
        }
        let Some(participant) = self.participants.get_mut(&participant_id) else {
            return Ok(TerminationOutcome {
                changed: false,
                completed: false,
            });
        };
        let changed = participant.terminate(status, now_ms);
        let completed = changed && self.check_completion()?;
        Ok(TerminationOutcome { changed, completed })
    }

    /// Force every still-running participant into `TimedOut` when the armed
    /// deadline is due. Idempotent: terminal sessions and unarmed or undue
    /// deadlines are a no-op.
    pub fn force_timeouts(&mut self, now_ms: u64) -> Result<Option<TimeoutSweep>, InvalidTransition> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        let Some(deadline) = self.timeout_deadline_ms else {
            return Ok(None);
        };
        if now_ms < deadline {
            return Ok(None);
        }

        let timed_out: Vec<Uuid> = self
            .participants
            .values_mut()
            .filter(|p| !p.status.is_terminal())
            .map(|p| {
                p.terminate(RunnerStatus::TimedOut, now_ms);
                p.participant_id
            })
            .collect();

        let completed = self.check_completion()?;
        Ok(Some(TimeoutSweep {
            timed_out,
            completed,
        }))
    }

    /// Whether the session never left standby within the join window.
    ///
    /// Once the window (the ticket TTL) has elapsed no new runner can join,
    /// so a session still in standby is dead weight and can be abandoned.
    pub fn standby_expired(&self, now_ms: u64, join_window_ms: u64) -> bool {
        self.status == SessionStatus::Standby
            && now_ms >= self.created_at_ms.saturating_add(join_window_ms)
    }

    /// Whether every participant is terminal.
    pub fn all_participants_terminal(&self) -> bool {
        self.participants.values().all(|p| p.status.is_terminal())
    }

    /// Complete (or cancel, when nobody ever reported) the session once the
    /// whole roster is terminal. Returns whether the session just closed.
    fn check_completion(&mut self) -> Result<bool, InvalidTransition> {
        if self.status.is_terminal() || !self.all_participants_terminal() {
            return Ok(false);
        }
        let event = match self.status {
            // Everyone quit before a single report: nothing worth ranking.
            SessionStatus::Standby => SessionEvent::Cancel,
            _ => SessionEvent::Complete,
        };
        self.apply_event(event)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn session_of(members: &[Uuid]) -> RaceSession {
        RaceSession::new(Uuid::new_v4(), DistanceClass::Km3, members, 12.0)
    }

    #[test]
    fn first_report_starts_the_session() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        assert_eq!(session.status, SessionStatus::Standby);

        let outcome = session
            .apply_report(a, &report(100.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        match outcome {
            ReportOutcome::Applied(applied) => assert!(applied.started),
            other => panic!("expected applied report, got {other:?}"),
        }
    }

    #[test]
    fn stale_report_never_decreases_distance() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        session
            .apply_report(a, &report(500.0, 2_000), 2_000, WINDOW_MS)
            .unwrap();

        let outcome = session
            .apply_report(a, &report(400.0, 3_000), 3_000, WINDOW_MS)
            .unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Stale {
                stored_distance: 500.0
            }
        );
        assert_eq!(session.participants[&a].cumulative_distance, 500.0);
    }

    #[test]
    fn first_finish_is_latched_exactly_once() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = session_of(&[a, b]);

        session
            .apply_report(a, &report(3_000.0, 10_000), 10_000, WINDOW_MS)
            .unwrap();
        assert_eq!(session.first_finish_at_ms, Some(10_000));
        assert_eq!(session.timeout_deadline_ms, Some(10_000 + WINDOW_MS));
        assert_eq!(session.participants[&a].status, RunnerStatus::Finished);

        session
            .apply_report(b, &report(3_100.0, 20_000), 20_000, WINDOW_MS)
            .unwrap();
        // Second finisher must not move the latch or the deadline.
        assert_eq!(session.first_finish_at_ms, Some(10_000));
        assert_eq!(session.timeout_deadline_ms, Some(10_000 + WINDOW_MS));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn terminal_participant_rejects_further_reports() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = session_of(&[a, b]);
        session
            .apply_report(a, &report(3_000.0, 5_000), 5_000, WINDOW_MS)
            .unwrap();

        let outcome = session
            .apply_report(a, &report(3_200.0, 6_000), 6_000, WINDOW_MS)
            .unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Rejected(RejectReason::ParticipantTerminal)
        );
    }

    #[test]
    fn give_up_is_terminal_and_completes_the_session() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = session_of(&[a, b]);
        session
            .apply_report(a, &report(3_000.0, 5_000), 5_000, WINDOW_MS)
            .unwrap();

        let outcome = session
            .terminate_participant(b, RunnerStatus::GaveUp, 6_000)
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.completed);
        assert_eq!(session.participants[&b].status, RunnerStatus::GaveUp);
        assert_eq!(session.status, SessionStatus::Completed);

        // Repeating the termination is a no-op.
        let again = session
            .terminate_participant(b, RunnerStatus::GaveUp, 7_000)
            .unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn timeout_sweep_forces_stragglers_out() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = session_of(&[a, b]);
        session
            .apply_report(b, &report(1_000.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        session
            .apply_report(a, &report(3_000.0, 5_000), 5_000, WINDOW_MS)
            .unwrap();

        // Not due yet.
        assert_eq!(session.force_timeouts(5_000 + WINDOW_MS - 1).unwrap(), None);

        let sweep = session
            .force_timeouts(5_000 + WINDOW_MS)
            .unwrap()
            .expect("deadline is due");
        assert_eq!(sweep.timed_out, vec![b]);
        assert!(sweep.completed);
        assert_eq!(session.participants[&b].status, RunnerStatus::TimedOut);
        assert_eq!(session.status, SessionStatus::Completed);

        // Sweeping a completed session is a no-op.
        assert_eq!(session.force_timeouts(10_000 + WINDOW_MS).unwrap(), None);
    }

    #[test]
    fn unstarted_session_with_everyone_gone_is_cancelled() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        let outcome = session
            .terminate_participant(a, RunnerStatus::GaveUp, 1_000)
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(session.status, SessionStatus::Cancelled);
    }

    #[test]
    fn closed_session_rejects_reports() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        session.apply_event(SessionEvent::Cancel).unwrap();

        let outcome = session
            .apply_report(a, &report(10.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Rejected(RejectReason::SessionClosed));
    }

    #[test]
    fn standby_expiry_tracks_the_join_window() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        let created = session.created_at_ms;

        assert!(!session.standby_expired(created + 59_000, 60_000));
        assert!(session.standby_expired(created + 60_000, 60_000));

        // A started session is no longer subject to the join window.
        session
            .apply_report(a, &report(100.0, 1_000), 1_000, WINDOW_MS)
            .unwrap();
        assert!(!session.standby_expired(created + 120_000, 60_000));
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut session = session_of(&[Uuid::new_v4()]);
        let err = session.apply_event(SessionEvent::Complete).unwrap_err();
        assert_eq!(err.from, SessionStatus::Standby);
        assert_eq!(err.event, SessionEvent::Complete);
    }

    #[test]
    fn pace_is_smoothed_over_report_deltas() {
        let a = Uuid::new_v4();
        let mut session = session_of(&[a]);
        session
            .apply_report(a, &report(0.0, 0), 0, WINDOW_MS)
            .unwrap();
        // 1 km in 300 s -> 300 s/km for the first sample.
        session
            .apply_report(a, &report(1_000.0, 300_000), 300_000, WINDOW_MS)
            .unwrap();
        let first = session.participants[&a].pace_secs_per_km.unwrap();
        assert!((first - 300.0).abs() < 1e-9);

        // Next km in 400 s: estimate moves toward 400 but stays smoothed.
        session
            .apply_report(a, &report(2_000.0, 700_000), 700_000, WINDOW_MS)
            .unwrap();
        let second = session.participants[&a].pace_secs_per_km.unwrap();
        assert!(second > 300.0 && second < 400.0);
    }
}
