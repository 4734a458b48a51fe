//! Single-use, time-limited proof that a matched candidate may join a session.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// Proof of a match: admits one participant to one session, once.
///
/// Consumption is modelled by removing the ticket from the registry, so a
/// ticket object that still exists has not been used yet.
#[derive(Debug, Clone)]
pub struct MatchTicket {
    /// Ticket identifier presented during the join handshake.
    pub ticket_id: Uuid,
    /// Participant this ticket was issued to.
    pub participant_id: Uuid,
    /// Session this ticket admits into.
    pub session_id: Uuid,
    /// Moment after which the ticket no longer admits.
    pub expires_at: Instant,
}

impl MatchTicket {
    /// Issue a fresh ticket with the configured time-to-live.
    pub fn issue(participant_id: Uuid, session_id: Uuid, ttl: Duration) -> Self {
        Self {
            ticket_id: Uuid::new_v4(),
            participant_id,
            session_id,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Whether the ticket has outlived its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Seconds until expiry, clamped at zero.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        self.expires_at.saturating_duration_since(now).as_secs()
    }
}
