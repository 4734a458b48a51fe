//! Wire types for the HTTP and WebSocket surfaces.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod queue;
pub mod session;
pub mod validation;
pub mod ws;

/// RFC3339 rendering for human-facing timestamps.
pub(crate) fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
