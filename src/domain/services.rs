//! External services for the research aggregate.
//!
//! Services provide external dependencies (time, identifiers) to the aggregate
//! without coupling command handling to the system clock.

use crate::domain::types::{EventId, TimestampUtc};

/// Services injected into the research aggregate for command handling.
#[derive(Debug, Clone, Default)]
pub struct ResearchServices {
    pub clock: ResearchClock,
}

/// Clock service for timestamp generation.
#[derive(Debug, Clone, Default)]
pub enum ResearchClock {
    /// Wall clock.
    #[default]
    System,
    /// Always returns the same instant. Used to compare replays byte-for-byte.
    Fixed(TimestampUtc),
}

impl ResearchClock {
    /// Returns the current UTC timestamp.
    pub fn now(&self) -> TimestampUtc {
        match self {
            Self::System => TimestampUtc::now(),
            Self::Fixed(ts) => *ts,
        }
    }
}

impl ResearchServices {
    /// Services whose clock is frozen at `ts`.
    pub fn fixed(ts: TimestampUtc) -> Self {
        Self {
            clock: ResearchClock::Fixed(ts),
        }
    }

    pub fn next_event_id(&self) -> EventId {
        EventId::new()
    }
}
