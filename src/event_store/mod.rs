//! Event stores for research sessions.
//!
//! An event store owns the durable, append-only event sequence of every
//! aggregate plus optional snapshots. Two implementations are provided: a
//! JSONL file store and an in-memory store for tests and ephemeral runs.

pub mod file_store;
pub mod memory_store;

pub use file_store::FileEventStore;
pub use memory_store::InMemoryEventStore;

use crate::domain::state::ResearchState;
use crate::domain::types::TimestampUtc;
use crate::domain::ResearchEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Aggregate state captured at `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub aggregate_id: String,
    pub version: u64,
    pub state: ResearchState,
    pub snapshot_at: TimestampUtc,
}

/// Errors raised by event store implementations.
#[derive(Debug)]
pub enum StoreError {
    /// The store's highest version differs from the caller's expectation.
    VersionConflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },
    /// Events supplied to `append_events` are not a valid continuation.
    InvalidAppend { aggregate_id: String, message: String },
    /// Snapshot does not describe the aggregate it is saved under.
    InvalidSnapshot { aggregate_id: String, message: String },
    /// Persisted data is unreadable or breaks the log invariants.
    Corrupted { aggregate_id: String, message: String },
    /// Aggregate ID cannot be used as a storage key.
    InvalidAggregateId { aggregate_id: String },
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// Serialization failure while writing.
    Serialization(serde_json::Error),
}

impl StoreError {
    pub(crate) fn corrupted(aggregate_id: &str, message: impl Into<String>) -> Self {
        Self::Corrupted {
            aggregate_id: aggregate_id.to_string(),
            message: message.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionConflict {
                aggregate_id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict for '{}': expected {}, store has {}",
                aggregate_id, expected, actual
            ),
            Self::InvalidAppend {
                aggregate_id,
                message,
            } => write!(f, "invalid append for '{}': {}", aggregate_id, message),
            Self::InvalidSnapshot {
                aggregate_id,
                message,
            } => write!(f, "invalid snapshot for '{}': {}", aggregate_id, message),
            Self::Corrupted {
                aggregate_id,
                message,
            } => write!(f, "event log for '{}' is corrupted: {}", aggregate_id, message),
            Self::InvalidAggregateId { aggregate_id } => {
                write!(f, "invalid aggregate id '{}'", aggregate_id)
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

/// Durable, append-only storage of research events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` atomically if the stored version equals `expected_version`.
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[ResearchEvent],
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Loads every event of the aggregate in version order. Unknown IDs yield an empty list.
    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<ResearchEvent>, StoreError>;

    /// Loads the events with version greater than `from_version`.
    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<ResearchEvent>, StoreError> {
        let events = self.load_events(aggregate_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.version > from_version)
            .collect())
    }

    async fn load_snapshot(&self, aggregate_id: &str)
        -> Result<Option<StoredSnapshot>, StoreError>;

    async fn save_snapshot(
        &self,
        aggregate_id: &str,
        snapshot: &StoredSnapshot,
    ) -> Result<(), StoreError>;

    /// IDs of every aggregate with at least one event.
    async fn list_aggregate_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Checks that `events` is a gapless run starting right after `after` for `aggregate_id`.
pub(crate) fn check_sequence(
    aggregate_id: &str,
    events: &[ResearchEvent],
    after: u64,
) -> Result<(), String> {
    let mut expected = after + 1;
    for event in events {
        if event.aggregate_id != aggregate_id {
            return Err(format!(
                "event {} belongs to aggregate '{}'",
                event.id, event.aggregate_id
            ));
        }
        if event.version != expected {
            return Err(format!(
                "expected version {}, found {}",
                expected, event.version
            ));
        }
        if !event.is_consistent() {
            return Err(format!(
                "event {} has type '{}' but payload '{}'",
                event.id,
                event.event_type,
                event.payload.event_type()
            ));
        }
        expected += 1;
    }
    Ok(())
}

/// Validates appended events against `expected_version`.
pub(crate) fn check_append(
    aggregate_id: &str,
    events: &[ResearchEvent],
    expected_version: u64,
) -> Result<(), StoreError> {
    let invalid = |message: String| StoreError::InvalidAppend {
        aggregate_id: aggregate_id.to_string(),
        message,
    };
    check_sequence(aggregate_id, events, expected_version).map_err(invalid)?;
    // serde_json writes NaN and infinity as null, which cannot be read back.
    if let Some(event) = events.iter().find(|e| !e.payload.is_finite()) {
        return Err(invalid(format!(
            "event {} (version {}) carries a non-finite number",
            event.id, event.version
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/contract_tests.rs"]
mod tests;
