//! Error types for orchestrated research runs.

use crate::domain::errors::ResearchError;
use crate::event_store::StoreError;
use std::fmt::{Display, Formatter};

/// Errors that end a research run without a terminal event.
///
/// Collaborator failures are not here: they are recorded as events.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Persistence failed. Version conflicts land here too and are never retried.
    Store(StoreError),
    /// The stored history could not be folded into an aggregate.
    Replay {
        session_id: String,
        source: ResearchError,
    },
    /// The aggregate refused a command.
    Rejected {
        session_id: String,
        command: &'static str,
        source: ResearchError,
    },
    /// Work remains but nothing can be dispatched.
    Stalled { session_id: String, message: String },
    /// No events stored for the session.
    NotFound { session_id: String },
    /// `research` was called with the ID of an existing session.
    SessionExists { session_id: String },
}

impl OrchestratorError {
    /// Whether this is a validation rejection (non-fatal for per-node steps).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Whether the store refused an append because another writer got there first.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::VersionConflict { .. }))
    }
}

impl Display for OrchestratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "event store error: {}", e),
            Self::Replay { session_id, source } => {
                write!(f, "failed to replay session {}: {}", session_id, source)
            }
            Self::Rejected {
                session_id,
                command,
                source,
            } => write!(
                f,
                "{} rejected for session {}: {}",
                command, session_id, source
            ),
            Self::Stalled {
                session_id,
                message,
            } => write!(f, "session {} stalled: {}", session_id, message),
            Self::NotFound { session_id } => write!(f, "session not found: {}", session_id),
            Self::SessionExists { session_id } => {
                write!(f, "session already exists: {}", session_id)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Replay { source, .. } | Self::Rejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
