//! Error types for the research domain.

use std::fmt::{Display, Formatter};

/// Errors that can occur during research command handling or replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchError {
    /// Command precondition violated for the current state.
    InvalidTransition { message: String },
    /// Command payload is malformed (empty query, cyclic plan, ...).
    InvalidCommand { message: String },
    /// Referenced worker does not exist.
    UnknownWorker { worker_id: String },
    /// Event does not belong to this aggregate or breaks version ordering.
    ReplayMismatch { message: String },
}

impl ResearchError {
    pub(crate) fn transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }
}

impl Display for ResearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { message } => write!(f, "invalid transition: {}", message),
            Self::InvalidCommand { message } => write!(f, "invalid command: {}", message),
            Self::UnknownWorker { worker_id } => write!(f, "worker not found: {}", worker_id),
            Self::ReplayMismatch { message } => write!(f, "replay mismatch: {}", message),
        }
    }
}

impl std::error::Error for ResearchError {}
