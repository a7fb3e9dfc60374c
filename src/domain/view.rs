//! Session views for listing and progress reporting.
//!
//! Views are derived from `ResearchEvent` only (no direct mutation) and contain
//! only the data required for session listing and progress display.

use crate::domain::cqrs::{ResearchAggregate, ResearchEvent};
use crate::domain::state::ResearchState;
use crate::domain::types::{CostBreakdown, ResearchStatus, TimestampUtc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    pub status: ResearchStatus,
    pub progress: f64,
    pub cost: CostBreakdown,
    pub created_at: Option<TimestampUtc>,
    pub updated_at: Option<TimestampUtc>,
    pub worker_count: usize,
    pub version: u64,
}

impl SessionSummary {
    pub fn from_state(id: &str, version: u64, state: &ResearchState) -> Self {
        Self {
            id: id.to_string(),
            query: state.query.clone(),
            status: state.status,
            progress: state.progress,
            cost: state.cost,
            created_at: state.created_at,
            updated_at: state.updated_at,
            worker_count: state.workers.len(),
            version,
        }
    }

    pub fn from_aggregate(aggregate: &ResearchAggregate) -> Self {
        Self::from_state(aggregate.id(), aggregate.version(), aggregate.state())
    }
}

/// Criteria for `list_sessions_filtered`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<ResearchStatus>,
    /// Case-insensitive substring of the query.
    pub query_contains: Option<String>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn matches(&self, summary: &SessionSummary) -> bool {
        if self.status.is_some_and(|s| s != summary.status) {
            return false;
        }
        match &self.query_contains {
            Some(needle) => summary
                .query
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }

    /// Filters, sorts newest first by `updated_at`, then truncates to `limit`.
    pub fn apply(&self, summaries: Vec<SessionSummary>) -> Vec<SessionSummary> {
        let mut kept: Vec<SessionSummary> =
            summaries.into_iter().filter(|s| self.matches(s)).collect();
        kept.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            kept.truncate(limit);
        }
        kept
    }
}

/// Best-effort notification published after each persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub version: u64,
    pub event_type: String,
    pub status: ResearchStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub timestamp: TimestampUtc,
}

/// One session in the projection.
#[derive(Debug, Clone)]
struct ProjectedSession {
    summary: SessionSummary,
    /// Full state while the session can still change; dropped once terminal.
    state: Option<ResearchState>,
}

impl ProjectedSession {
    fn new(id: &str, version: u64, state: ResearchState) -> Self {
        let summary = SessionSummary::from_state(id, version, &state);
        let state = (!state.status.is_terminal()).then_some(state);
        Self { summary, state }
    }
}

/// Live projection of every session seen on this process.
///
/// Finished sessions keep only their summary.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    sessions: BTreeMap<String, ProjectedSession>,
}

impl SessionView {
    /// Applies an event and returns the resulting progress notification.
    ///
    /// Events at or below the projected version are ignored, so a replayed
    /// dispatch cannot double-count.
    pub fn apply_event(&mut self, event: &ResearchEvent) -> Option<ProgressEvent> {
        let id = &event.aggregate_id;
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| ProjectedSession::new(id, 0, ResearchState::default()));
        if event.version <= session.summary.version {
            tracing::debug!(
                session_id = %id,
                version = event.version,
                "Skipping already projected event"
            );
            return None;
        }
        match session.state.take() {
            Some(mut state) => {
                state.apply(event);
                *session = ProjectedSession::new(id, event.version, state);
            }
            None => {
                // Terminal sessions only see bookkeeping events such as snapshots.
                session.summary.version = event.version;
                session.summary.updated_at = Some(event.timestamp);
            }
        }
        let summary = &session.summary;
        Some(ProgressEvent {
            session_id: id.clone(),
            version: event.version,
            event_type: event.event_type.clone(),
            status: summary.status,
            progress: summary.progress,
            worker_id: event.payload.worker_id().map(str::to_string),
            timestamp: event.timestamp,
        })
    }

    /// Seeds the projection from a loaded aggregate (used on resume).
    pub fn seed(&mut self, aggregate: &ResearchAggregate) {
        self.sessions.insert(
            aggregate.id().to_string(),
            ProjectedSession::new(aggregate.id(), aggregate.version(), aggregate.state().clone()),
        );
    }

    pub fn summary(&self, id: &str) -> Option<SessionSummary> {
        self.sessions.get(id).map(|s| s.summary.clone())
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.values().map(|s| s.summary.clone()).collect()
    }

    /// Whether the full state of `id` is still held.
    pub fn is_tracking_state(&self, id: &str) -> bool {
        self.sessions.get(id).is_some_and(|s| s.state.is_some())
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
