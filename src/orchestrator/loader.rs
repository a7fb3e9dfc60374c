//! Rebuilding aggregates from an event store.

use super::OrchestratorError;
use crate::domain::view::{SessionFilter, SessionSummary};
use crate::domain::ResearchAggregate;
use crate::event_store::{EventStore, StoredSnapshot};

/// Loads a session from its latest usable snapshot plus the tail of the log.
///
/// Falls back to a full replay when there is no snapshot, the snapshot claims
/// a version the log does not reach, or the tail does not apply on top of it.
/// Unknown IDs yield an empty aggregate at version 0.
pub async fn load_session(
    store: &dyn EventStore,
    session_id: &str,
) -> Result<ResearchAggregate, OrchestratorError> {
    if let Some(snapshot) = store.load_snapshot(session_id).await? {
        if let Some(aggregate) = from_snapshot(store, session_id, snapshot).await? {
            return Ok(aggregate);
        }
    }
    replay_full(store, session_id).await
}

/// Folds the whole event log, ignoring snapshots.
pub async fn replay_full(
    store: &dyn EventStore,
    session_id: &str,
) -> Result<ResearchAggregate, OrchestratorError> {
    let events = store.load_events(session_id).await?;
    ResearchAggregate::load_from_events(session_id, &events).map_err(|source| {
        OrchestratorError::Replay {
            session_id: session_id.to_string(),
            source,
        }
    })
}

async fn from_snapshot(
    store: &dyn EventStore,
    session_id: &str,
    snapshot: StoredSnapshot,
) -> Result<Option<ResearchAggregate>, OrchestratorError> {
    if snapshot.version == 0 {
        return Ok(None);
    }
    // The first event returned must carry the snapshot's own version.
    let events = store
        .load_events_from(session_id, snapshot.version - 1)
        .await?;
    let Some((first, tail)) = events.split_first() else {
        tracing::warn!(
            session_id = %session_id,
            snapshot_version = snapshot.version,
            "Snapshot is ahead of the event log; replaying full history"
        );
        return Ok(None);
    };
    if first.version != snapshot.version {
        tracing::warn!(
            session_id = %session_id,
            snapshot_version = snapshot.version,
            found = first.version,
            "Snapshot does not line up with the event log; replaying full history"
        );
        return Ok(None);
    }

    let mut aggregate =
        ResearchAggregate::from_snapshot(session_id, snapshot.version, snapshot.state);
    if let Err(e) = aggregate.replay(tail) {
        tracing::warn!(
            session_id = %session_id,
            error = %e,
            "Snapshot tail does not replay; replaying full history"
        );
        return Ok(None);
    }
    tracing::debug!(
        session_id = %session_id,
        snapshot_version = snapshot.version,
        tail = tail.len(),
        "Loaded session from snapshot"
    );
    Ok(Some(aggregate))
}

/// Summaries of the stored sessions matching `filter`, newest first.
///
/// Sessions that fail to load are logged and skipped.
pub async fn list_sessions(
    store: &dyn EventStore,
    filter: &SessionFilter,
) -> Result<Vec<SessionSummary>, OrchestratorError> {
    let ids = store.list_aggregate_ids().await?;
    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        match load_session(store, &id).await {
            Ok(aggregate) if aggregate.version() > 0 => {
                summaries.push(SessionSummary::from_aggregate(&aggregate));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Skipping unreadable session");
            }
        }
    }
    Ok(filter.apply(summaries))
}
