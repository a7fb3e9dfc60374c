//! In-memory event store.

use super::{check_append, EventStore, StoreError, StoredSnapshot};
use crate::domain::ResearchEvent;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Event store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<BTreeMap<String, Vec<ResearchEvent>>>,
    snapshots: RwLock<BTreeMap<String, StoredSnapshot>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[ResearchEvent],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        check_append(aggregate_id, events, expected_version)?;

        let mut all = self.events.write().await;
        let actual = all
            .get(aggregate_id)
            .and_then(|log| log.last())
            .map(|e| e.version)
            .unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual,
            });
        }
        if !events.is_empty() {
            all.entry(aggregate_id.to_string())
                .or_default()
                .extend_from_slice(events);
        }
        Ok(())
    }

    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<ResearchEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .get(aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_events_from(
        &self,
        aggregate_id: &str,
        from_version: u64,
    ) -> Result<Vec<ResearchEvent>, StoreError> {
        let all = self.events.read().await;
        Ok(all
            .get(aggregate_id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.version > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<StoredSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(aggregate_id).cloned())
    }

    async fn save_snapshot(
        &self,
        aggregate_id: &str,
        snapshot: &StoredSnapshot,
    ) -> Result<(), StoreError> {
        if snapshot.aggregate_id != aggregate_id {
            return Err(StoreError::InvalidSnapshot {
                aggregate_id: aggregate_id.to_string(),
                message: format!("snapshot belongs to '{}'", snapshot.aggregate_id),
            });
        }
        self.snapshots
            .write()
            .await
            .insert(aggregate_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn list_aggregate_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}
