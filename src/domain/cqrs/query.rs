//! CQRS query handler for research event projection.
//!
//! The ResearchQuery applies persisted events to the SessionView projection
//! and broadcasts progress notifications to subscribers via tokio channels.

use super::{ResearchAggregate, ResearchEvent};
use crate::domain::view::{ProgressEvent, SessionView};
use async_trait::async_trait;
use cqrs_es::{EventEnvelope, Query};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// CQRS query handler that maintains the SessionView projection.
#[derive(Clone)]
pub struct ResearchQuery {
    /// In-memory projection of every session seen by this process.
    pub projection: Arc<RwLock<SessionView>>,
    /// Broadcast channel for progress streaming.
    pub progress_tx: broadcast::Sender<ProgressEvent>,
}

impl ResearchQuery {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            projection: Arc::new(RwLock::new(SessionView::default())),
            progress_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Projects events persisted outside the cqrs framework.
    pub async fn publish(&self, events: &[ResearchEvent]) {
        let Some(first) = events.first() else {
            return;
        };
        let envelopes: Vec<EventEnvelope<ResearchAggregate>> = events
            .iter()
            .map(|event| EventEnvelope {
                aggregate_id: event.aggregate_id.clone(),
                sequence: event.version as usize,
                payload: event.clone(),
                metadata: HashMap::new(),
            })
            .collect();
        self.dispatch(&first.aggregate_id, &envelopes).await;
    }
}

impl Default for ResearchQuery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Query<ResearchAggregate> for ResearchQuery {
    async fn dispatch(&self, _aggregate_id: &str, events: &[EventEnvelope<ResearchAggregate>]) {
        let mut view = self.projection.write().await;

        for envelope in events {
            let Some(progress) = view.apply_event(&envelope.payload) else {
                continue;
            };
            // No subscribers is normal; progress is best-effort.
            if self.progress_tx.receiver_count() > 0 {
                if let Err(e) = self.progress_tx.send(progress) {
                    tracing::warn!("Failed to broadcast progress: {:?}", e);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/query_tests.rs"]
mod tests;
