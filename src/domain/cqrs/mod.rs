//! CQRS core types for event sourcing.
//!
//! This module contains the core CQRS types:
//! - **Commands**: Intent to change state
//! - **Events**: Facts that have happened
//! - **Aggregate**: Command validation and event application
//! - **Query**: Read-side projection and progress fan-out

pub mod commands;
pub mod events;
pub mod query;

pub use commands::ResearchCommand;
pub use events::{EventPayload, ResearchEvent};
pub use query::ResearchQuery;

use crate::domain::dag::ResearchDag;
use crate::domain::errors::ResearchError;
use crate::domain::services::ResearchServices;
use crate::domain::state::ResearchState;
use crate::domain::types::{NodeStatus, ResearchStatus};
use async_trait::async_trait;
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};

/// The research aggregate.
///
/// `version` always equals the version of the last applied event. Events
/// produced by [`ResearchAggregate::execute`] are buffered until the caller
/// persists them and calls [`ResearchAggregate::mark_committed`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResearchAggregate {
    id: String,
    version: u64,
    state: ResearchState,
    #[serde(skip)]
    uncommitted: Vec<ResearchEvent>,
}

impl ResearchAggregate {
    /// Creates an empty aggregate for `id` at version 0.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Restores an aggregate from a snapshot of its state at `version`.
    pub fn from_snapshot(id: impl Into<String>, version: u64, state: ResearchState) -> Self {
        Self {
            id: id.into(),
            version,
            state,
            uncommitted: Vec::new(),
        }
    }

    /// Rebuilds an aggregate by folding `events` in order.
    pub fn load_from_events(
        id: impl Into<String>,
        events: &[ResearchEvent],
    ) -> Result<Self, ResearchError> {
        let mut aggregate = Self::new(id);
        aggregate.replay(events)?;
        Ok(aggregate)
    }

    /// Applies already-persisted events on top of the current state.
    ///
    /// Each event must belong to this aggregate and carry the next version.
    pub fn replay(&mut self, events: &[ResearchEvent]) -> Result<(), ResearchError> {
        for event in events {
            if event.aggregate_id != self.id {
                return Err(ResearchError::ReplayMismatch {
                    message: format!(
                        "event {} belongs to aggregate '{}', expected '{}'",
                        event.id, event.aggregate_id, self.id
                    ),
                });
            }
            if event.version != self.version + 1 {
                return Err(ResearchError::ReplayMismatch {
                    message: format!(
                        "expected version {}, found {}",
                        self.version + 1,
                        event.version
                    ),
                });
            }
            self.apply(event.clone());
        }
        Ok(())
    }

    /// Validates `command`, applies the resulting event and buffers it for persistence.
    ///
    /// On error nothing is mutated.
    pub fn execute(
        &mut self,
        command: ResearchCommand,
        services: &ResearchServices,
    ) -> Result<ResearchEvent, ResearchError> {
        let event = self.decide(command, services)?;
        self.apply(event.clone());
        self.uncommitted.push(event.clone());
        Ok(event)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &ResearchState {
        &self.state
    }

    pub fn status(&self) -> ResearchStatus {
        self.state.status
    }

    /// Events executed but not yet persisted.
    pub fn uncommitted_events(&self) -> &[ResearchEvent] {
        &self.uncommitted
    }

    /// Drains the uncommitted buffer.
    pub fn take_uncommitted(&mut self) -> Vec<ResearchEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Clears the uncommitted buffer after a successful append.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// Version the store holds when no uncommitted events have been appended yet.
    pub fn committed_version(&self) -> u64 {
        self.version - self.uncommitted.len() as u64
    }

    fn decide(
        &self,
        command: ResearchCommand,
        services: &ResearchServices,
    ) -> Result<ResearchEvent, ResearchError> {
        if self.id.is_empty() {
            return Err(ResearchError::invalid("aggregate id is empty"));
        }
        let status = self.state.status;
        let name = command.name();

        let payload = match command {
            ResearchCommand::StartResearch {
                query,
                mode,
                settings,
            } => {
                if status != ResearchStatus::Pending || self.version != 0 {
                    return Err(ResearchError::transition(format!(
                        "research already started (status {})",
                        status
                    )));
                }
                if query.trim().is_empty() {
                    return Err(ResearchError::invalid("query must not be empty"));
                }
                EventPayload::ResearchStarted {
                    query,
                    mode,
                    settings,
                }
            }

            ResearchCommand::SetPlan {
                topic,
                perspectives,
                dag,
                cost,
            } => {
                if !matches!(status, ResearchStatus::Pending | ResearchStatus::Planning) {
                    return Err(self.wrong_status(name));
                }
                ResearchDag::from_nodes(&dag)?;
                EventPayload::PlanCreated {
                    topic,
                    perspectives,
                    dag,
                    cost,
                }
            }

            ResearchCommand::StartWorker { worker_id } => {
                self.require(status == ResearchStatus::Searching, name)?;
                let worker = self.state.workers.get(&worker_id).ok_or_else(|| {
                    ResearchError::UnknownWorker {
                        worker_id: worker_id.clone(),
                    }
                })?;
                if worker.status != NodeStatus::Pending {
                    return Err(ResearchError::transition(format!(
                        "worker '{}' is {}, expected pending",
                        worker_id, worker.status
                    )));
                }
                let ready = self
                    .state
                    .dag
                    .get(&worker_id)
                    .is_some_and(|node| self.state.dag.dependencies_complete(node));
                if !ready {
                    return Err(ResearchError::transition(format!(
                        "worker '{}' has incomplete dependencies",
                        worker_id
                    )));
                }
                EventPayload::WorkerStarted {
                    worker_num: worker.worker_num,
                    objective: worker.objective.clone(),
                    perspective: worker.perspective.clone(),
                    worker_id,
                }
            }

            ResearchCommand::CompleteWorker {
                worker_id,
                output,
                facts,
                sources,
                cost,
            } => {
                self.require(status == ResearchStatus::Searching, name)?;
                self.require_worker(&worker_id, &[NodeStatus::Running])?;
                EventPayload::WorkerCompleted {
                    worker_id,
                    output,
                    facts,
                    sources,
                    cost,
                }
            }

            ResearchCommand::FailWorker { worker_id, error } => {
                self.require(status == ResearchStatus::Searching, name)?;
                self.require_worker(&worker_id, &[NodeStatus::Pending, NodeStatus::Running])?;
                EventPayload::WorkerFailed { worker_id, error }
            }

            ResearchCommand::StartAnalysis { total_facts } => {
                self.require(status == ResearchStatus::Searching, name)?;
                if !self.state.search_finished() {
                    return Err(ResearchError::transition(
                        "search nodes are still pending or running",
                    ));
                }
                EventPayload::AnalysisStarted { total_facts }
            }

            ResearchCommand::CompleteAnalysis {
                validated_facts,
                contradictions,
                knowledge_gaps,
                cost,
            } => {
                self.require(status == ResearchStatus::Analyzing, name)?;
                if self.analysis_recorded() {
                    return Err(ResearchError::transition("analysis already recorded"));
                }
                EventPayload::AnalysisCompleted {
                    validated_facts,
                    contradictions,
                    knowledge_gaps,
                    cost,
                }
            }

            ResearchCommand::StartSynthesis => {
                self.require(status == ResearchStatus::Analyzing, name)?;
                if !self.analysis_recorded() {
                    return Err(ResearchError::transition("analysis not recorded yet"));
                }
                EventPayload::SynthesisStarted
            }

            ResearchCommand::GenerateReport {
                title,
                summary,
                full_content,
                citations,
                cost,
            } => {
                self.require(status == ResearchStatus::Synthesizing, name)?;
                if self.state.report.is_some() {
                    return Err(ResearchError::transition("report already generated"));
                }
                EventPayload::ReportGenerated {
                    title,
                    summary,
                    full_content,
                    citations,
                    cost,
                }
            }

            ResearchCommand::CompleteResearch { duration_ms } => {
                self.require_active(name)?;
                let now = services.clock.now();
                let duration_ms = duration_ms.unwrap_or_else(|| {
                    self.state
                        .created_at
                        .map(|started| now.millis_since(&started))
                        .unwrap_or(0)
                });
                EventPayload::ResearchCompleted {
                    duration_ms,
                    total_cost: self.state.cost.total_cost_usd,
                    source_count: self.state.source_count(),
                }
            }

            ResearchCommand::FailResearch {
                error,
                failed_phase,
            } => {
                self.require_active(name)?;
                EventPayload::ResearchFailed {
                    error,
                    failed_phase: failed_phase.unwrap_or_else(|| status.to_string()),
                }
            }

            ResearchCommand::CancelResearch { reason } => {
                self.require_active(name)?;
                EventPayload::ResearchCancelled { reason }
            }

            ResearchCommand::TakeSnapshot => {
                if self.version == 0 {
                    return Err(ResearchError::transition(
                        "cannot snapshot an uninitialized aggregate",
                    ));
                }
                EventPayload::SnapshotTaken {
                    state: Box::new(self.state.clone()),
                }
            }
        };

        Ok(ResearchEvent {
            id: services.next_event_id(),
            aggregate_id: self.id.clone(),
            version: self.version + 1,
            event_type: payload.event_type().to_string(),
            timestamp: services.clock.now(),
            payload,
        })
    }

    fn analysis_recorded(&self) -> bool {
        self.state
            .analysis
            .as_ref()
            .is_some_and(|a| a.is_recorded())
    }

    fn wrong_status(&self, command: &str) -> ResearchError {
        ResearchError::transition(format!(
            "{} not valid in status {}",
            command, self.state.status
        ))
    }

    fn require(&self, ok: bool, command: &str) -> Result<(), ResearchError> {
        if ok {
            Ok(())
        } else {
            Err(self.wrong_status(command))
        }
    }

    fn require_active(&self, command: &str) -> Result<(), ResearchError> {
        self.require(!self.state.status.is_terminal(), command)
    }

    fn require_worker(&self, worker_id: &str, allowed: &[NodeStatus]) -> Result<(), ResearchError> {
        let worker = self
            .state
            .workers
            .get(worker_id)
            .ok_or_else(|| ResearchError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })?;
        if allowed.contains(&worker.status) {
            Ok(())
        } else {
            Err(ResearchError::transition(format!(
                "worker '{}' is {}",
                worker_id, worker.status
            )))
        }
    }
}

#[async_trait]
impl Aggregate for ResearchAggregate {
    type Command = ResearchCommand;
    type Event = ResearchEvent;
    type Error = ResearchError;
    type Services = ResearchServices;

    fn aggregate_type() -> String {
        "research".to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        self.decide(command, services).map(|event| vec![event])
    }

    fn apply(&mut self, event: Self::Event) {
        if self.id.is_empty() {
            self.id = event.aggregate_id.clone();
        }
        self.state.apply(&event);
        self.version = event.version;
    }
}

#[cfg(test)]
#[path = "../tests/aggregate_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "../tests/replay_tests.rs"]
mod replay_tests;
