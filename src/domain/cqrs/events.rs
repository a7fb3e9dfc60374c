//! Research events for the CQRS aggregate.
//!
//! Events represent facts that have happened. They are the single source of truth
//! for research state and are persisted to the event log, one JSON object per line.

use crate::domain::dag::DagNode;
use crate::domain::state::ResearchState;
use crate::domain::types::{
    Citation, Contradiction, CostBreakdown, EventId, Fact, KnowledgeGap, Perspective,
    ResearchMode, ResearchSettings, Source, TimestampUtc, ValidatedFact,
};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

/// A persisted event: envelope plus type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub id: EventId,
    pub aggregate_id: String,
    /// 1-based, gapless per aggregate.
    pub version: u64,
    /// Discriminator such as `worker.completed`. Always agrees with `payload`.
    pub event_type: String,
    pub timestamp: TimestampUtc,
    pub payload: EventPayload,
}

impl ResearchEvent {
    /// Wraps `payload` in a fresh envelope.
    pub fn new(
        aggregate_id: impl Into<String>,
        version: u64,
        timestamp: TimestampUtc,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            version,
            event_type: payload.event_type().to_string(),
            timestamp,
            payload,
        }
    }

    /// Whether the stored discriminator matches the payload variant.
    pub fn is_consistent(&self) -> bool {
        self.event_type == self.payload.event_type()
    }
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Research session was started.
    ResearchStarted {
        query: String,
        #[serde(default)]
        mode: ResearchMode,
        #[serde(default)]
        settings: ResearchSettings,
    },

    /// Planner produced perspectives and the task DAG.
    PlanCreated {
        topic: String,
        perspectives: Vec<Perspective>,
        dag: Vec<DagNode>,
        #[serde(default)]
        cost: CostBreakdown,
    },

    /// A search worker was dispatched.
    WorkerStarted {
        worker_id: String,
        worker_num: u32,
        objective: String,
        #[serde(default)]
        perspective: Option<String>,
    },

    /// A search worker returned results.
    WorkerCompleted {
        worker_id: String,
        output: String,
        facts: Vec<Fact>,
        sources: Vec<Source>,
        #[serde(default)]
        cost: CostBreakdown,
    },

    /// A search worker failed.
    WorkerFailed { worker_id: String, error: String },

    /// Cross-validation started.
    AnalysisStarted { total_facts: usize },

    /// Cross-validation finished.
    AnalysisCompleted {
        validated_facts: Vec<ValidatedFact>,
        contradictions: Vec<Contradiction>,
        knowledge_gaps: Vec<KnowledgeGap>,
        #[serde(default)]
        cost: CostBreakdown,
    },

    /// Report synthesis started.
    SynthesisStarted,

    /// Final report was written.
    ReportGenerated {
        title: String,
        summary: String,
        full_content: String,
        citations: Vec<Citation>,
        #[serde(default)]
        cost: CostBreakdown,
    },

    /// Research finished successfully.
    ResearchCompleted {
        duration_ms: u64,
        /// Summary of accumulated spend. Not added to the running cost.
        total_cost: f64,
        source_count: usize,
    },

    /// Research failed in `failed_phase`.
    ResearchFailed { error: String, failed_phase: String },

    /// Research was cancelled.
    ResearchCancelled { reason: String },

    /// Full state at this event's version.
    SnapshotTaken { state: Box<ResearchState> },
}

impl EventPayload {
    /// Wire discriminator for the payload variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ResearchStarted { .. } => "research.started",
            Self::PlanCreated { .. } => "plan.created",
            Self::WorkerStarted { .. } => "worker.started",
            Self::WorkerCompleted { .. } => "worker.completed",
            Self::WorkerFailed { .. } => "worker.failed",
            Self::AnalysisStarted { .. } => "analysis.started",
            Self::AnalysisCompleted { .. } => "analysis.completed",
            Self::SynthesisStarted => "synthesis.started",
            Self::ReportGenerated { .. } => "report.generated",
            Self::ResearchCompleted { .. } => "research.completed",
            Self::ResearchFailed { .. } => "research.failed",
            Self::ResearchCancelled { .. } => "research.cancelled",
            Self::SnapshotTaken { .. } => "snapshot.taken",
        }
    }

    /// Whether every float in the payload is finite and so survives JSON.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::PlanCreated { cost, .. } | Self::ReportGenerated { cost, .. } => cost.is_finite(),
            Self::WorkerCompleted { facts, cost, .. } => {
                cost.is_finite() && facts.iter().all(|f| f.confidence.is_finite())
            }
            Self::AnalysisCompleted {
                validated_facts,
                knowledge_gaps,
                cost,
                ..
            } => {
                cost.is_finite()
                    && validated_facts.iter().all(|f| f.confidence.is_finite())
                    && knowledge_gaps.iter().all(|g| g.importance.is_finite())
            }
            Self::ResearchCompleted { total_cost, .. } => total_cost.is_finite(),
            Self::SnapshotTaken { state } => state.is_finite(),
            Self::ResearchStarted { .. }
            | Self::WorkerStarted { .. }
            | Self::WorkerFailed { .. }
            | Self::AnalysisStarted { .. }
            | Self::SynthesisStarted
            | Self::ResearchFailed { .. }
            | Self::ResearchCancelled { .. } => true,
        }
    }

    /// Worker the event refers to, if any.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::WorkerStarted { worker_id, .. }
            | Self::WorkerCompleted { worker_id, .. }
            | Self::WorkerFailed { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }
}

impl DomainEvent for ResearchEvent {
    fn event_type(&self) -> String {
        self.event_type.clone()
    }

    fn event_version(&self) -> String {
        "1".to_string()
    }
}
