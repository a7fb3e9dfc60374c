//! Research commands for the CQRS aggregate.
//!
//! Commands represent intent to change state. The aggregate validates commands
//! and produces events that are persisted to the event log.

use crate::domain::dag::DagNode;
use crate::domain::types::{
    Citation, Contradiction, CostBreakdown, Fact, KnowledgeGap, Perspective, ResearchMode,
    ResearchSettings, Source, ValidatedFact,
};
use serde::{Deserialize, Serialize};

/// Commands that can be executed against the research aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchCommand {
    /// Initialize the session with its query.
    StartResearch {
        query: String,
        mode: ResearchMode,
        settings: ResearchSettings,
    },

    /// Record the plan and its DAG.
    SetPlan {
        topic: String,
        perspectives: Vec<Perspective>,
        dag: Vec<DagNode>,
        cost: CostBreakdown,
    },

    /// Mark a search worker as running.
    StartWorker { worker_id: String },

    /// Record a worker's results.
    CompleteWorker {
        worker_id: String,
        output: String,
        facts: Vec<Fact>,
        sources: Vec<Source>,
        cost: CostBreakdown,
    },

    /// Record a worker failure.
    FailWorker { worker_id: String, error: String },

    /// Begin cross-validation once every search node is terminal.
    StartAnalysis { total_facts: usize },

    /// Record the analysis result.
    CompleteAnalysis {
        validated_facts: Vec<ValidatedFact>,
        contradictions: Vec<Contradiction>,
        knowledge_gaps: Vec<KnowledgeGap>,
        cost: CostBreakdown,
    },

    /// Begin report synthesis.
    StartSynthesis,

    /// Record the final report.
    GenerateReport {
        title: String,
        summary: String,
        full_content: String,
        citations: Vec<Citation>,
        cost: CostBreakdown,
    },

    /// Finish successfully. Duration defaults to the time since the session started.
    CompleteResearch { duration_ms: Option<u64> },

    /// Finish with an error. Phase defaults to the current status.
    FailResearch {
        error: String,
        failed_phase: Option<String>,
    },

    /// Stop the session.
    CancelResearch { reason: String },

    /// Record the full current state as an event.
    TakeSnapshot,
}

impl ResearchCommand {
    /// Human-readable name for error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartResearch { .. } => "StartResearch",
            Self::SetPlan { .. } => "SetPlan",
            Self::StartWorker { .. } => "StartWorker",
            Self::CompleteWorker { .. } => "CompleteWorker",
            Self::FailWorker { .. } => "FailWorker",
            Self::StartAnalysis { .. } => "StartAnalysis",
            Self::CompleteAnalysis { .. } => "CompleteAnalysis",
            Self::StartSynthesis => "StartSynthesis",
            Self::GenerateReport { .. } => "GenerateReport",
            Self::CompleteResearch { .. } => "CompleteResearch",
            Self::FailResearch { .. } => "FailResearch",
            Self::CancelResearch { .. } => "CancelResearch",
            Self::TakeSnapshot => "TakeSnapshot",
        }
    }
}
