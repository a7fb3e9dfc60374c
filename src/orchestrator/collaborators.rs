//! Interfaces of the external research collaborators.
//!
//! The orchestrator never talks to a model or the web directly. Planning,
//! searching, analysis and synthesis are injected behind these traits.

use crate::domain::dag::DagNode;
use crate::domain::state::{AnalysisState, PlanState, WorkerState};
use crate::domain::types::{
    Citation, Contradiction, CostBreakdown, Fact, KnowledgeGap, Perspective, Source,
    ValidatedFact,
};
use async_trait::async_trait;
use std::fmt::{Display, Formatter};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The call failed; the message is recorded in the event log.
    Failed(String),
    /// The call was abandoned because the run was cancelled.
    Cancelled,
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl Display for CollaboratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(message) => f.write_str(message),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Plan produced for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub topic: String,
    pub perspectives: Vec<Perspective>,
    pub dag: Vec<DagNode>,
    pub cost: CostBreakdown,
}

impl PlanOutcome {
    pub fn is_finite(&self) -> bool {
        self.cost.is_finite()
    }
}

/// Findings of one search worker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchOutcome {
    pub facts: Vec<Fact>,
    pub sources: Vec<Source>,
    pub cost: CostBreakdown,
}

impl SearchOutcome {
    /// Short description stored on the worker record.
    pub fn summary(&self) -> String {
        format!(
            "Found {} facts from {} sources",
            self.facts.len(),
            self.sources.len()
        )
    }

    /// NaN or infinite numbers cannot be written to the event log.
    pub fn is_finite(&self) -> bool {
        self.cost.is_finite() && self.facts.iter().all(|f| f.confidence.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisOutcome {
    pub validated_facts: Vec<ValidatedFact>,
    pub contradictions: Vec<Contradiction>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub cost: CostBreakdown,
}

impl AnalysisOutcome {
    pub fn is_finite(&self) -> bool {
        self.cost.is_finite()
            && self.validated_facts.iter().all(|f| f.confidence.is_finite())
            && self.knowledge_gaps.iter().all(|g| g.importance.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportOutcome {
    pub title: String,
    pub summary: String,
    pub full_content: String,
    pub citations: Vec<Citation>,
    pub cost: CostBreakdown,
}

impl ReportOutcome {
    pub fn is_finite(&self) -> bool {
        self.cost.is_finite()
    }
}

/// Everything the synthesizer gets to write the report.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub query: String,
    pub plan: Option<PlanState>,
    /// Search workers in `worker_num` order, failed ones included.
    pub search_results: Vec<WorkerState>,
    pub analysis: AnalysisState,
}

/// Turns a query into perspectives and a task DAG.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, topic: &str) -> Result<PlanOutcome, CollaboratorError>;
}

/// Executes one search node.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        objective: &str,
        perspective: Option<&Perspective>,
    ) -> Result<SearchOutcome, CollaboratorError>;
}

/// Cross-validates the collected facts.
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, query: &str, facts: &[Fact])
        -> Result<AnalysisOutcome, CollaboratorError>;
}

/// Writes the final report.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest)
        -> Result<ReportOutcome, CollaboratorError>;
}
