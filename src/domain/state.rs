//! Research aggregate state and its projection from events.

use crate::domain::cqrs::events::{EventPayload, ResearchEvent};
use crate::domain::dag::{DagNode, ResearchDag};
use crate::domain::types::{
    Citation, Contradiction, CostBreakdown, Fact, KnowledgeGap, NodeStatus, Perspective,
    ResearchMode, ResearchSettings, ResearchStatus, Source, TaskKind, TimestampUtc,
    ValidatedFact,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Topic and perspectives chosen by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub topic: String,
    pub perspectives: Vec<Perspective>,
    pub created_at: TimestampUtc,
}

/// One search worker. Its ID is the ID of the search node it executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub id: String,
    /// 1-based position among the plan's search nodes.
    pub worker_num: u32,
    pub objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<String>,
    pub status: NodeStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<TimestampUtc>,
    #[serde(default)]
    pub completed_at: Option<TimestampUtc>,
    #[serde(default)]
    pub cost: CostBreakdown,
}

impl WorkerState {
    fn from_node(node: &DagNode, worker_num: u32) -> Self {
        Self {
            id: node.id.clone(),
            worker_num,
            objective: node.description.clone(),
            perspective: node.perspective.clone(),
            status: NodeStatus::Pending,
            output: String::new(),
            facts: Vec::new(),
            sources: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
            cost: CostBreakdown::default(),
        }
    }
}

/// Result of cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisState {
    pub total_facts: usize,
    pub validated_facts: Vec<ValidatedFact>,
    pub contradictions: Vec<Contradiction>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
    pub started_at: Option<TimestampUtc>,
    /// Set once `AnalysisCompleted` is applied.
    pub completed_at: Option<TimestampUtc>,
    pub cost: CostBreakdown,
}

impl AnalysisState {
    pub fn is_recorded(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    pub title: String,
    pub summary: String,
    pub full_content: String,
    pub citations: Vec<Citation>,
    pub generated_at: TimestampUtc,
    pub cost: CostBreakdown,
}

/// Summary recorded by `ResearchCompleted`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub duration_ms: u64,
    pub total_cost: f64,
    pub source_count: usize,
}

/// Everything the aggregate knows, rebuilt purely from its events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResearchState {
    pub status: ResearchStatus,
    pub query: String,
    pub mode: ResearchMode,
    pub settings: ResearchSettings,
    pub created_at: Option<TimestampUtc>,
    pub updated_at: Option<TimestampUtc>,
    pub plan: Option<PlanState>,
    pub dag: ResearchDag,
    pub workers: BTreeMap<String, WorkerState>,
    /// Present from `AnalysisStarted` on.
    pub analysis: Option<AnalysisState>,
    pub report: Option<ReportState>,
    pub cost: CostBreakdown,
    pub progress: f64,
    pub completion: Option<CompletionSummary>,
    pub error: Option<String>,
    pub failed_phase: Option<String>,
    pub cancel_reason: Option<String>,
}

impl ResearchState {
    /// Projects one event onto the state.
    ///
    /// Events are trusted: they were validated when decided. Unknown worker IDs
    /// are ignored rather than panicking so that a hand-edited log still loads.
    pub(crate) fn apply(&mut self, event: &ResearchEvent) {
        let at = event.timestamp;
        match &event.payload {
            EventPayload::ResearchStarted {
                query,
                mode,
                settings,
            } => {
                self.query = query.clone();
                self.mode = *mode;
                self.settings = *settings;
                self.status = ResearchStatus::Planning;
                self.created_at = Some(at);
            }
            EventPayload::PlanCreated {
                topic,
                perspectives,
                dag,
                cost,
            } => {
                self.plan = Some(PlanState {
                    topic: topic.clone(),
                    perspectives: perspectives.clone(),
                    created_at: at,
                });
                // The plan was validated when decided; a rejected graph leaves
                // the DAG empty rather than half-built.
                self.dag = ResearchDag::from_nodes(dag).unwrap_or_default();
                self.workers = dag
                    .iter()
                    .filter(|n| n.kind == TaskKind::Search)
                    .zip(1u32..)
                    .map(|(node, num)| (node.id.clone(), WorkerState::from_node(node, num)))
                    .collect();
                self.cost.add(cost);
                self.status = ResearchStatus::Searching;
            }
            EventPayload::WorkerStarted { worker_id, .. } => {
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.status = NodeStatus::Running;
                    worker.started_at = Some(at);
                }
                self.set_node_status(worker_id, NodeStatus::Running, None);
            }
            EventPayload::WorkerCompleted {
                worker_id,
                output,
                facts,
                sources,
                cost,
            } => {
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.status = NodeStatus::Complete;
                    worker.output = output.clone();
                    worker.facts = facts.clone();
                    worker.sources = sources.clone();
                    worker.cost = *cost;
                    worker.completed_at = Some(at);
                }
                self.set_node_status(worker_id, NodeStatus::Complete, None);
                self.cost.add(cost);
            }
            EventPayload::WorkerFailed { worker_id, error } => {
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.status = NodeStatus::Failed;
                    worker.error = Some(error.clone());
                    worker.completed_at = Some(at);
                }
                self.set_node_status(worker_id, NodeStatus::Failed, Some(error.clone()));
            }
            EventPayload::AnalysisStarted { total_facts } => {
                self.status = ResearchStatus::Analyzing;
                self.analysis = Some(AnalysisState {
                    total_facts: *total_facts,
                    started_at: Some(at),
                    ..AnalysisState::default()
                });
            }
            EventPayload::AnalysisCompleted {
                validated_facts,
                contradictions,
                knowledge_gaps,
                cost,
            } => {
                let analysis = self.analysis.get_or_insert_with(AnalysisState::default);
                analysis.validated_facts = validated_facts.clone();
                analysis.contradictions = contradictions.clone();
                analysis.knowledge_gaps = knowledge_gaps.clone();
                analysis.cost = *cost;
                analysis.completed_at = Some(at);
                self.dag.complete_kind(TaskKind::Analyze);
                self.cost.add(cost);
            }
            EventPayload::SynthesisStarted => {
                self.status = ResearchStatus::Synthesizing;
            }
            EventPayload::ReportGenerated {
                title,
                summary,
                full_content,
                citations,
                cost,
            } => {
                self.report = Some(ReportState {
                    title: title.clone(),
                    summary: summary.clone(),
                    full_content: full_content.clone(),
                    citations: citations.clone(),
                    generated_at: at,
                    cost: *cost,
                });
                self.dag.complete_kind(TaskKind::Synthesize);
                self.cost.add(cost);
            }
            EventPayload::ResearchCompleted {
                duration_ms,
                total_cost,
                source_count,
            } => {
                self.status = ResearchStatus::Complete;
                self.completion = Some(CompletionSummary {
                    duration_ms: *duration_ms,
                    total_cost: *total_cost,
                    source_count: *source_count,
                });
            }
            EventPayload::ResearchFailed {
                error,
                failed_phase,
            } => {
                self.status = ResearchStatus::Failed;
                self.error = Some(error.clone());
                self.failed_phase = Some(failed_phase.clone());
            }
            EventPayload::ResearchCancelled { reason } => {
                self.status = ResearchStatus::Cancelled;
                self.cancel_reason = Some(reason.clone());
            }
            EventPayload::SnapshotTaken { state } => {
                *self = (**state).clone();
            }
        }
        self.updated_at = Some(at);
        self.progress = self.dag.progress();
    }

    fn set_node_status(&mut self, id: &str, status: NodeStatus, error: Option<String>) {
        if let Some(node) = self.dag.get_mut(id) {
            node.status = status;
            node.error = error;
        }
    }

    /// Whether every float in the state is finite.
    pub fn is_finite(&self) -> bool {
        let workers = self.workers.values().all(|w| {
            w.cost.is_finite() && w.facts.iter().all(|f| f.confidence.is_finite())
        });
        let analysis = self.analysis.as_ref().is_none_or(|a| {
            a.cost.is_finite()
                && a.validated_facts.iter().all(|f| f.confidence.is_finite())
                && a.knowledge_gaps.iter().all(|g| g.importance.is_finite())
        });
        self.progress.is_finite()
            && self.cost.is_finite()
            && workers
            && analysis
            && self.report.as_ref().is_none_or(|r| r.cost.is_finite())
            && self
                .completion
                .is_none_or(|c| c.total_cost.is_finite())
    }

    /// Workers ordered by `worker_num`.
    pub fn workers_in_order(&self) -> Vec<&WorkerState> {
        let mut workers: Vec<&WorkerState> = self.workers.values().collect();
        workers.sort_by_key(|w| w.worker_num);
        workers
    }

    /// Facts from every completed worker, in worker order.
    pub fn all_facts(&self) -> Vec<Fact> {
        self.workers_in_order()
            .into_iter()
            .filter(|w| w.status == NodeStatus::Complete)
            .flat_map(|w| w.facts.iter().cloned())
            .collect()
    }

    pub fn total_facts(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == NodeStatus::Complete)
            .map(|w| w.facts.len())
            .sum()
    }

    /// Number of distinct source URLs across completed workers.
    pub fn source_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == NodeStatus::Complete)
            .flat_map(|w| w.sources.iter().map(|s| s.url.as_str()))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Search nodes that are pending with every dependency complete.
    pub fn ready_search_nodes(&self) -> Vec<&DagNode> {
        self.dag
            .ready_nodes()
            .into_iter()
            .filter(|n| n.kind == TaskKind::Search)
            .collect()
    }

    /// Search nodes left `running` (started but never finished).
    pub fn running_search_nodes(&self) -> Vec<&DagNode> {
        self.dag
            .nodes()
            .filter(|n| n.kind == TaskKind::Search && n.status == NodeStatus::Running)
            .collect()
    }

    /// Whether the search phase has nothing left to do.
    pub fn search_finished(&self) -> bool {
        self.dag.all_terminal(TaskKind::Search)
    }

    /// Queries for a follow-up session derived from the recorded knowledge gaps.
    ///
    /// Gaps are visited by descending importance. Each contributes its
    /// suggested queries, or its description when it suggests none. Duplicates
    /// are dropped, keeping the first occurrence.
    pub fn follow_up_queries(&self) -> Vec<String> {
        let Some(analysis) = &self.analysis else {
            return Vec::new();
        };
        let mut gaps: Vec<&KnowledgeGap> = analysis.knowledge_gaps.iter().collect();
        gaps.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        let mut seen = HashSet::new();
        let mut queries = Vec::new();
        for gap in gaps {
            let candidates: Vec<&String> = if gap.suggested_queries.is_empty() {
                vec![&gap.description]
            } else {
                gap.suggested_queries.iter().collect()
            };
            for query in candidates {
                let trimmed = query.trim();
                if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
                    queries.push(trimmed.to_string());
                }
            }
        }
        queries
    }
}
