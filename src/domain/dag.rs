//! Research task DAG (Directed Acyclic Graph).
//!
//! The plan produced during planning is a set of nodes with explicit
//! dependencies. Search nodes fan out in parallel; analyze and synthesize
//! nodes are completed by the corresponding phase events.

use crate::domain::errors::ResearchError;
use crate::domain::types::{NodeStatus, Perspective, TaskKind};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A single unit of research work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub kind: TaskKind,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Perspective name a search node researches from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DagNode {
    /// Creates a pending node with no dependencies.
    pub fn new(id: impl Into<String>, kind: TaskKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            dependencies: Vec::new(),
            perspective: None,
            status: NodeStatus::Pending,
            error: None,
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_perspective(mut self, name: impl Into<String>) -> Self {
        self.perspective = Some(name.into());
        self
    }
}

/// The validated DAG held by the aggregate, keyed by node ID.
///
/// A `BTreeMap` keeps iteration (and therefore readiness order and
/// serialization) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResearchDag {
    nodes: BTreeMap<String, DagNode>,
}

impl ResearchDag {
    /// Validates `nodes` and builds the DAG. Every node starts `pending`.
    pub fn from_nodes(nodes: &[DagNode]) -> Result<Self, ResearchError> {
        validate_plan(nodes)?;
        let nodes = nodes
            .iter()
            .map(|n| {
                let mut node = n.clone();
                node.status = NodeStatus::Pending;
                node.error = None;
                (node.id.clone(), node)
            })
            .collect();
        Ok(Self { nodes })
    }

    pub fn get(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut DagNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that are `pending` and whose dependencies are all `complete`.
    pub fn ready_nodes(&self) -> Vec<&DagNode> {
        self.nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| self.dependencies_complete(node))
            .collect()
    }

    /// Whether every dependency of `node` has completed successfully.
    pub fn dependencies_complete(&self, node: &DagNode) -> bool {
        node.dependencies.iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|d| d.status == NodeStatus::Complete)
        })
    }

    /// Pending nodes that can never become ready because a dependency failed.
    ///
    /// Returns `(node_id, failed_dependency_id)` pairs.
    pub fn blocked_nodes(&self) -> Vec<(String, String)> {
        self.nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter_map(|node| {
                node.dependencies
                    .iter()
                    .find(|dep| {
                        self.nodes
                            .get(dep.as_str())
                            .is_some_and(|d| d.status == NodeStatus::Failed)
                    })
                    .map(|dep| (node.id.clone(), dep.clone()))
            })
            .collect()
    }

    /// Whether every node of `kind` is `complete` or `failed`.
    pub fn all_terminal(&self, kind: TaskKind) -> bool {
        self.nodes
            .values()
            .filter(|n| n.kind == kind)
            .all(|n| n.status.is_terminal())
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }

    /// Fraction of nodes that completed successfully.
    pub fn progress(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.count_with_status(NodeStatus::Complete) as f64 / self.nodes.len() as f64
    }

    /// Marks every node of `kind` complete (phase nodes finish with their phase).
    pub(crate) fn complete_kind(&mut self, kind: TaskKind) {
        for node in self.nodes.values_mut().filter(|n| n.kind == kind) {
            node.status = NodeStatus::Complete;
        }
    }
}

/// Validates a proposed plan.
///
/// Rules: at least one node and one search node, unique IDs, every dependency
/// refers to a known node other than itself, the graph is acyclic, and search
/// nodes depend only on other search nodes (the search phase must be able to
/// finish before analysis starts).
pub fn validate_plan(nodes: &[DagNode]) -> Result<(), ResearchError> {
    if nodes.is_empty() {
        return Err(ResearchError::invalid("plan has no DAG nodes"));
    }
    if !nodes.iter().any(|n| n.kind == TaskKind::Search) {
        return Err(ResearchError::invalid("plan has no search nodes"));
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in nodes {
        if node.id.trim().is_empty() {
            return Err(ResearchError::invalid("DAG node with empty id"));
        }
        if index.contains_key(node.id.as_str()) {
            return Err(ResearchError::invalid(format!(
                "duplicate DAG node id '{}'",
                node.id
            )));
        }
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }

    let kinds: HashMap<&str, TaskKind> = nodes.iter().map(|n| (n.id.as_str(), n.kind)).collect();

    for node in nodes {
        let mut seen = HashSet::new();
        for dep in &node.dependencies {
            if dep == &node.id {
                return Err(ResearchError::invalid(format!(
                    "node '{}' depends on itself",
                    node.id
                )));
            }
            let Some(&from) = index.get(dep.as_str()) else {
                return Err(ResearchError::invalid(format!(
                    "node '{}' depends on unknown node '{}'",
                    node.id, dep
                )));
            };
            if node.kind == TaskKind::Search && kinds.get(dep.as_str()) != Some(&TaskKind::Search)
            {
                return Err(ResearchError::invalid(format!(
                    "search node '{}' depends on non-search node '{}'",
                    node.id, dep
                )));
            }
            if seen.insert(dep.as_str()) {
                graph.add_edge(from, index[node.id.as_str()], ());
            }
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(ResearchError::invalid("DAG contains a cycle"));
    }
    Ok(())
}

/// Builds the default multi-perspective plan.
///
/// One search node per perspective (`search_0`, `search_1`, ...), a
/// `cross_validate` analyze node depending on all of them, and a final
/// `synthesize` node.
pub fn storm_plan(topic: &str, perspectives: &[Perspective]) -> Vec<DagNode> {
    let mut nodes: Vec<DagNode> = perspectives
        .iter()
        .enumerate()
        .map(|(i, p)| {
            DagNode::new(
                format!("search_{}", i),
                TaskKind::Search,
                format!("Research '{}' from the {} perspective: {}", topic, p.name, p.focus),
            )
            .with_perspective(p.name.clone())
        })
        .collect();

    let mut analysis = DagNode::new(
        "cross_validate",
        TaskKind::Analyze,
        "Cross-validate findings and identify contradictions",
    );
    analysis.dependencies = nodes.iter().map(|n| n.id.clone()).collect();
    nodes.push(analysis);
    nodes.push(
        DagNode::new(
            "synthesize",
            TaskKind::Synthesize,
            "Generate final research report",
        )
        .depends_on("cross_validate"),
    );
    nodes
}

#[cfg(test)]
#[path = "tests/dag_tests.rs"]
mod tests;
