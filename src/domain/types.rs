//! Strongly typed domain primitives for the research aggregate.
//!
//! These types are carried inside event payloads, so every one of them is
//! plain data: serializable, comparable, and free of process-local handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a single persisted event (used for dedup on replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates a fresh research session ID (the aggregate ID in the event store).
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// UTC timestamp wrapper used throughout the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Milliseconds elapsed from `earlier` to `self`, clamped at zero.
    pub fn millis_since(&self, earlier: &TimestampUtc) -> u64 {
        let millis = (self.0 - earlier.0).num_milliseconds();
        u64::try_from(millis).unwrap_or(0)
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

/// Lifecycle status of a research workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Pending,
    Planning,
    Searching,
    Analyzing,
    Synthesizing,
    Complete,
    Failed,
    Cancelled,
}

impl ResearchStatus {
    /// Terminal statuses accept no further lifecycle commands.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Searching => "searching",
            Self::Analyzing => "analyzing",
            Self::Synthesizing => "synthesizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResearchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "planning" => Ok(Self::Planning),
            "searching" => Ok(Self::Searching),
            "analyzing" => Ok(Self::Analyzing),
            "synthesizing" => Ok(Self::Synthesizing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown research status '{}'", other)),
        }
    }
}

/// Execution status of a DAG node (and of the worker mirroring it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Kind of work a DAG node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Search,
    Analyze,
    Synthesize,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Search => "search",
            Self::Analyze => "analyze",
            Self::Synthesize => "synthesize",
        };
        f.write_str(s)
    }
}

/// Research strategy requested when the session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    Fast,
    #[default]
    Storm,
}

/// Per-session settings recorded with `ResearchStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResearchSettings {
    /// Upper bound on concurrently running workers (0 = unlimited).
    pub max_workers: u32,
    /// Advisory timeout handed to collaborators, in seconds (0 = none).
    pub timeout_secs: u64,
}

/// Token usage and spend. Added up across every cost-bearing event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CostBreakdown {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

impl CostBreakdown {
    /// Accumulates `other` into `self`.
    ///
    /// Token counts come from collaborators and saturate instead of overflowing.
    pub fn add(&mut self, other: &CostBreakdown) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.total_cost_usd += other.total_cost_usd;
    }

    /// JSON has no NaN or infinity; such a value would not survive the log.
    pub fn is_finite(&self) -> bool {
        self.total_cost_usd.is_finite()
    }

    pub fn usd(total_cost_usd: f64) -> Self {
        Self {
            total_cost_usd,
            ..Self::default()
        }
    }
}

/// A research perspective discovered during planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perspective {
    pub name: String,
    pub focus: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// A fact extracted by a search worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub source_url: String,
}

/// A source consulted by a search worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// A fact that survived cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFact {
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub corroborated_by: Vec<String>,
}

/// Two claims that disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub fact_1: String,
    pub fact_2: String,
    pub description: String,
}

/// Missing information identified during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub description: String,
    pub importance: f64,
    #[serde(default)]
    pub suggested_queries: Vec<String>,
}

/// A numbered citation in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: u32,
    pub url: String,
    #[serde(default)]
    pub title: String,
}
