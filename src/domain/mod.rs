//! Domain model for event-sourced research sessions.
//!
//! This module provides a strongly typed CQRS/ES domain model: every change to a
//! research session is a command validated by the aggregate and recorded as an
//! event in the session's log.
//!
//! # Architecture
//!
//! - **Commands** (`cqrs/commands.rs`): Intent to change state
//! - **Events** (`cqrs/events.rs`): Facts that have happened
//! - **Aggregate** (`cqrs/mod.rs`): Command validation and event application
//! - **State** (`state.rs`): Projection of events into session state
//! - **DAG** (`dag.rs`): Task graph validation and readiness
//! - **View** (`view.rs`): Read-only projection for listing and progress
//!
//! # Usage
//!
//! ```ignore
//! use deep_research::domain::{ResearchAggregate, ResearchCommand, ResearchServices};
//!
//! let mut aggregate = ResearchAggregate::new(session_id);
//! let event = aggregate.execute(ResearchCommand::StartResearch { ... }, &services)?;
//!
//! // Replay rebuilds the same state
//! let replayed = ResearchAggregate::load_from_events(session_id, &events)?;
//! ```

pub mod cqrs;
pub mod dag;
pub mod errors;
pub mod services;
pub mod state;
pub mod types;
pub mod view;

// Re-export CQRS types
pub use cqrs::*;

// Re-export commonly used types for convenience
pub use dag::{storm_plan, validate_plan, DagNode, ResearchDag};
pub use errors::ResearchError;
pub use services::{ResearchClock, ResearchServices};
pub use state::{AnalysisState, PlanState, ReportState, ResearchState, WorkerState};
pub use types::{
    Citation, Contradiction, CostBreakdown, EventId, Fact, KnowledgeGap, NodeStatus, Perspective,
    ResearchMode, ResearchSettings, ResearchStatus, Source, TaskKind, TimestampUtc,
    ValidatedFact,
};
pub use view::{ProgressEvent, SessionFilter, SessionSummary, SessionView};
