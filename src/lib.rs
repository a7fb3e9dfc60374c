//! Resumable, event-sourced research orchestration.
//!
//! A research session is an aggregate whose every change is an event in an
//! append-only log. The orchestrator drives planning, parallel search,
//! analysis and synthesis through injected collaborators and can pick a
//! session up again from whatever the log last recorded.

pub mod config;
pub mod domain;
pub mod event_store;
pub mod orchestrator;
pub mod research_paths;
pub mod structured_logger;

pub use config::OrchestratorConfig;
pub use domain::{ResearchAggregate, ResearchCommand, ResearchEvent, ResearchState};
pub use event_store::{EventStore, FileEventStore, InMemoryEventStore, StoreError};
pub use orchestrator::{Collaborators, OrchestratorError, ResearchOrchestrator};
