//! Resumable research orchestrator.
//!
//! Drives a research aggregate through planning, parallel search, analysis and
//! synthesis. Every state change is a command executed against the aggregate
//! and persisted before the next one is issued, so a run interrupted at any
//! point can be resumed from the stored history.

pub mod collaborators;
pub mod errors;
pub mod loader;

pub use collaborators::{
    AnalysisOutcome, Analyst, CollaboratorError, PlanOutcome, Planner, ReportOutcome,
    SearchOutcome, Searcher, SynthesisRequest, Synthesizer,
};
pub use errors::OrchestratorError;
pub use loader::{list_sessions, load_session, replay_full};

use crate::config::OrchestratorConfig;
use crate::domain::dag::DagNode;
use crate::domain::types::{NodeStatus, Perspective, ResearchMode, ResearchSettings, TaskKind};
use crate::domain::view::{ProgressEvent, SessionFilter, SessionSummary};
use crate::domain::{
    ResearchAggregate, ResearchCommand, ResearchEvent, ResearchQuery, ResearchServices,
    ResearchStatus,
};
use crate::event_store::{EventStore, StoredSnapshot};
use crate::research_paths;
use crate::structured_logger::StructuredLogger;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const CANCEL_REASON: &str = "research cancelled by caller";

/// The injected collaborators, grouped for construction.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub searcher: Arc<dyn Searcher>,
    pub analyst: Arc<dyn Analyst>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// State owned by one `research` or `resume` call.
struct Run {
    aggregate: ResearchAggregate,
    cancel: CancellationToken,
    logger: Option<StructuredLogger>,
}

impl Run {
    fn id(&self) -> String {
        self.aggregate.id().to_string()
    }
}

/// Coordinates research sessions stored in an event store.
pub struct ResearchOrchestrator {
    store: Arc<dyn EventStore>,
    collaborators: Collaborators,
    services: ResearchServices,
    config: OrchestratorConfig,
    query: ResearchQuery,
}

impl ResearchOrchestrator {
    pub fn new(
        store: Arc<dyn EventStore>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            services: ResearchServices::default(),
            config,
            query: ResearchQuery::new(),
        }
    }

    /// Replaces the services handed to the aggregate (e.g. a fixed clock).
    pub fn with_services(mut self, services: ResearchServices) -> Self {
        self.services = services;
        self
    }

    /// Receives a notification after every persisted event.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.query.subscribe()
    }

    /// Read-side projection fed by this orchestrator.
    pub fn query(&self) -> &ResearchQuery {
        &self.query
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Starts a new session and runs it until it reaches a terminal status.
    pub async fn research(
        &self,
        session_id: &str,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchAggregate, OrchestratorError> {
        let settings = ResearchSettings {
            max_workers: u32::try_from(self.config.max_concurrent_workers).unwrap_or(u32::MAX),
            timeout_secs: 0,
        };
        self.research_with(session_id, query, ResearchMode::Storm, settings, cancel)
            .await
    }

    /// Like [`research`](Self::research) with an explicit mode and settings.
    pub async fn research_with(
        &self,
        session_id: &str,
        query: &str,
        mode: ResearchMode,
        settings: ResearchSettings,
        cancel: CancellationToken,
    ) -> Result<ResearchAggregate, OrchestratorError> {
        let existing = self.store.load_events_from(session_id, 0).await?;
        if !existing.is_empty() {
            return Err(OrchestratorError::SessionExists {
                session_id: session_id.to_string(),
            });
        }

        let mut run = self.start_run(ResearchAggregate::new(session_id), cancel, false);
        tracing::info!(session_id = %session_id, query = %query, "Starting research");
        self.step(
            &mut run,
            ResearchCommand::StartResearch {
                query: query.to_string(),
                mode,
                settings,
            },
        )
        .await?;
        self.drive(run).await
    }

    /// Reloads a session and continues from its current status.
    ///
    /// Terminal sessions are returned unchanged.
    pub async fn resume(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ResearchAggregate, OrchestratorError> {
        let aggregate = self.load(session_id).await?;
        if aggregate.version() == 0 {
            return Err(OrchestratorError::NotFound {
                session_id: session_id.to_string(),
            });
        }
        if aggregate.status().is_terminal() {
            tracing::info!(
                session_id = %session_id,
                status = %aggregate.status(),
                "Session already finished; nothing to resume"
            );
            return Ok(aggregate);
        }

        tracing::info!(
            session_id = %session_id,
            status = %aggregate.status(),
            version = aggregate.version(),
            "Resuming research"
        );
        self.query.projection.write().await.seed(&aggregate);
        let run = self.start_run(aggregate, cancel, true);
        self.drive(run).await
    }

    /// Rebuilds a session from its latest valid snapshot plus the events after it.
    ///
    /// Unknown IDs yield an empty aggregate at version 0.
    pub async fn load(&self, session_id: &str) -> Result<ResearchAggregate, OrchestratorError> {
        loader::load_session(self.store.as_ref(), session_id).await
    }

    /// Summaries of every stored session, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, OrchestratorError> {
        self.list_sessions_filtered(&SessionFilter::default()).await
    }

    /// Summaries matching `filter`. Sessions that fail to load are skipped.
    pub async fn list_sessions_filtered(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionSummary>, OrchestratorError> {
        loader::list_sessions(self.store.as_ref(), filter).await
    }

    fn start_run(
        &self,
        aggregate: ResearchAggregate,
        cancel: CancellationToken,
        resumed: bool,
    ) -> Run {
        let logger = if self.config.structured_log {
            let dir = research_paths::session_logs_dir(&self.config.store_dir, aggregate.id());
            match StructuredLogger::new(aggregate.id(), &dir) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    tracing::warn!(session_id = %aggregate.id(), error = %e, "Structured log disabled");
                    None
                }
            }
        } else {
            None
        };
        if let Some(logger) = &logger {
            logger.log_run_started(resumed, aggregate.version());
        }
        Run {
            aggregate,
            cancel,
            logger,
        }
    }

    /// Status loop. Re-entrant: each arm only issues the commands its status still needs.
    async fn drive(&self, mut run: Run) -> Result<ResearchAggregate, OrchestratorError> {
        loop {
            let status = run.aggregate.status();
            if status.is_terminal() {
                break;
            }
            if run.cancel.is_cancelled() {
                self.step(
                    &mut run,
                    ResearchCommand::CancelResearch {
                        reason: CANCEL_REASON.to_string(),
                    },
                )
                .await?;
                continue;
            }
            match status {
                ResearchStatus::Pending | ResearchStatus::Planning => self.plan(&mut run).await?,
                ResearchStatus::Searching => self.search(&mut run).await?,
                ResearchStatus::Analyzing => self.analyze(&mut run).await?,
                ResearchStatus::Synthesizing => self.synthesize(&mut run).await?,
                ResearchStatus::Complete | ResearchStatus::Failed | ResearchStatus::Cancelled => {}
            }
        }

        tracing::info!(
            session_id = %run.aggregate.id(),
            status = %run.aggregate.status(),
            version = run.aggregate.version(),
            "Research run finished"
        );
        if let Some(logger) = &run.logger {
            logger.log_run_complete(run.aggregate.status(), run.aggregate.version());
        }
        Ok(run.aggregate)
    }

    async fn plan(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let topic = run.aggregate.state().query.clone();
        let result = race(&run.cancel, self.collaborators.planner.create_plan(&topic)).await;
        log_collaborator(run, "planner", &topic, result.is_ok());

        let outcome = match result {
            Ok(outcome) if outcome.is_finite() => outcome,
            Ok(_) => {
                return self
                    .fail(
                        run,
                        "planning failed: non-finite value in plan".to_string(),
                        "planning",
                    )
                    .await
            }
            Err(CollaboratorError::Cancelled) => return Ok(()),
            Err(e) => return self.fail(run, format!("planning failed: {}", e), "planning").await,
        };

        let command = ResearchCommand::SetPlan {
            topic: outcome.topic,
            perspectives: outcome.perspectives,
            dag: outcome.dag,
            cost: outcome.cost,
        };
        match self.step(run, command).await {
            Ok(_) => Ok(()),
            Err(OrchestratorError::Rejected { source, .. }) => {
                self.fail(run, format!("invalid plan: {}", source), "planning")
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn search(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        loop {
            if run.cancel.is_cancelled() {
                return Ok(());
            }
            self.fail_blocked_nodes(run).await?;

            let batch = self.next_batch(run);
            if batch.is_empty() {
                if run.aggregate.state().search_finished() {
                    break;
                }
                return Err(OrchestratorError::Stalled {
                    session_id: run.id(),
                    message: "search nodes remain but none is ready".to_string(),
                });
            }

            let mut dispatched = Vec::with_capacity(batch.len());
            let mut progressed = false;
            for node in batch {
                if node.status == NodeStatus::Running {
                    tracing::info!(
                        session_id = %run.aggregate.id(),
                        worker_id = %node.id,
                        "Re-dispatching worker interrupted before completion"
                    );
                    dispatched.push(node);
                    continue;
                }
                let command = ResearchCommand::StartWorker {
                    worker_id: node.id.clone(),
                };
                match self.step(run, command).await {
                    Ok(_) => {
                        progressed = true;
                        dispatched.push(node);
                    }
                    Err(e) if e.is_rejection() => continue,
                    Err(e) => return Err(e),
                }
            }

            progressed |= self.run_batch(run, dispatched).await?;
            if !progressed {
                return Err(OrchestratorError::Stalled {
                    session_id: run.id(),
                    message: "no search command in the batch was accepted".to_string(),
                });
            }
        }

        let total_facts = run.aggregate.state().total_facts();
        self.step(run, ResearchCommand::StartAnalysis { total_facts })
            .await?;
        Ok(())
    }

    /// Orphaned running nodes first, then ready pending nodes, capped by config.
    fn next_batch(&self, run: &Run) -> Vec<DagNode> {
        let state = run.aggregate.state();
        let mut batch: Vec<DagNode> = state
            .running_search_nodes()
            .into_iter()
            .chain(state.ready_search_nodes())
            .cloned()
            .collect();
        if self.config.max_concurrent_workers > 0 {
            batch.truncate(self.config.max_concurrent_workers);
        }
        batch
    }

    /// Fails pending search nodes whose dependency failed; they can never run.
    ///
    /// Repeats until a fixed point so failures cascade down dependency chains.
    async fn fail_blocked_nodes(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        loop {
            let blocked: Vec<(String, String)> = run
                .aggregate
                .state()
                .dag
                .blocked_nodes()
                .into_iter()
                .filter(|(id, _)| {
                    run.aggregate
                        .state()
                        .dag
                        .get(id)
                        .is_some_and(|n| n.kind == TaskKind::Search)
                })
                .collect();

            let mut failed_any = false;
            for (worker_id, dependency) in blocked {
                let command = ResearchCommand::FailWorker {
                    worker_id,
                    error: format!("dependency '{}' failed", dependency),
                };
                match self.step(run, command).await {
                    Ok(_) => failed_any = true,
                    Err(e) if e.is_rejection() => {}
                    Err(e) => return Err(e),
                }
            }
            if !failed_any {
                return Ok(());
            }
        }
    }

    /// Runs dispatched nodes concurrently and folds each result in as it arrives.
    ///
    /// Returns whether any result was recorded.
    async fn run_batch(
        &self,
        run: &mut Run,
        nodes: Vec<DagNode>,
    ) -> Result<bool, OrchestratorError> {
        let perspectives: HashMap<String, Perspective> = run
            .aggregate
            .state()
            .plan
            .as_ref()
            .map(|plan| {
                plan.perspectives
                    .iter()
                    .map(|p| (p.name.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut tasks = JoinSet::new();
        let mut task_workers = HashMap::new();
        for node in nodes {
            let searcher = Arc::clone(&self.collaborators.searcher);
            let cancel = run.cancel.clone();
            let perspective = node
                .perspective
                .as_ref()
                .and_then(|name| perspectives.get(name))
                .cloned();
            let worker_id = node.id.clone();
            let objective = node.description.clone();
            let handle = tasks.spawn(async move {
                let result = race(&cancel, searcher.search(&objective, perspective.as_ref())).await;
                (worker_id, result)
            });
            task_workers.insert(handle.id(), node.id);
        }

        let mut progressed = false;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (worker_id, result) = match joined {
                Ok((_, output)) => output,
                Err(join_error) => {
                    let Some(worker_id) = task_workers.get(&join_error.id()).cloned() else {
                        tracing::error!(error = %join_error, "Search task for unknown worker failed");
                        continue;
                    };
                    (
                        worker_id,
                        Err(CollaboratorError::failed(format!(
                            "search task aborted: {}",
                            join_error
                        ))),
                    )
                }
            };
            log_collaborator(run, "searcher", &worker_id, result.is_ok());

            let command = match result {
                Ok(outcome) if !outcome.is_finite() => {
                    tracing::warn!(
                        session_id = %run.aggregate.id(),
                        worker_id = %worker_id,
                        "Search result carries a non-finite number"
                    );
                    ResearchCommand::FailWorker {
                        worker_id,
                        error: "non-finite value in search result".to_string(),
                    }
                }
                Ok(outcome) => ResearchCommand::CompleteWorker {
                    worker_id,
                    output: outcome.summary(),
                    facts: outcome.facts,
                    sources: outcome.sources,
                    cost: outcome.cost,
                },
                Err(CollaboratorError::Cancelled) => ResearchCommand::FailWorker {
                    worker_id,
                    error: format!("cancelled: {}", CANCEL_REASON),
                },
                Err(e) => {
                    tracing::warn!(
                        session_id = %run.aggregate.id(),
                        worker_id = %worker_id,
                        error = %e,
                        "Search worker failed"
                    );
                    ResearchCommand::FailWorker {
                        worker_id,
                        error: e.to_string(),
                    }
                }
            };
            match self.step(run, command).await {
                Ok(_) => progressed = true,
                Err(e) if e.is_rejection() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(progressed)
    }

    async fn analyze(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let recorded = run
            .aggregate
            .state()
            .analysis
            .as_ref()
            .is_some_and(|a| a.is_recorded());

        if !recorded {
            let state = run.aggregate.state();
            let facts = state.all_facts();
            let query = state.query.clone();

            let outcome = if facts.is_empty() {
                tracing::info!(
                    session_id = %run.aggregate.id(),
                    "No facts collected; recording empty analysis"
                );
                AnalysisOutcome::default()
            } else {
                let result = race(
                    &run.cancel,
                    self.collaborators.analyst.analyze(&query, &facts),
                )
                .await;
                log_collaborator(run, "analyst", &query, result.is_ok());
                match result {
                    Ok(outcome) if outcome.is_finite() => outcome,
                    Ok(_) => {
                        tracing::warn!(
                            session_id = %run.aggregate.id(),
                            "Analysis carries a non-finite number; continuing with empty analysis"
                        );
                        AnalysisOutcome::default()
                    }
                    Err(CollaboratorError::Cancelled) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(
                            session_id = %run.aggregate.id(),
                            error = %e,
                            "Analysis failed; continuing with empty analysis"
                        );
                        AnalysisOutcome::default()
                    }
                }
            };

            self.step(
                run,
                ResearchCommand::CompleteAnalysis {
                    validated_facts: outcome.validated_facts,
                    contradictions: outcome.contradictions,
                    knowledge_gaps: outcome.knowledge_gaps,
                    cost: outcome.cost,
                },
            )
            .await?;
        }

        self.step(run, ResearchCommand::StartSynthesis).await?;
        Ok(())
    }

    async fn synthesize(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        if run.aggregate.state().report.is_none() {
            let state = run.aggregate.state();
            let request = SynthesisRequest {
                query: state.query.clone(),
                plan: state.plan.clone(),
                search_results: state.workers_in_order().into_iter().cloned().collect(),
                analysis: state.analysis.clone().unwrap_or_default(),
            };
            let query = request.query.clone();
            let result = race(
                &run.cancel,
                self.collaborators.synthesizer.synthesize(request),
            )
            .await;
            log_collaborator(run, "synthesizer", &query, result.is_ok());

            let report = match result {
                Ok(report) if report.is_finite() => report,
                Ok(_) => {
                    return self
                        .fail(
                            run,
                            "synthesis failed: non-finite value in report".to_string(),
                            "synthesis",
                        )
                        .await
                }
                Err(CollaboratorError::Cancelled) => return Ok(()),
                Err(e) => {
                    return self
                        .fail(run, format!("synthesis failed: {}", e), "synthesis")
                        .await
                }
            };
            self.step(
                run,
                ResearchCommand::GenerateReport {
                    title: report.title,
                    summary: report.summary,
                    full_content: report.full_content,
                    citations: report.citations,
                    cost: report.cost,
                },
            )
            .await?;
        }

        self.step(run, ResearchCommand::CompleteResearch { duration_ms: None })
            .await?;
        Ok(())
    }

    async fn fail(&self, run: &mut Run, error: String, phase: &str) -> Result<(), OrchestratorError> {
        tracing::warn!(session_id = %run.aggregate.id(), phase, error = %error, "Research failed");
        self.step(
            run,
            ResearchCommand::FailResearch {
                error,
                failed_phase: Some(phase.to_string()),
            },
        )
        .await?;
        Ok(())
    }

    /// Executes one command and persists the resulting event.
    async fn step(
        &self,
        run: &mut Run,
        command: ResearchCommand,
    ) -> Result<ResearchEvent, OrchestratorError> {
        let name = command.name();
        if let Some(logger) = &run.logger {
            logger.log_research_command(&command);
        }

        let before = run.aggregate.status();
        let event = match run.aggregate.execute(command, &self.services) {
            Ok(event) => event,
            Err(source) => {
                tracing::warn!(
                    session_id = %run.aggregate.id(),
                    command = name,
                    error = %source,
                    "Command rejected"
                );
                if let Some(logger) = &run.logger {
                    logger.log_command_rejected(name, &source.to_string());
                }
                return Err(OrchestratorError::Rejected {
                    session_id: run.id(),
                    command: name,
                    source,
                });
            }
        };

        self.persist(run).await?;

        let after = run.aggregate.status();
        if before != after {
            tracing::info!(
                session_id = %run.aggregate.id(),
                from = %before,
                to = %after,
                "Research phase transition"
            );
            if let Some(logger) = &run.logger {
                logger.log_phase_transition(before, after);
            }
        }
        Ok(event)
    }

    /// Appends the uncommitted events, publishes progress and snapshots on cadence.
    async fn persist(&self, run: &mut Run) -> Result<(), OrchestratorError> {
        let events = run.aggregate.uncommitted_events().to_vec();
        if events.is_empty() {
            return Ok(());
        }
        let expected = run.aggregate.committed_version();
        let session_id = run.id();

        if let Err(e) = self
            .store
            .append_events(&session_id, &events, expected)
            .await
        {
            tracing::error!(
                session_id = %session_id,
                expected_version = expected,
                error = %e,
                "Failed to persist events"
            );
            return Err(e.into());
        }
        run.aggregate.mark_committed();

        for event in &events {
            tracing::debug!(
                session_id = %session_id,
                version = event.version,
                event_type = %event.event_type,
                "Persisted event"
            );
            if let Some(logger) = &run.logger {
                logger.log_research_event(event);
            }
        }
        self.query.publish(&events).await;

        let version = run.aggregate.version();
        if self.config.should_snapshot(version) {
            let snapshot = StoredSnapshot {
                aggregate_id: session_id.clone(),
                version,
                state: run.aggregate.state().clone(),
                snapshot_at: self.services.clock.now(),
            };
            let saved = self.store.save_snapshot(&session_id, &snapshot).await;
            if let Err(e) = &saved {
                tracing::warn!(session_id = %session_id, version, error = %e, "Snapshot failed");
            }
            if let Some(logger) = &run.logger {
                logger.log_snapshot(version, saved.is_ok());
            }
        }
        Ok(())
    }
}

/// Awaits `call` unless `cancel` fires first.
async fn race<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        result = call => result,
    }
}

fn log_collaborator(run: &Run, collaborator: &str, target: &str, success: bool) {
    if let Some(logger) = &run.logger {
        logger.log_collaborator_result(collaborator, target, success);
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
