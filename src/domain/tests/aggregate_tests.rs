//! Unit tests for ResearchAggregate command handling and event application.

use super::*;
use crate::domain::dag::{storm_plan, DagNode};
use crate::domain::state::AnalysisState;
use crate::domain::types::{
    CostBreakdown, Fact, KnowledgeGap, Perspective, ResearchMode, ResearchSettings, Source,
    TaskKind, TimestampUtc,
};

fn test_services() -> ResearchServices {
    ResearchServices::default()
}

fn start_cmd() -> ResearchCommand {
    ResearchCommand::StartResearch {
        query: "How do tides work?".into(),
        mode: ResearchMode::Storm,
        settings: ResearchSettings::default(),
    }
}

fn perspectives() -> Vec<Perspective> {
    ["Oceanographer", "Physicist"]
        .iter()
        .map(|name| Perspective {
            name: name.to_string(),
            focus: format!("{} view", name),
            questions: vec![],
        })
        .collect()
}

fn plan_cmd(dag: Vec<DagNode>) -> ResearchCommand {
    ResearchCommand::SetPlan {
        topic: "tides".into(),
        perspectives: perspectives(),
        dag,
        cost: CostBreakdown::usd(0.01),
    }
}

fn complete_cmd(worker_id: &str, url: &str) -> ResearchCommand {
    ResearchCommand::CompleteWorker {
        worker_id: worker_id.into(),
        output: "Found 1 facts from 1 sources".into(),
        facts: vec![Fact {
            content: format!("fact from {}", worker_id),
            confidence: 0.9,
            source_url: url.into(),
        }],
        sources: vec![Source {
            url: url.into(),
            title: String::new(),
            snippet: String::new(),
        }],
        cost: CostBreakdown::usd(0.02),
    }
}

fn exec(agg: &mut ResearchAggregate, cmd: ResearchCommand) -> ResearchEvent {
    agg.execute(cmd, &test_services()).unwrap()
}

/// Aggregate in `searching` with the default two-perspective plan.
fn searching_aggregate() -> ResearchAggregate {
    let mut agg = ResearchAggregate::new("session-1");
    exec(&mut agg, start_cmd());
    exec(&mut agg, plan_cmd(storm_plan("tides", &perspectives())));
    agg
}

/// Aggregate in `analyzing` after both workers completed.
fn analyzing_aggregate() -> ResearchAggregate {
    let mut agg = searching_aggregate();
    for (id, url) in [("search_0", "https://a"), ("search_1", "https://b")] {
        exec(&mut agg, ResearchCommand::StartWorker { worker_id: id.into() });
        exec(&mut agg, complete_cmd(id, url));
    }
    exec(&mut agg, ResearchCommand::StartAnalysis { total_facts: 2 });
    agg
}

fn complete_analysis_cmd() -> ResearchCommand {
    ResearchCommand::CompleteAnalysis {
        validated_facts: vec![],
        contradictions: vec![],
        knowledge_gaps: vec![],
        cost: CostBreakdown::default(),
    }
}

fn is_transition(err: &ResearchError) -> bool {
    matches!(err, ResearchError::InvalidTransition { .. })
}

// ============================================================================
// StartResearch
// ============================================================================

#[test]
fn start_research_moves_to_planning() {
    let mut agg = ResearchAggregate::new("session-1");
    let event = exec(&mut agg, start_cmd());

    assert_eq!(event.version, 1);
    assert_eq!(event.event_type, "research.started");
    assert_eq!(event.aggregate_id, "session-1");
    assert_eq!(agg.version(), 1);
    assert_eq!(agg.status(), ResearchStatus::Planning);
    assert_eq!(agg.state().query, "How do tides work?");
    assert!(agg.state().created_at.is_some());
}

#[test]
fn start_research_twice_fails() {
    let mut agg = ResearchAggregate::new("session-1");
    exec(&mut agg, start_cmd());

    let err = agg.execute(start_cmd(), &test_services()).unwrap_err();
    assert!(is_transition(&err));
    assert_eq!(agg.version(), 1);
}

#[test]
fn start_research_rejects_blank_query() {
    let mut agg = ResearchAggregate::new("session-1");
    let cmd = ResearchCommand::StartResearch {
        query: "   ".into(),
        mode: ResearchMode::Fast,
        settings: ResearchSettings::default(),
    };
    let err = agg.execute(cmd, &test_services()).unwrap_err();
    assert!(matches!(err, ResearchError::InvalidCommand { .. }));
    assert_eq!(agg.version(), 0);
}

#[test]
fn aggregate_without_id_rejects_commands() {
    let mut agg = ResearchAggregate::default();
    assert!(agg.execute(start_cmd(), &test_services()).is_err());
}

// ============================================================================
// SetPlan
// ============================================================================

#[test]
fn set_plan_creates_workers_in_plan_order() {
    let agg = searching_aggregate();
    let state = agg.state();

    assert_eq!(agg.status(), ResearchStatus::Searching);
    assert_eq!(state.dag.len(), 4);
    let workers = state.workers_in_order();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].id, "search_0");
    assert_eq!(workers[0].worker_num, 1);
    assert_eq!(workers[1].worker_num, 2);
    assert_eq!(workers[1].perspective.as_deref(), Some("Physicist"));
    assert_eq!(state.cost.total_cost_usd, 0.01);
}

#[test]
fn set_plan_rejects_cycle_without_mutation() {
    let mut agg = ResearchAggregate::new("session-1");
    exec(&mut agg, start_cmd());

    let dag = vec![
        DagNode::new("a", TaskKind::Search, "a").depends_on("b"),
        DagNode::new("b", TaskKind::Search, "b").depends_on("a"),
    ];
    let err = agg.execute(plan_cmd(dag), &test_services()).unwrap_err();

    assert!(matches!(err, ResearchError::InvalidCommand { .. }));
    assert_eq!(agg.version(), 1);
    assert_eq!(agg.status(), ResearchStatus::Planning);
    assert!(agg.state().plan.is_none());
    assert!(agg.uncommitted_events().len() == 1);
}

#[test]
fn set_plan_after_planning_fails() {
    let mut agg = searching_aggregate();
    let err = agg
        .execute(plan_cmd(storm_plan("x", &perspectives())), &test_services())
        .unwrap_err();
    assert!(is_transition(&err));
}

// ============================================================================
// Workers
// ============================================================================

#[test]
fn worker_lifecycle_updates_worker_and_node() {
    let mut agg = searching_aggregate();

    let started = exec(
        &mut agg,
        ResearchCommand::StartWorker {
            worker_id: "search_0".into(),
        },
    );
    match &started.payload {
        EventPayload::WorkerStarted {
            worker_num,
            perspective,
            ..
        } => {
            assert_eq!(*worker_num, 1);
            assert_eq!(perspective.as_deref(), Some("Oceanographer"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(agg.state().dag.get("search_0").unwrap().status, NodeStatus::Running);

    exec(&mut agg, complete_cmd("search_0", "https://a"));
    let worker = &agg.state().workers["search_0"];
    assert_eq!(worker.status, NodeStatus::Complete);
    assert_eq!(worker.facts.len(), 1);
    assert!(worker.completed_at.is_some());
    assert_eq!(agg.state().total_facts(), 1);
    assert_eq!(agg.state().progress, 0.25);
}

#[test]
fn start_unknown_worker_fails() {
    let mut agg = searching_aggregate();
    let err = agg
        .execute(
            ResearchCommand::StartWorker {
                worker_id: "nope".into(),
            },
            &test_services(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        ResearchError::UnknownWorker {
            worker_id: "nope".into()
        }
    );
}

#[test]
fn start_worker_twice_fails() {
    let mut agg = searching_aggregate();
    let cmd = ResearchCommand::StartWorker {
        worker_id: "search_0".into(),
    };
    exec(&mut agg, cmd.clone());
    assert!(is_transition(&agg.execute(cmd, &test_services()).unwrap_err()));
}

#[test]
fn start_worker_with_incomplete_dependency_fails() {
    let mut agg = ResearchAggregate::new("session-1");
    exec(&mut agg, start_cmd());
    exec(
        &mut agg,
        plan_cmd(vec![
            DagNode::new("first", TaskKind::Search, "first"),
            DagNode::new("second", TaskKind::Search, "second").depends_on("first"),
        ]),
    );

    let err = agg
        .execute(
            ResearchCommand::StartWorker {
                worker_id: "second".into(),
            },
            &test_services(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("incomplete dependencies"));
}

#[test]
fn complete_requires_running_worker() {
    let mut agg = searching_aggregate();
    let err = agg
        .execute(complete_cmd("search_0", "https://a"), &test_services())
        .unwrap_err();
    assert!(is_transition(&err));
}

#[test]
fn fail_pending_worker_is_allowed() {
    let mut agg = searching_aggregate();
    exec(
        &mut agg,
        ResearchCommand::FailWorker {
            worker_id: "search_1".into(),
            error: "dependency 'x' failed".into(),
        },
    );
    let worker = &agg.state().workers["search_1"];
    assert_eq!(worker.status, NodeStatus::Failed);
    assert_eq!(worker.error.as_deref(), Some("dependency 'x' failed"));
    assert_eq!(
        agg.state().dag.get("search_1").unwrap().error.as_deref(),
        Some("dependency 'x' failed")
    );
}

#[test]
fn fail_completed_worker_fails() {
    let mut agg = searching_aggregate();
    exec(
        &mut agg,
        ResearchCommand::StartWorker {
            worker_id: "search_0".into(),
        },
    );
    exec(&mut agg, complete_cmd("search_0", "https://a"));
    let err = agg
        .execute(
            ResearchCommand::FailWorker {
                worker_id: "search_0".into(),
                error: "late".into(),
            },
            &test_services(),
        )
        .unwrap_err();
    assert!(is_transition(&err));
}

// ============================================================================
// Analysis and synthesis
// ============================================================================

#[test]
fn start_analysis_requires_terminal_search_nodes() {
    let mut agg = searching_aggregate();
    let err = agg
        .execute(
            ResearchCommand::StartAnalysis { total_facts: 0 },
            &test_services(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("still pending or running"));
}

#[test]
fn analysis_then_synthesis() {
    let mut agg = analyzing_aggregate();
    assert_eq!(agg.status(), ResearchStatus::Analyzing);
    assert_eq!(agg.state().analysis.as_ref().unwrap().total_facts, 2);

    // Synthesis needs a recorded analysis.
    assert!(agg
        .execute(ResearchCommand::StartSynthesis, &test_services())
        .is_err());

    exec(
        &mut agg,
        ResearchCommand::CompleteAnalysis {
            validated_facts: vec![],
            contradictions: vec![],
            knowledge_gaps: vec![KnowledgeGap {
                description: "neap tides".into(),
                importance: 0.8,
                suggested_queries: vec![],
            }],
            cost: CostBreakdown::usd(0.05),
        },
    );
    assert!(agg.state().analysis.as_ref().unwrap().is_recorded());
    assert_eq!(
        agg.state().dag.get("cross_validate").unwrap().status,
        NodeStatus::Complete
    );

    let err = agg
        .execute(complete_analysis_cmd(), &test_services())
        .unwrap_err();
    assert!(err.to_string().contains("already recorded"));

    exec(&mut agg, ResearchCommand::StartSynthesis);
    assert_eq!(agg.status(), ResearchStatus::Synthesizing);
}

#[test]
fn full_run_reaches_complete_with_progress_one() {
    let mut agg = analyzing_aggregate();
    exec(&mut agg, complete_analysis_cmd());
    exec(&mut agg, ResearchCommand::StartSynthesis);
    exec(
        &mut agg,
        ResearchCommand::GenerateReport {
            title: "Tides".into(),
            summary: "Moon".into(),
            full_content: "The moon pulls.".into(),
            citations: vec![],
            cost: CostBreakdown::usd(0.1),
        },
    );
    let duplicate = agg.execute(
        ResearchCommand::GenerateReport {
            title: "again".into(),
            summary: String::new(),
            full_content: String::new(),
            citations: vec![],
            cost: CostBreakdown::default(),
        },
        &test_services(),
    );
    assert!(duplicate.is_err());

    let event = exec(
        &mut agg,
        ResearchCommand::CompleteResearch {
            duration_ms: Some(1500),
        },
    );
    match event.payload {
        EventPayload::ResearchCompleted {
            duration_ms,
            total_cost,
            source_count,
        } => {
            assert_eq!(duration_ms, 1500);
            assert!((total_cost - 0.15).abs() < 1e-9);
            assert_eq!(source_count, 2);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(agg.status(), ResearchStatus::Complete);
    assert_eq!(agg.state().progress, 1.0);
}

#[test]
fn token_counts_saturate_instead_of_overflowing() {
    let mut agg = searching_aggregate();
    let heavy = CostBreakdown {
        input_tokens: u64::MAX - 1,
        output_tokens: 10,
        total_tokens: u64::MAX,
        total_cost_usd: 1.0,
    };
    let light = CostBreakdown {
        input_tokens: 5,
        output_tokens: 5,
        total_tokens: 10,
        total_cost_usd: 0.5,
    };
    for (id, cost) in [("search_0", heavy), ("search_1", light)] {
        exec(&mut agg, ResearchCommand::StartWorker { worker_id: id.into() });
        let mut cmd = complete_cmd(id, "https://a");
        if let ResearchCommand::CompleteWorker { cost: c, .. } = &mut cmd {
            *c = cost;
        }
        exec(&mut agg, cmd);
    }

    let total = agg.state().cost;
    assert_eq!(total.input_tokens, u64::MAX);
    assert_eq!(total.total_tokens, u64::MAX);
    assert_eq!(total.output_tokens, 15);
    assert!((total.total_cost_usd - 1.51).abs() < 1e-9);
}

#[test]
fn complete_research_defaults_duration_from_clock() {
    let start = TimestampUtc::now();
    let later = TimestampUtc(start.0 + chrono::Duration::milliseconds(2500));

    let mut agg = ResearchAggregate::new("session-1");
    agg.execute(start_cmd(), &ResearchServices::fixed(start))
        .unwrap();
    let event = agg
        .execute(
            ResearchCommand::CompleteResearch { duration_ms: None },
            &ResearchServices::fixed(later),
        )
        .unwrap();
    assert!(matches!(
        event.payload,
        EventPayload::ResearchCompleted {
            duration_ms: 2500,
            ..
        }
    ));
}

// ============================================================================
// Terminal commands
// ============================================================================

#[test]
fn cancel_from_pending_is_allowed() {
    let mut agg = ResearchAggregate::new("session-1");
    exec(
        &mut agg,
        ResearchCommand::CancelResearch {
            reason: "user".into(),
        },
    );
    assert_eq!(agg.status(), ResearchStatus::Cancelled);
    assert_eq!(agg.state().cancel_reason.as_deref(), Some("user"));
}

#[test]
fn fail_research_defaults_phase_to_status() {
    let mut agg = searching_aggregate();
    exec(
        &mut agg,
        ResearchCommand::FailResearch {
            error: "boom".into(),
            failed_phase: None,
        },
    );
    assert_eq!(agg.status(), ResearchStatus::Failed);
    assert_eq!(agg.state().failed_phase.as_deref(), Some("searching"));
    assert_eq!(agg.state().error.as_deref(), Some("boom"));
}

#[test]
fn terminal_status_rejects_everything_but_snapshot() {
    let mut agg = searching_aggregate();
    exec(
        &mut agg,
        ResearchCommand::CancelResearch {
            reason: "stop".into(),
        },
    );
    let version = agg.version();

    for cmd in [
        ResearchCommand::StartWorker {
            worker_id: "search_0".into(),
        },
        ResearchCommand::CompleteResearch { duration_ms: None },
        ResearchCommand::FailResearch {
            error: "x".into(),
            failed_phase: None,
        },
        ResearchCommand::CancelResearch { reason: "x".into() },
    ] {
        assert!(agg.execute(cmd, &test_services()).is_err());
    }
    assert_eq!(agg.version(), version);

    exec(&mut agg, ResearchCommand::TakeSnapshot);
    assert_eq!(agg.version(), version + 1);
    assert_eq!(agg.status(), ResearchStatus::Cancelled);
}

#[test]
fn snapshot_requires_initialized_aggregate() {
    let mut agg = ResearchAggregate::new("session-1");
    assert!(agg
        .execute(ResearchCommand::TakeSnapshot, &test_services())
        .is_err());
}

// ============================================================================
// Bookkeeping
// ============================================================================

#[test]
fn uncommitted_events_track_persistence() {
    let mut agg = searching_aggregate();
    assert_eq!(agg.uncommitted_events().len(), 2);
    assert_eq!(agg.committed_version(), 0);

    agg.mark_committed();
    assert_eq!(agg.committed_version(), 2);

    exec(
        &mut agg,
        ResearchCommand::StartWorker {
            worker_id: "search_0".into(),
        },
    );
    assert_eq!(agg.committed_version(), 2);
    let drained = agg.take_uncommitted();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].version, 3);
    assert!(agg.uncommitted_events().is_empty());
}

#[test]
fn rejected_command_leaves_no_trace() {
    let mut agg = searching_aggregate();
    let before = agg.state().clone();
    let result = agg.execute(complete_analysis_cmd(), &test_services());
    assert!(result.is_err());
    assert_eq!(agg.state(), &before);
    assert_eq!(agg.uncommitted_events().len(), 2);
}

#[tokio::test]
async fn cqrs_handle_and_apply_agree_with_execute() {
    let agg = ResearchAggregate::new("session-1");
    let events = agg.handle(start_cmd(), &test_services()).await.unwrap();
    assert_eq!(events.len(), 1);

    let mut applied = ResearchAggregate::default();
    applied.apply(events[0].clone());
    assert_eq!(applied.id(), "session-1");
    assert_eq!(applied.version(), 1);
    assert_eq!(applied.status(), ResearchStatus::Planning);
    assert_eq!(ResearchAggregate::aggregate_type(), "research");
}

#[test]
fn follow_up_queries_rank_gaps_and_drop_duplicates() {
    let gap = |description: &str, importance: f64, queries: &[&str]| KnowledgeGap {
        description: description.into(),
        importance,
        suggested_queries: queries.iter().map(|q| q.to_string()).collect(),
    };
    let state = ResearchState {
        analysis: Some(AnalysisState {
            knowledge_gaps: vec![
                gap("neap tides", 0.2, &[]),
                gap("spring tides", 0.9, &["what causes spring tides", "tidal range"]),
                gap("tidal bores", 0.5, &["tidal range", "where do tidal bores form"]),
            ],
            ..AnalysisState::default()
        }),
        ..ResearchState::default()
    };

    assert_eq!(
        state.follow_up_queries(),
        vec![
            "what causes spring tides",
            "tidal range",
            "where do tidal bores form",
            "neap tides",
        ]
    );
    assert!(ResearchState::default().follow_up_queries().is_empty());
}
