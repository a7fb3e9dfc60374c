use super::*;
use crate::domain::services::ResearchServices;
use crate::domain::types::{ResearchMode, ResearchSettings};
use crate::domain::ResearchAggregate;
use tempfile::TempDir;

fn create_test_logger() -> (StructuredLogger, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger =
        StructuredLogger::new("test-session", temp_dir.path()).expect("Failed to create logger");
    (logger, temp_dir)
}

fn read_entries(temp_dir: &TempDir) -> Vec<LogEntry> {
    let content = std::fs::read_to_string(temp_dir.path().join("run.jsonl"))
        .expect("Failed to read log file");
    content
        .lines()
        .map(|line| serde_json::from_str(line).expect("Failed to parse log entry"))
        .collect()
}

#[test]
fn test_log_entries_are_valid_json() {
    let (logger, temp_dir) = create_test_logger();

    logger.log("TestComponent", serde_json::json!({"key": "value1"}));
    logger.log("TestComponent", serde_json::json!({"key": "value2"}));
    logger.log("TestComponent", serde_json::json!({"key": "value3"}));

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 3);
    for entry in entries {
        assert_eq!(entry.session_id, "test-session");
        assert_eq!(entry.component, "TestComponent");
    }
}

#[test]
fn test_sequence_numbers_monotonic() {
    let (logger, temp_dir) = create_test_logger();

    for i in 0..10 {
        logger.log("Test", serde_json::json!({"iteration": i}));
    }

    let seqs: Vec<u64> = read_entries(&temp_dir).iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_run_id_increments_per_logger() {
    let temp_dir = TempDir::new().unwrap();

    let first = StructuredLogger::new("s", temp_dir.path()).unwrap();
    assert_eq!(first.run_id(), 1);
    first.log_run_started(false, 0);
    drop(first);

    let second = StructuredLogger::new("s", temp_dir.path()).unwrap();
    assert_eq!(second.run_id(), 2);
    second.log_run_started(true, 5);

    let runs: Vec<u64> = read_entries(&temp_dir).iter().map(|e| e.run_id).collect();
    assert_eq!(runs, vec![1, 2]);
}

#[test]
fn test_empty_logger_does_not_advance_run_id() {
    let temp_dir = TempDir::new().unwrap();
    drop(StructuredLogger::new("s", temp_dir.path()).unwrap());
    let next = StructuredLogger::new("s", temp_dir.path()).unwrap();
    assert_eq!(next.run_id(), 1);
}

#[test]
fn test_concurrent_logging() {
    let (logger, temp_dir) = create_test_logger();
    let logger = std::sync::Arc::new(logger);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let logger = logger.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    logger.log("Thread", serde_json::json!({"thread": t, "i": i}));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut seqs: Vec<u64> = read_entries(&temp_dir).iter().map(|e| e.seq).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=100).collect::<Vec<_>>());
}

#[test]
fn test_timestamp_format() {
    let (logger, temp_dir) = create_test_logger();
    logger.log("Test", serde_json::json!({}));

    let entry = &read_entries(&temp_dir)[0];
    assert!(entry.ts.ends_with('Z'));
    assert!(chrono::DateTime::parse_from_rfc3339(&entry.ts).is_ok());
}

#[test]
fn test_research_command_and_event_logging() {
    let (logger, temp_dir) = create_test_logger();
    let command = ResearchCommand::StartResearch {
        query: "tides".into(),
        mode: ResearchMode::Storm,
        settings: ResearchSettings::default(),
    };
    logger.log_research_command(&command);

    let mut agg = ResearchAggregate::new("test-session");
    let event = agg
        .execute(command, &ResearchServices::default())
        .unwrap();
    logger.log_research_event(&event);
    logger.log_phase_transition(ResearchStatus::Pending, ResearchStatus::Planning);
    logger.log_command_rejected("StartWorker", "worker not found: x");
    logger.log_run_complete(ResearchStatus::Planning, 1);

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0].event["type"], "ResearchCommand");
    assert_eq!(entries[0].event["name"], "StartResearch");
    assert_eq!(entries[1].event["type"], "ResearchEvent");
    assert_eq!(entries[1].event["event_type"], "research.started");
    assert_eq!(entries[1].event["version"], 1);
    assert_eq!(entries[2].event["from"], "pending");
    assert_eq!(entries[2].event["to"], "planning");
    assert_eq!(entries[3].event["command"], "StartWorker");
    assert_eq!(entries[4].component, "Orchestrator");
}

#[test]
fn test_collaborator_and_snapshot_logging() {
    let (logger, temp_dir) = create_test_logger();
    logger.log_collaborator_result("searcher", "search_0", false);
    logger.log_snapshot(20, true);

    let entries = read_entries(&temp_dir);
    assert_eq!(entries[0].component, "Collaborator");
    assert_eq!(entries[0].event["success"], false);
    assert_eq!(entries[1].component, "Store");
    assert_eq!(entries[1].event["version"], 20);
    assert!(logger.path().ends_with("run.jsonl"));
    assert_eq!(logger.session_id(), "test-session");
}
