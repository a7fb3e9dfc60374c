//! Structured JSONL logger for debugging and event reconstruction.
//!
//! This module provides a machine-parseable audit trail per research session:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - Session and run IDs for correlation (each resume is a new run)
//! - Structured command and event data in JSON format

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::{ResearchCommand, ResearchEvent, ResearchStatus};

/// Structured JSONL logger for debugging and event reconstruction.
pub struct StructuredLogger {
    session_id: String,
    run_id: AtomicU64,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique within one logger)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Session ID
    pub session_id: String,
    /// Run ID (one per research or resume call)
    pub run_id: u64,
    /// Component that emitted the log
    pub component: String,
    /// Structured event data
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a new structured logger for the given session.
    ///
    /// Logs are appended to `<logs_dir>/run.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("run.jsonl");
        let run_id = last_run_id(&log_path) + 1;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(run_id),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    /// Returns the next sequence number.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event.
    ///
    /// The event is serialized to JSON and written as a single line.
    /// This method is thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            run_id: self.run_id.load(Ordering::SeqCst),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs the start of a run (fresh research or resume).
    pub fn log_run_started(&self, resumed: bool, version: u64) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "RunStarted",
                "resumed": resumed,
                "version": version
            }),
        );
    }

    /// Logs a domain research command.
    pub fn log_research_command(&self, command: &ResearchCommand) {
        self.log(
            "Research",
            serde_json::json!({
                "type": "ResearchCommand",
                "name": command.name(),
                "command": command
            }),
        );
    }

    /// Logs a persisted research event.
    pub fn log_research_event(&self, event: &ResearchEvent) {
        self.log(
            "Research",
            serde_json::json!({
                "type": "ResearchEvent",
                "version": event.version,
                "event_type": event.event_type,
                "event": event
            }),
        );
    }

    /// Logs a rejected command.
    pub fn log_command_rejected(&self, command: &str, error: &str) {
        self.log(
            "Research",
            serde_json::json!({
                "type": "CommandRejected",
                "command": command,
                "error": error
            }),
        );
    }

    /// Logs a status transition.
    pub fn log_phase_transition(&self, from: ResearchStatus, to: ResearchStatus) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "PhaseTransition",
                "from": from,
                "to": to
            }),
        );
    }

    /// Logs a collaborator call outcome.
    pub fn log_collaborator_result(&self, collaborator: &str, target: &str, success: bool) {
        self.log(
            "Collaborator",
            serde_json::json!({
                "type": "Complete",
                "collaborator": collaborator,
                "target": target,
                "success": success
            }),
        );
    }

    /// Logs a snapshot write.
    pub fn log_snapshot(&self, version: u64, success: bool) {
        self.log(
            "Store",
            serde_json::json!({
                "type": "Snapshot",
                "version": version,
                "success": success
            }),
        );
    }

    /// Logs the end of a run.
    pub fn log_run_complete(&self, status: ResearchStatus, version: u64) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "RunComplete",
                "status": status,
                "version": version
            }),
        );
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Returns the current session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the run ID of this logger.
    pub fn run_id(&self) -> u64 {
        self.run_id.load(Ordering::SeqCst)
    }
}

/// Highest run ID already recorded in the log.
fn last_run_id(log_path: &Path) -> u64 {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return 0;
    };
    content
        .lines()
        .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
        .map(|entry| entry.run_id)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
