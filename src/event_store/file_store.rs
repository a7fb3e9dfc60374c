//! File-based event store implementation.
//!
//! Each aggregate gets its own directory under the store root:
//! - `events.jsonl`: one line per append, appended under an exclusive lock. A
//!   single event is written as a JSON object, a batch as a JSON array.
//! - `snapshot.json`: latest snapshot, replaced atomically via temp file + rename

use super::{check_append, check_sequence, EventStore, StoreError, StoredSnapshot};
use crate::domain::ResearchEvent;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const EVENTS_FILE: &str = "events.jsonl";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// JSONL event store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    root: PathBuf,
}

/// Parsed contents of an event log.
struct LogContents {
    events: Vec<ResearchEvent>,
    /// Byte length of the fully written prefix.
    valid_len: u64,
    /// An unterminated final line was found after `valid_len`.
    torn_tail: bool,
}

impl FileEventStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one aggregate's log and snapshot.
    pub fn aggregate_dir(&self, aggregate_id: &str) -> Result<PathBuf, StoreError> {
        validate_aggregate_id(aggregate_id)?;
        Ok(self.root.join(aggregate_id))
    }

    fn log_path(&self, aggregate_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.aggregate_dir(aggregate_id)?.join(EVENTS_FILE))
    }

    fn snapshot_path(&self, aggregate_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.aggregate_dir(aggregate_id)?.join(SNAPSHOT_FILE))
    }
}

impl FileEventStore {
    fn append_sync(
        &self,
        aggregate_id: &str,
        events: &[ResearchEvent],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let log_path = self.log_path(aggregate_id)?;
        check_append(aggregate_id, events, expected_version)?;

        // One line per call: a crash tears the whole batch or none of it.
        let mut record = match events {
            [event] => serde_json::to_string(event)?,
            _ => serde_json::to_string(events)?,
        };
        record.push('\n');

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&log_path)?;

        // Held until `file` is dropped.
        file.lock_exclusive()?;

        let contents = read_log(&mut file, aggregate_id)?;
        let actual = contents.events.last().map(|e| e.version).unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual,
            });
        }
        if events.is_empty() {
            return Ok(());
        }

        if contents.torn_tail {
            tracing::warn!(
                session_id = %aggregate_id,
                valid_len = contents.valid_len,
                "Truncating unterminated tail of event log"
            );
            file.set_len(contents.valid_len)?;
        }

        file.seek(SeekFrom::Start(contents.valid_len))?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        file.sync_all()?;

        tracing::debug!(
            session_id = %aggregate_id,
            from = expected_version + 1,
            count = events.len(),
            "Appended events"
        );
        Ok(())
    }

    fn load_sync(&self, aggregate_id: &str) -> Result<Vec<ResearchEvent>, StoreError> {
        let log_path = self.log_path(aggregate_id)?;
        let mut file = match File::open(&log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        file.lock_shared()?;
        let contents = read_log(&mut file, aggregate_id)?;
        if contents.torn_tail {
            tracing::warn!(
                session_id = %aggregate_id,
                "Ignoring unterminated tail of event log"
            );
        }
        Ok(contents.events)
    }

    fn load_snapshot_sync(&self, aggregate_id: &str) -> Result<Option<StoredSnapshot>, StoreError> {
        let path = self.snapshot_path(aggregate_id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // The log is authoritative; an unreadable snapshot only costs a full replay.
        let snapshot: StoredSnapshot = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(session_id = %aggregate_id, error = %e, "Ignoring unreadable snapshot");
                return Ok(None);
            }
        };
        if snapshot.aggregate_id != aggregate_id {
            tracing::warn!(
                session_id = %aggregate_id,
                snapshot_owner = %snapshot.aggregate_id,
                "Ignoring snapshot of another aggregate"
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    fn save_snapshot_sync(
        &self,
        aggregate_id: &str,
        snapshot: &StoredSnapshot,
    ) -> Result<(), StoreError> {
        let path = self.snapshot_path(aggregate_id)?;
        if snapshot.aggregate_id != aggregate_id {
            return Err(StoreError::InvalidSnapshot {
                aggregate_id: aggregate_id.to_string(),
                message: format!("snapshot belongs to '{}'", snapshot.aggregate_id),
            });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(snapshot)?;

        // Write to temp file, then rename for atomicity
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(content.as_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;

        tracing::debug!(session_id = %aggregate_id, version = snapshot.version, "Saved snapshot");
        Ok(())
    }

    fn list_sync(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_aggregate_id(&name).is_ok() && entry.path().join(EVENTS_FILE).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Runs file I/O and lock waits off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[ResearchEvent],
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let store = self.clone();
        let aggregate_id = aggregate_id.to_string();
        let events = events.to_vec();
        blocking(move || store.append_sync(&aggregate_id, &events, expected_version)).await
    }

    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<ResearchEvent>, StoreError> {
        let store = self.clone();
        let aggregate_id = aggregate_id.to_string();
        blocking(move || store.load_sync(&aggregate_id)).await
    }

    async fn load_snapshot(
        &self,
        aggregate_id: &str,
    ) -> Result<Option<StoredSnapshot>, StoreError> {
        let store = self.clone();
        let aggregate_id = aggregate_id.to_string();
        blocking(move || store.load_snapshot_sync(&aggregate_id)).await
    }

    async fn save_snapshot(
        &self,
        aggregate_id: &str,
        snapshot: &StoredSnapshot,
    ) -> Result<(), StoreError> {
        let store = self.clone();
        let aggregate_id = aggregate_id.to_string();
        let snapshot = snapshot.clone();
        blocking(move || store.save_snapshot_sync(&aggregate_id, &snapshot)).await
    }

    async fn list_aggregate_ids(&self) -> Result<Vec<String>, StoreError> {
        let store = self.clone();
        blocking(move || store.list_sync()).await
    }
}

/// Rejects IDs that would escape the store root or collide with path syntax.
fn validate_aggregate_id(aggregate_id: &str) -> Result<(), StoreError> {
    let invalid = aggregate_id.is_empty()
        || aggregate_id == "."
        || aggregate_id == ".."
        || aggregate_id.contains(['/', '\\', '\0'])
        || aggregate_id.contains("..");
    if invalid {
        return Err(StoreError::InvalidAggregateId {
            aggregate_id: aggregate_id.to_string(),
        });
    }
    Ok(())
}

/// Reads and validates the whole log from the start of `file`.
fn read_log(file: &mut File, aggregate_id: &str) -> Result<LogContents, StoreError> {
    file.seek(SeekFrom::Start(0))?;
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;

    let mut events = Vec::new();
    let mut valid_len = 0u64;
    let mut torn_tail = false;
    let mut rest = raw.as_str();
    let mut line_no = 0usize;

    while !rest.is_empty() {
        line_no += 1;
        let Some((line, tail)) = rest.split_once('\n') else {
            // Each append ends its one line with '\n' and fsyncs before returning,
            // so an unterminated line is a whole append that never completed.
            torn_tail = true;
            break;
        };
        valid_len += line.len() as u64 + 1;
        rest = tail;
        if line.trim().is_empty() {
            continue;
        }
        let corrupt = |e: serde_json::Error| {
            StoreError::corrupted(aggregate_id, format!("line {}: {}", line_no, e))
        };
        // A multi-event append is one JSON array; a single event is a bare object.
        if line.trim_start().starts_with('[') {
            let batch: Vec<ResearchEvent> = serde_json::from_str(line).map_err(corrupt)?;
            events.extend(batch);
        } else {
            events.push(serde_json::from_str(line).map_err(corrupt)?);
        }
    }

    check_sequence(aggregate_id, &events, 0)
        .map_err(|message| StoreError::corrupted(aggregate_id, message))?;

    Ok(LogContents {
        events,
        valid_len,
        torn_tail,
    })
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
