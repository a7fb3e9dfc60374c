use super::*;
use crate::domain::cqrs::EventPayload;
use crate::domain::state::ResearchState;
use crate::domain::types::{CostBreakdown, Fact, TimestampUtc};
use std::io::Write;
use tempfile::tempdir;

fn event(aggregate_id: &str, version: u64) -> ResearchEvent {
    ResearchEvent::new(
        aggregate_id,
        version,
        TimestampUtc::now(),
        EventPayload::ResearchCancelled {
            reason: format!("event {}", version),
        },
    )
}

fn events(aggregate_id: &str, count: u64) -> Vec<ResearchEvent> {
    (1..=count).map(|v| event(aggregate_id, v)).collect()
}

fn log_file(store: &FileEventStore, id: &str) -> PathBuf {
    store.aggregate_dir(id).unwrap().join(EVENTS_FILE)
}

fn append_raw(path: &Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[tokio::test]
async fn test_each_append_is_one_line() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 1), 0).await.unwrap();
    store
        .append_events("s1", &[event("s1", 2), event("s1", 3)], 1)
        .await
        .unwrap();

    let content = std::fs::read_to_string(log_file(&store, "s1")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(content.ends_with('\n'));

    let single: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(single["aggregate_id"], "s1");
    assert_eq!(single["version"], 1);
    assert_eq!(single["event_type"], "research.cancelled");
    assert!(single["payload"]["research_cancelled"]["reason"].is_string());

    let batch: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    let batch = batch.as_array().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["version"], 2);
    assert_eq!(batch[1]["version"], 3);

    let loaded = store.load_events("s1").await.unwrap();
    assert_eq!(loaded.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_reopened_store_sees_events() {
    let dir = tempdir().unwrap();
    FileEventStore::new(dir.path())
        .append_events("s1", &events("s1", 3), 0)
        .await
        .unwrap();

    let reopened = FileEventStore::new(dir.path());
    let loaded = reopened.load_events("s1").await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(reopened.root(), dir.path());
}

#[tokio::test]
async fn test_garbage_line_is_corruption() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 1), 0).await.unwrap();
    append_raw(&log_file(&store, "s1"), "{not json}\n");

    let err = store.load_events("s1").await.unwrap_err();
    match err {
        StoreError::Corrupted { message, .. } => assert!(message.contains("line 2")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_version_gap_on_disk_is_corruption() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 1), 0).await.unwrap();

    let skipped = serde_json::to_string(&event("s1", 3)).unwrap();
    append_raw(&log_file(&store, "s1"), &format!("{}\n", skipped));

    let err = store.load_events("s1").await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupted { .. }));

    // Appends refuse to build on a corrupted log as well.
    let err = store
        .append_events("s1", &[event("s1", 4)], 3)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Corrupted { .. }));
}

#[tokio::test]
async fn test_duplicate_version_on_disk_is_corruption() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 2), 0).await.unwrap();

    let dup = serde_json::to_string(&event("s1", 2)).unwrap();
    append_raw(&log_file(&store, "s1"), &format!("{}\n", dup));

    assert!(matches!(
        store.load_events("s1").await.unwrap_err(),
        StoreError::Corrupted { .. }
    ));
}

#[tokio::test]
async fn test_torn_tail_is_ignored_then_truncated() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 2), 0).await.unwrap();

    // An append that died mid-line.
    let partial = serde_json::to_vec(&event("s1", 3)).unwrap();
    let cut = partial.len() / 2;
    let mut file = OpenOptions::new()
        .append(true)
        .open(log_file(&store, "s1"))
        .unwrap();
    file.write_all(&partial[..cut]).unwrap();
    drop(file);

    let loaded = store.load_events("s1").await.unwrap();
    assert_eq!(loaded.len(), 2);

    store.append_events("s1", &[event("s1", 3)], 2).await.unwrap();
    let loaded = store.load_events("s1").await.unwrap();
    assert_eq!(loaded.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2, 3]);

    // The batch of two and the single event.
    let content = std::fs::read_to_string(log_file(&store, "s1")).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[tokio::test]
async fn test_torn_batch_is_dropped_whole() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    let path = store.aggregate_dir("s1").unwrap();
    std::fs::create_dir_all(&path).unwrap();

    // A two-event append that died after the first event was written.
    let first = serde_json::to_string(&event("s1", 1)).unwrap();
    let second = serde_json::to_string(&event("s1", 2)).unwrap();
    let torn = format!("[{},{}", first, &second[..second.len() / 2]);
    std::fs::write(log_file(&store, "s1"), torn).unwrap();

    assert!(store.load_events("s1").await.unwrap().is_empty());

    store.append_events("s1", &events("s1", 2), 0).await.unwrap();
    let loaded = store.load_events("s1").await.unwrap();
    assert_eq!(loaded.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_non_finite_event_is_rejected_before_writing() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 1), 0).await.unwrap();

    let bad = ResearchEvent::new(
        "s1",
        2,
        TimestampUtc::now(),
        EventPayload::WorkerCompleted {
            worker_id: "w1".into(),
            output: "out".into(),
            facts: vec![Fact {
                content: "fact".into(),
                confidence: f64::NAN,
                source_url: String::new(),
            }],
            sources: vec![],
            cost: CostBreakdown::default(),
        },
    );
    let err = store.append_events("s1", &[bad], 1).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidAppend { .. }));

    // The log is untouched and still accepts the next version.
    let content = std::fs::read_to_string(log_file(&store, "s1")).unwrap();
    assert_eq!(content.lines().count(), 1);
    store.append_events("s1", &[event("s1", 2)], 1).await.unwrap();
    assert_eq!(store.load_events("s1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_append_waiting_on_lock_does_not_block_runtime() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("s1", &events("s1", 1), 0).await.unwrap();

    // Another process holding the log.
    let holder = File::open(log_file(&store, "s1")).unwrap();
    holder.lock_exclusive().unwrap();

    let writer = store.clone();
    let append =
        tokio::spawn(async move { writer.append_events("s1", &[event("s1", 2)], 1).await });

    // The single-threaded test runtime still makes progress.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!append.is_finished());

    FileExt::unlock(&holder).unwrap();
    append.await.unwrap().unwrap();
    assert_eq!(store.load_events("s1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_aggregate_ids_are_rejected() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());

    for id in ["", ".", "..", "../escape", "a/b", "a\\b", "x..y"] {
        let err = store.load_events(id).await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidAggregateId { .. }),
            "{:?} accepted",
            id
        );
    }
    assert!(store.aggregate_dir("session-42_ok").is_ok());
}

#[tokio::test]
async fn test_snapshot_written_via_rename() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    let snapshot = StoredSnapshot {
        aggregate_id: "s1".into(),
        version: 7,
        state: ResearchState::default(),
        snapshot_at: TimestampUtc::now(),
    };
    store.save_snapshot("s1", &snapshot).await.unwrap();

    let agg_dir = store.aggregate_dir("s1").unwrap();
    assert!(agg_dir.join(SNAPSHOT_FILE).is_file());
    assert!(!agg_dir.join("snapshot.json.tmp").exists());
    assert_eq!(store.load_snapshot("s1").await.unwrap(), Some(snapshot));
}

#[tokio::test]
async fn test_unreadable_snapshot_is_ignored() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    let agg_dir = store.aggregate_dir("s1").unwrap();
    std::fs::create_dir_all(&agg_dir).unwrap();
    std::fs::write(agg_dir.join(SNAPSHOT_FILE), "{ truncated").unwrap();

    assert!(store.load_snapshot("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_snapshot_of_other_aggregate_on_disk_is_ignored() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    let foreign = StoredSnapshot {
        aggregate_id: "s2".into(),
        version: 1,
        state: ResearchState::default(),
        snapshot_at: TimestampUtc::now(),
    };
    let agg_dir = store.aggregate_dir("s1").unwrap();
    std::fs::create_dir_all(&agg_dir).unwrap();
    std::fs::write(
        agg_dir.join(SNAPSHOT_FILE),
        serde_json::to_string(&foreign).unwrap(),
    )
    .unwrap();

    assert!(store.load_snapshot("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_ignores_directories_without_log() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path());
    store.append_events("b", &events("b", 1), 0).await.unwrap();
    store.append_events("a", &events("a", 1), 0).await.unwrap();
    std::fs::create_dir_all(dir.path().join("empty").join("logs")).unwrap();
    std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

    assert_eq!(
        store.list_aggregate_ids().await.unwrap(),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test]
async fn test_list_on_missing_root_is_empty() {
    let dir = tempdir().unwrap();
    let store = FileEventStore::new(dir.path().join("not-created"));
    assert!(store.list_aggregate_ids().await.unwrap().is_empty());
}
