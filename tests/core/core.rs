use docvault::core::backup;
use docvault::core::config::StoreConfig;
use docvault::core::docstore::DocumentStore;
use docvault::core::error::DocvaultError;
use docvault::core::events;
use docvault::core::lock::{LockInfo, lock_path_for};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn fast_config() -> StoreConfig {
    StoreConfig {
        lock_timeout_ms: 10_000,
        lock_retry_ms: 2,
        ..StoreConfig::default()
    }
}

fn store_at(dir: &Path, config: StoreConfig) -> Arc<DocumentStore> {
    Arc::new(DocumentStore::with_config(dir, config))
}

#[test]
fn test_concurrent_writers_leave_exactly_one_complete_value() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path(), fast_config());

    let payload = |writer: usize| {
        json!({
            "writer": writer,
            "rows": (0..2_000).map(|i| format!("w{}-row{}", writer, i)).collect::<Vec<_>>()
        })
    };

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let store = Arc::clone(&store);
            let value = payload(w);
            thread::spawn(move || store.write("x", &value).unwrap())
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    let raw = fs::read(store.path_for("x").unwrap()).unwrap();
    let stored: Value = serde_json::from_slice(&raw).expect("document must parse");
    let writer = stored["writer"].as_u64().unwrap() as usize;
    assert_eq!(stored, payload(writer));
    assert!(!lock_path_for(&store.path_for("x").unwrap()).exists());
}

#[test]
fn test_updates_never_interleave() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path(), fast_config());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let store = Arc::clone(&store);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                for _ in 0..10 {
                    store
                        .update("counter", json!({"n": 0}), |doc| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            let n = doc["n"].as_u64().unwrap_or(0);
                            doc["n"] = json!(n + 1);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(store.read_value("counter"), Some(json!({"n": 60})));
}

#[test]
fn test_held_lock_times_out_second_writer() {
    let tmp = tempdir().unwrap();
    let store = store_at(
        tmp.path(),
        StoreConfig {
            lock_timeout_ms: 200,
            lock_retry_ms: 20,
            ..StoreConfig::default()
        },
    );
    let held = store.lock_document("x").unwrap();

    let contender = Arc::clone(&store);
    let started = Instant::now();
    let result = thread::spawn(move || contender.write("x", &json!(1)))
        .join()
        .unwrap();
    let elapsed = started.elapsed();

    match result {
        Err(DocvaultError::LockTimeout { waited_ms, .. }) => assert!(waited_ms >= 200),
        other => panic!("expected LockTimeout, got {:?}", other),
    }
    assert!(elapsed < Duration::from_millis(200 + 1_000), "took {:?}", elapsed);
    drop(held);
    store.write("x", &json!(1)).unwrap();
}

#[test]
fn test_backup_retention_keeps_most_recent() {
    let tmp = tempdir().unwrap();
    let store = store_at(
        tmp.path(),
        StoreConfig {
            max_backups: 5,
            ..fast_config()
        },
    );

    for i in 1..=8 {
        store.write("members", &json!({"version": i})).unwrap();
    }

    let snapshots = backup::list(&store.path_for("members").unwrap()).unwrap();
    assert_eq!(snapshots.len(), 5);
    let versions: Vec<u64> = snapshots
        .iter()
        .map(|s| {
            let v: Value = serde_json::from_slice(&fs::read(&s.path).unwrap()).unwrap();
            v["version"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(versions, vec![3, 4, 5, 6, 7]);
}

#[test]
fn test_reader_never_sees_torn_document() {
    let tmp = tempdir().unwrap();
    let store = store_at(
        tmp.path(),
        StoreConfig {
            backups_enabled: false,
            ..fast_config()
        },
    );
    store.write("x", &json!({"a": 1})).unwrap();
    let path = store.path_for("x").unwrap();

    let writer_store = Arc::clone(&store);
    let writer = thread::spawn(move || {
        for i in 0..200 {
            let a = if i % 2 == 0 { 2 } else { 1 };
            writer_store.write("x", &json!({"a": a})).unwrap();
        }
    });

    let reader = thread::spawn(move || {
        for _ in 0..500 {
            let raw = fs::read(&path).expect("document always present");
            let v: Value = serde_json::from_slice(&raw).expect("never a parse error");
            assert!(v == json!({"a": 1}) || v == json!({"a": 2}), "unexpected {}", v);
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn test_stale_sentinel_is_broken_and_audited() {
    let tmp = tempdir().unwrap();
    let store = store_at(
        tmp.path(),
        StoreConfig {
            lock_timeout_ms: 50,
            lock_retry_ms: 10,
            stale_lock_ms: 100,
            ..StoreConfig::default()
        },
    );
    let path = store.path_for("approvals").unwrap();
    let crashed = LockInfo {
        owner: "01CRASHEDWRITER".to_string(),
        pid: 4_000_000,
        acquired_ms: 1,
        heartbeat_ms: 1,
    };
    fs::write(lock_path_for(&path), serde_json::to_vec(&crashed).unwrap()).unwrap();

    store.write("approvals", &json!([])).unwrap();

    let events = events::read_last(tmp.path(), 10).unwrap();
    assert!(events.iter().any(|e| e.op == "lock.break_stale"));
    assert!(!lock_path_for(&path).exists());
}

#[test]
fn test_orphan_sentinel_blocks_when_breaking_disabled() {
    let tmp = tempdir().unwrap();
    let store = store_at(
        tmp.path(),
        StoreConfig {
            lock_timeout_ms: 100,
            lock_retry_ms: 10,
            stale_lock_ms: 0,
            ..StoreConfig::default()
        },
    );
    let path = store.path_for("approvals").unwrap();
    fs::write(lock_path_for(&path), b"").unwrap();

    for _ in 0..2 {
        assert!(store.write("approvals", &json!([])).unwrap_err().is_retryable());
    }
    assert!(store.locks().force_unlock(&path).unwrap());
    store.write("approvals", &json!([])).unwrap();
}

#[test]
fn test_restore_round_trips_through_write_path() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path(), fast_config());
    store.write("notices", &json!(["v1"])).unwrap();
    store.write("notices", &json!(["v2"])).unwrap();

    let path = store.path_for("notices").unwrap();
    let first = backup::list(&path).unwrap()[0].timestamp_ms;
    backup::restore(&store, "notices", first).unwrap();

    assert_eq!(store.read_value("notices"), Some(json!(["v1"])));
    // The replaced "v2" state was itself snapshotted.
    assert_eq!(backup::list(&path).unwrap().len(), 2);
    assert!(matches!(
        backup::restore(&store, "notices", 42),
        Err(DocvaultError::NotFound(_))
    ));
}

#[test]
fn test_sweep_snapshots_every_document() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path(), fast_config());
    store.write("members", &json!({"members": []})).unwrap();
    store.write("intranet/projects", &json!([])).unwrap();

    let record = backup::sweep(&store).unwrap();
    assert_eq!(record.documents, vec!["intranet/projects", "members"]);
    assert_eq!(record.runs, 1);
    assert_eq!(backup::sweep(&store).unwrap().runs, 2);
    assert_eq!(backup::last_sweep(&store).unwrap().runs, 2);

    for key in ["members", "intranet/projects"] {
        assert_eq!(backup::list(&store.path_for(key).unwrap()).unwrap().len(), 2);
    }
}

#[test]
fn test_mutex_table_serializes_in_process_callers() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path(), fast_config());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            thread::spawn(move || {
                store
                    .with_mutex("backup-schedule", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
