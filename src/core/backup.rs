//! Backup rotation for tracked documents.
//!
//! Before a document is overwritten its current bytes are copied to
//! `<dir>/backups/<file_name>.<epoch_ms>.bak`. Suffixes are strictly increasing
//! per document: a colliding timestamp is bumped by one millisecond. Pruning
//! keeps the newest `max_backups` snapshots and never fails the write that
//! triggered it.
//!
//! ```text
//! data/
//! ├── members.json
//! ├── members.json.lock          # only while locked
//! └── backups/
//!     ├── members.json.1700000000000.bak
//!     ├── members.json.1700000004211.bak
//!     └── schedule.json          # last sweep metadata
//! ```

use crate::core::atomic;
use crate::core::docstore::DocumentStore;
use crate::core::error::DocvaultError;
use crate::core::mutex;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const BACKUP_DIR_NAME: &str = "backups";
pub const SNAPSHOT_SUFFIX: &str = ".bak";
pub const SCHEDULE_FILE_NAME: &str = "schedule.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSnapshot {
    pub path: PathBuf,
    pub timestamp_ms: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRecord {
    pub last_run_ms: u64,
    pub documents: Vec<String>,
    #[serde(default)]
    pub runs: u64,
}

pub fn backup_dir_for(document: &Path) -> PathBuf {
    match document.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.join(BACKUP_DIR_NAME),
        _ => PathBuf::from(BACKUP_DIR_NAME),
    }
}

fn file_name_of(document: &Path) -> Result<String, DocvaultError> {
    document
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| DocvaultError::InvalidKey(document.display().to_string()))
}

fn parse_snapshot_ts(file_name: &str, candidate: &str) -> Option<u64> {
    candidate
        .strip_prefix(file_name)?
        .strip_prefix('.')?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse::<u64>()
        .ok()
}

/// Copy the current contents of `document` into its backups dir. No-op when
/// the document does not exist yet.
pub fn snapshot(document: &Path) -> Result<Option<BackupSnapshot>, DocvaultError> {
    let bytes = match fs::read(document) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(DocvaultError::IoError(err)),
    };
    let dir = backup_dir_for(document);
    fs::create_dir_all(&dir).map_err(DocvaultError::IoError)?;

    let file_name = file_name_of(document)?;
    let newest = list(document)?.last().map(|s| s.timestamp_ms).unwrap_or(0);
    let mut ts = time::now_epoch_ms().max(newest.saturating_add(1));
    let mut target = dir.join(format!("{}.{}{}", file_name, ts, SNAPSHOT_SUFFIX));
    while target.exists() {
        if ts == u64::MAX {
            return Err(DocvaultError::ValidationError(format!(
                "no free snapshot timestamp in {}",
                dir.display()
            )));
        }
        ts += 1;
        target = dir.join(format!("{}.{}{}", file_name, ts, SNAPSHOT_SUFFIX));
    }

    atomic::write(&target, &bytes)?;
    tracing::debug!(document = %document.display(), snapshot = %target.display(), "snapshot taken");
    Ok(Some(BackupSnapshot {
        path: target,
        timestamp_ms: ts,
        size_bytes: bytes.len() as u64,
    }))
}

/// All snapshots of `document`, oldest first.
pub fn list(document: &Path) -> Result<Vec<BackupSnapshot>, DocvaultError> {
    let dir = backup_dir_for(document);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(DocvaultError::IoError(err)),
    };
    let file_name = file_name_of(document)?;
    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(DocvaultError::IoError)?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(timestamp_ms) = parse_snapshot_ts(&file_name, &name) else {
            continue;
        };
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        snapshots.push(BackupSnapshot {
            path: entry.path(),
            timestamp_ms,
            size_bytes,
        });
    }
    snapshots.sort_by_key(|s| s.timestamp_ms);
    Ok(snapshots)
}

/// Delete the oldest snapshots until at most `max_backups` remain. Returns
/// how many were removed. Errors are logged, never returned.
pub fn prune(document: &Path, max_backups: usize) -> usize {
    let snapshots = match list(document) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(document = %document.display(), error = %err, "backup listing failed, skipping prune");
            return 0;
        }
    };
    let excess = snapshots.len().saturating_sub(max_backups);
    let mut removed = 0;
    for snapshot in snapshots.iter().take(excess) {
        match fs::remove_file(&snapshot.path) {
            Ok(()) => removed += 1,
            // A racing pruner got there first.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(snapshot = %snapshot.path.display(), error = %err, "failed to prune backup")
            }
        }
    }
    removed
}

/// Write a snapshot's contents back through the normal write path, so the
/// state being replaced is itself snapshotted first.
pub fn restore(
    store: &DocumentStore,
    key: &str,
    timestamp_ms: u64,
) -> Result<BackupSnapshot, DocvaultError> {
    let path = store.path_for(key)?;
    let snapshot = list(&path)?
        .into_iter()
        .find(|s| s.timestamp_ms == timestamp_ms)
        .ok_or_else(|| DocvaultError::NotFound(format!("backup {} of '{}'", timestamp_ms, key)))?;
    let content = fs::read(&snapshot.path).map_err(DocvaultError::IoError)?;
    let value: serde_json::Value = serde_json::from_slice(&content).map_err(|e| {
        DocvaultError::ValidationError(format!(
            "backup {} is not valid JSON: {}",
            snapshot.path.display(),
            e
        ))
    })?;
    store.write(key, &value)?;
    store.audit().record(
        "backup.restore",
        key,
        "ok",
        serde_json::json!({ "timestamp_ms": timestamp_ms }),
    );
    Ok(snapshot)
}

/// Scheduled backup pass: snapshot every document under its own lock and
/// record the run in `backups/schedule.json`.
pub fn sweep(store: &DocumentStore) -> Result<SweepRecord, DocvaultError> {
    let keys = store.list_keys()?;
    let mut documents = Vec::new();
    for key in &keys {
        let path = store.path_for(key)?;
        let _lock = store.lock_document(key)?;
        if snapshot(&path)?.is_some() {
            prune(&path, store.config().max_backups);
            documents.push(key.clone());
        }
    }

    let schedule_path = store.data_dir().join(BACKUP_DIR_NAME).join(SCHEDULE_FILE_NAME);
    // One scheduler per deployment; the metadata only needs in-process exclusion.
    let record = mutex::with_mutex(&schedule_path.display().to_string(), || {
        let previous: SweepRecord = fs::read(&schedule_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();
        let record = SweepRecord {
            last_run_ms: time::now_epoch_ms(),
            documents: documents.clone(),
            runs: previous.runs + 1,
        };
        atomic::write_json(&schedule_path, &record).map(|_| record)
    })??;

    store.audit().record(
        "backup.sweep",
        "*",
        "ok",
        serde_json::json!({ "documents": record.documents.len() }),
    );
    Ok(record)
}

pub fn last_sweep(store: &DocumentStore) -> Option<SweepRecord> {
    let schedule_path = store.data_dir().join(BACKUP_DIR_NAME).join(SCHEDULE_FILE_NAME);
    fs::read(schedule_path)
        .ok()
        .and_then(|b| serde_json::from_slice(&b).ok())
}
