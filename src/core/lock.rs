//! Advisory sentinel-file locks, one per document.
//!
//! A lock is held while `<document>.lock` exists. Acquisition uses
//! `create_new`, which gives single-winner semantics per path across threads
//! and processes. Waiters poll at a fixed interval until the wait budget is
//! spent and then fail with [`DocvaultError::LockTimeout`]; there is no queue,
//! so a waiter can starve under sustained contention.
//!
//! The sentinel body is a [`LockInfo`] record (owner ULID, pid, timestamps).
//! Zero-byte sentinels are still honoured as locked. When a stale window is
//! configured, a sentinel whose heartbeat is older than the window can be
//! broken by a waiter. Breaking is serialized through `<document>.lock.break`
//! so two waiters never both delete and recreate the same lock.

use crate::core::config::StoreConfig;
use crate::core::error::DocvaultError;
use crate::core::events::AuditLog;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use ulid::Ulid;

pub const LOCK_SUFFIX: &str = ".lock";
const BREAK_SUFFIX: &str = ".break";

/// Sentinel payload written by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub owner: String,
    pub pid: u32,
    pub acquired_ms: u64,
    pub heartbeat_ms: u64,
}

/// What an observer finds at a sentinel path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel {
    Owned(LockInfo),
    /// Empty or foreign sentinel; only its mtime is known.
    Anonymous { modified_ms: u64 },
}

impl Sentinel {
    pub fn last_seen_ms(&self) -> u64 {
        match self {
            Sentinel::Owned(info) => info.heartbeat_ms,
            Sentinel::Anonymous { modified_ms } => *modified_ms,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms())
    }

    pub fn is_stale(&self, now_ms: u64, stale_after: Duration) -> bool {
        self.age_ms(now_ms) > stale_after.as_millis() as u64
    }

    fn same_holder(&self, other: &Sentinel) -> bool {
        match (self, other) {
            (Sentinel::Owned(a), Sentinel::Owned(b)) => a.owner == b.owner,
            (
                Sentinel::Anonymous { modified_ms: a },
                Sentinel::Anonymous { modified_ms: b },
            ) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub timeout: Duration,
    pub retry: Duration,
    pub stale_after: Option<Duration>,
}

impl From<&StoreConfig> for LockOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            timeout: config.lock_timeout(),
            retry: config.lock_retry(),
            stale_after: config.stale_after(),
        }
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions::from(&StoreConfig::default())
    }
}

pub fn lock_path_for(document: &Path) -> PathBuf {
    append_suffix(document, LOCK_SUFFIX)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[derive(Debug, Clone)]
pub struct LockManager {
    options: LockOptions,
    audit: AuditLog,
}

impl LockManager {
    pub fn new(options: LockOptions, audit: AuditLog) -> Self {
        Self { options, audit }
    }

    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// Acquire the lock for `document`, waiting up to the configured timeout.
    pub fn acquire(&self, document: &Path) -> Result<LockHandle, DocvaultError> {
        self.acquire_with_timeout(document, self.options.timeout)
    }

    pub fn acquire_with_timeout(
        &self,
        document: &Path,
        timeout: Duration,
    ) -> Result<LockHandle, DocvaultError> {
        let lock_path = lock_path_for(document);
        let started = Instant::now();
        loop {
            if let Some(handle) = try_create(&lock_path)? {
                tracing::debug!(lock = %lock_path.display(), owner = %handle.owner, "lock acquired");
                return Ok(handle);
            }

            if let Some(stale_after) = self.options.stale_after
                && let Some(observed) = read_sentinel(&lock_path)?
                && observed.is_stale(time::now_epoch_ms(), stale_after)
                && self.try_break_stale(&lock_path, &observed, stale_after)?
            {
                continue;
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                tracing::debug!(lock = %lock_path.display(), waited_ms = elapsed.as_millis() as u64, "lock wait timed out");
                return Err(DocvaultError::LockTimeout {
                    key: display_name(document),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            thread::sleep(self.options.retry.min(timeout - elapsed));
        }
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self, document: &Path) -> Result<Option<LockHandle>, DocvaultError> {
        try_create(&lock_path_for(document))
    }

    /// Current sentinel for `document`, if any.
    pub fn inspect(&self, document: &Path) -> Result<Option<Sentinel>, DocvaultError> {
        read_sentinel(&lock_path_for(document))
    }

    /// Operator override: delete the sentinel regardless of owner or age.
    /// Returns whether a sentinel was present.
    pub fn force_unlock(&self, document: &Path) -> Result<bool, DocvaultError> {
        let lock_path = lock_path_for(document);
        let previous = read_sentinel(&lock_path)?;
        match fs::remove_file(&lock_path) {
            Ok(()) => {
                tracing::warn!(lock = %lock_path.display(), "sentinel removed by operator");
                self.audit.record(
                    "lock.force_unlock",
                    &document.display().to_string(),
                    "ok",
                    sentinel_detail(previous.as_ref()),
                );
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DocvaultError::IoError(err)),
        }
    }

    fn try_break_stale(
        &self,
        lock_path: &Path,
        observed: &Sentinel,
        stale_after: Duration,
    ) -> Result<bool, DocvaultError> {
        let break_path = append_suffix(lock_path, BREAK_SUFFIX);
        let _guard = match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&break_path)
        {
            Ok(_) => BreakGuard { path: break_path },
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                clear_abandoned_break(&break_path, stale_after);
                return Ok(false);
            }
            Err(err) => return Err(DocvaultError::IoError(err)),
        };

        // Re-check under the break guard: the holder may have released, or a
        // different waiter may already have broken and re-acquired.
        let now = time::now_epoch_ms();
        match read_sentinel(lock_path)? {
            Some(current) if current.same_holder(observed) && current.is_stale(now, stale_after) => {
                match fs::remove_file(lock_path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
                    Err(err) => return Err(DocvaultError::IoError(err)),
                }
                tracing::warn!(
                    lock = %lock_path.display(),
                    age_ms = current.age_ms(now),
                    "broke stale document lock"
                );
                self.audit.record(
                    "lock.break_stale",
                    &lock_path.display().to_string(),
                    "ok",
                    sentinel_detail(Some(&current)),
                );
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }
}

/// Held lock. Released on drop; release only removes a sentinel that still
/// carries this handle's owner id.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: PathBuf,
    owner: String,
    acquired_ms: u64,
    file: Option<File>,
}

impl LockHandle {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Refresh the heartbeat. Writes through the handle created at acquire
    /// time, so a sentinel that was broken and re-created by another owner is
    /// never overwritten. Returns false once the lock is no longer ours.
    pub fn heartbeat(&mut self) -> Result<bool, DocvaultError> {
        if !self.still_owned() {
            return Ok(false);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        let info = LockInfo {
            owner: self.owner.clone(),
            pid: std::process::id(),
            acquired_ms: self.acquired_ms,
            heartbeat_ms: time::now_epoch_ms(),
        };
        let bytes = serde_json::to_vec(&info)?;
        file.set_len(0).map_err(DocvaultError::IoError)?;
        file.seek(SeekFrom::Start(0)).map_err(DocvaultError::IoError)?;
        file.write_all(&bytes).map_err(DocvaultError::IoError)?;
        Ok(true)
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    /// Whether the sentinel on disk still carries this handle's owner id.
    pub fn is_held(&self) -> bool {
        self.file.is_some() && self.still_owned()
    }

    fn still_owned(&self) -> bool {
        matches!(
            read_sentinel(&self.lock_path),
            Ok(Some(Sentinel::Owned(info))) if info.owner == self.owner
        )
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        drop(file);
        if !self.still_owned() {
            tracing::debug!(lock = %self.lock_path.display(), "sentinel gone or re-owned at release");
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(lock = %self.lock_path.display(), "lock released"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(lock = %self.lock_path.display(), error = %err, "failed to remove sentinel")
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn try_create(lock_path: &Path) -> Result<Option<LockHandle>, DocvaultError> {
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(DocvaultError::IoError)?;
    }
    let mut file = match OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => return Err(DocvaultError::IoError(err)),
    };

    let now = time::now_epoch_ms();
    let info = LockInfo {
        owner: Ulid::new().to_string(),
        pid: std::process::id(),
        acquired_ms: now,
        heartbeat_ms: now,
    };
    let written = serde_json::to_vec(&info)
        .map_err(DocvaultError::from)
        .and_then(|bytes| file.write_all(&bytes).map_err(DocvaultError::IoError));
    if let Err(err) = written {
        drop(file);
        let _ = fs::remove_file(lock_path);
        return Err(err);
    }

    Ok(Some(LockHandle {
        lock_path: lock_path.to_path_buf(),
        owner: info.owner,
        acquired_ms: now,
        file: Some(file),
    }))
}

/// File name only; errors must not expose the data-dir layout.
fn display_name(document: &Path) -> String {
    document
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn read_sentinel(lock_path: &Path) -> Result<Option<Sentinel>, DocvaultError> {
    let bytes = match fs::read(lock_path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(DocvaultError::IoError(err)),
    };
    if let Ok(info) = serde_json::from_slice::<LockInfo>(&bytes) {
        return Ok(Some(Sentinel::Owned(info)));
    }
    let modified_ms = match fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(t) => time::system_time_ms(t),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        // Unknown age counts as fresh.
        Err(_) => time::now_epoch_ms(),
    };
    Ok(Some(Sentinel::Anonymous { modified_ms }))
}

fn clear_abandoned_break(break_path: &Path, stale_after: Duration) {
    let age_ms = fs::metadata(break_path)
        .and_then(|m| m.modified())
        .map(|t| time::now_epoch_ms().saturating_sub(time::system_time_ms(t)))
        .unwrap_or(0);
    if age_ms > stale_after.as_millis() as u64 {
        let _ = fs::remove_file(break_path);
    }
}

fn sentinel_detail(sentinel: Option<&Sentinel>) -> serde_json::Value {
    match sentinel {
        Some(Sentinel::Owned(info)) => serde_json::json!({
            "owner": info.owner,
            "pid": info.pid,
            "acquired_ms": info.acquired_ms,
            "heartbeat_ms": info.heartbeat_ms,
        }),
        Some(Sentinel::Anonymous { modified_ms }) => serde_json::json!({
            "owner": null,
            "modified_ms": modified_ms,
        }),
        None => serde_json::Value::Null,
    }
}

struct BreakGuard {
    path: PathBuf,
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
