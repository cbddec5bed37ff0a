//! Document Store: a tiny key-value facade over JSON files.
//!
//! One logical document per `<data_dir>/<key>.json`. Writes follow
//! `lock -> snapshot -> prune -> atomic write -> unlock`, with the unlock
//! guaranteed by the lock handle's `Drop` even when a step fails. A lock
//! timeout leaves no partial effects.
//!
//! Reads do not lock: atomic rename means a reader sees either the previous or
//! the next complete file. Reads that must be consistent with a following
//! write go through [`DocumentStore::update`].

use crate::core::atomic;
use crate::core::backup::{self, BACKUP_DIR_NAME};
use crate::core::config::StoreConfig;
use crate::core::error::DocvaultError;
use crate::core::events::AuditLog;
use crate::core::lock::{LockHandle, LockManager, LockOptions};
use crate::core::mutex::MutexTable;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DOCUMENT_EXT: &str = ".json";

#[derive(Debug, Clone)]
pub struct DocumentStore {
    data_dir: PathBuf,
    config: StoreConfig,
    locks: LockManager,
    audit: AuditLog,
}

impl DocumentStore {
    /// Open a store rooted at `data_dir`, loading `docvault.toml` and env overrides.
    pub fn open(data_dir: &Path) -> Result<Self, DocvaultError> {
        let config = StoreConfig::load(data_dir)?;
        Ok(Self::with_config(data_dir, config))
    }

    pub fn with_config(data_dir: &Path, config: StoreConfig) -> Self {
        let audit = AuditLog::new(data_dir, config.audit_log);
        let locks = LockManager::new(LockOptions::from(&config), audit.clone());
        Self {
            data_dir: data_dir.to_path_buf(),
            config,
            locks,
            audit,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Map a logical key to its file path. Keys are relative, `/`-separated,
    /// and may not escape the data dir.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, DocvaultError> {
        let normalized = normalize_key(key)?;
        let mut path = self.data_dir.clone();
        for segment in normalized.split('/') {
            path.push(segment);
        }
        Ok(append_ext(path))
    }

    /// Parse the document, falling back to `default` when it is missing,
    /// unreadable or unparseable. Never persists the default.
    pub fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                tracing::warn!(key, error = %err, "document unreadable, using fallback");
                default
            }
        }
    }

    /// Raw JSON view of a document, `None` when missing or unparseable.
    pub fn read_value(&self, key: &str) -> Option<Value> {
        self.try_read::<Value>(key).ok().flatten()
    }

    /// `Ok(None)` when the document does not exist; errors for anything else.
    pub fn try_read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DocvaultError> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(DocvaultError::IoError(err)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Persist `value` under the document lock.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), DocvaultError> {
        let path = self.path_for(key)?;
        let lock = self.acquire(key, &path)?;
        let result = self.write_locked(key, &path, value, &lock);
        lock.release();
        result
    }

    /// Read-modify-write under the document lock. A missing or unparseable
    /// document starts from `default`. Fails with `LockLost` and writes
    /// nothing if the lock was broken while `f` ran.
    pub fn update<T, F>(&self, key: &str, default: T, f: F) -> Result<T, DocvaultError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let path = self.path_for(key)?;
        let mut lock = self.acquire(key, &path)?;
        let mut value = match self.try_read::<T>(key) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(DocvaultError::SerializationError(err)) => {
                tracing::warn!(key, error = %err, "unparseable document replaced during update");
                default
            }
            Err(err) => return Err(err),
        };
        f(&mut value);
        if !lock.heartbeat()? {
            return Err(DocvaultError::LockLost {
                key: key.to_string(),
            });
        }
        self.write_locked(key, &path, &value, &lock)?;
        lock.release();
        Ok(value)
    }

    /// Take the document lock without writing, for callers composing their
    /// own critical section (recovery, scheduled sweeps).
    pub fn lock_document(&self, key: &str) -> Result<LockHandle, DocvaultError> {
        let path = self.path_for(key)?;
        self.acquire(key, &path)
    }

    /// Write while the caller already holds `held` for this key.
    pub fn write_under_lock<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        held: &LockHandle,
    ) -> Result<(), DocvaultError> {
        let path = self.path_for(key)?;
        if held.lock_path() != crate::core::lock::lock_path_for(&path) {
            return Err(DocvaultError::ValidationError(format!(
                "lock {} does not cover '{}'",
                held.lock_path().display(),
                key
            )));
        }
        self.write_locked(key, &path, value, held)
    }

    /// Lock wait with the caller's key in the timeout error instead of a path.
    fn acquire(&self, key: &str, path: &Path) -> Result<LockHandle, DocvaultError> {
        self.locks.acquire(path).map_err(|err| match err {
            DocvaultError::LockTimeout { waited_ms, .. } => DocvaultError::LockTimeout {
                key: key.to_string(),
                waited_ms,
            },
            other => other,
        })
    }

    fn write_locked<T: Serialize + ?Sized>(
        &self,
        key: &str,
        path: &Path,
        value: &T,
        held: &LockHandle,
    ) -> Result<(), DocvaultError> {
        // Serialize before touching disk so a bad value leaves no backup behind.
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');

        ensure_held(key, held)?;
        if self.config.backups_enabled {
            backup::snapshot(path)?;
            backup::prune(path, self.config.max_backups);
        }
        ensure_held(key, held)?;
        atomic::write(path, &bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "document written");
        Ok(())
    }

    /// All document keys under the data dir, sorted. Backup dirs, hidden
    /// files and non-JSON files are skipped.
    pub fn list_keys(&self) -> Result<Vec<String>, DocvaultError> {
        let mut keys = Vec::new();
        if self.data_dir.is_dir() {
            collect_keys(&self.data_dir, "", &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    /// In-process serialization on the shared mutex table.
    pub fn with_mutex<F, R>(&self, key: &str, f: F) -> Result<R, DocvaultError>
    where
        F: FnOnce() -> R,
    {
        MutexTable::global().with_mutex(key, f)
    }
}

fn ensure_held(key: &str, held: &LockHandle) -> Result<(), DocvaultError> {
    if held.is_held() {
        Ok(())
    } else {
        tracing::warn!(key, lock = %held.lock_path().display(), "lock lost before write, aborting");
        Err(DocvaultError::LockLost {
            key: key.to_string(),
        })
    }
}

fn normalize_key(key: &str) -> Result<String, DocvaultError> {
    let trimmed = key.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(DocvaultError::InvalidKey(key.to_string()));
    }
    let stripped = trimmed.strip_suffix(DOCUMENT_EXT).unwrap_or(trimmed);
    for segment in stripped.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.starts_with('.') {
            return Err(DocvaultError::InvalidKey(key.to_string()));
        }
    }
    if stripped.split('/').any(|s| s == BACKUP_DIR_NAME) {
        return Err(DocvaultError::InvalidKey(key.to_string()));
    }
    Ok(stripped.to_string())
}

fn append_ext(path: PathBuf) -> PathBuf {
    let mut os = path.into_os_string();
    os.push(DOCUMENT_EXT);
    PathBuf::from(os)
}

fn collect_keys(dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<(), DocvaultError> {
    for entry in fs::read_dir(dir).map_err(DocvaultError::IoError)? {
        let entry = entry.map_err(DocvaultError::IoError)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(DocvaultError::IoError)?;
        if file_type.is_dir() {
            if name == BACKUP_DIR_NAME {
                continue;
            }
            collect_keys(&entry.path(), &format!("{}{}/", prefix, name), keys)?;
        } else if let Some(stem) = name.strip_suffix(DOCUMENT_EXT) {
            keys.push(format!("{}{}", prefix, stem));
        }
    }
    Ok(())
}
