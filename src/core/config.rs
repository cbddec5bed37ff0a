//! Store configuration.
//!
//! Loaded from `<data_dir>/docvault.toml` when present, then overridden by
//! `DOCVAULT_*` environment variables. A missing config file is not an error.

use crate::core::error::DocvaultError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "docvault.toml";
pub const DATA_DIR_ENV: &str = "DOCVAULT_DATA_DIR";

const LOCK_TIMEOUT_ENV: &str = "DOCVAULT_LOCK_TIMEOUT_MS";
const LOCK_RETRY_ENV: &str = "DOCVAULT_LOCK_RETRY_MS";
const STALE_LOCK_ENV: &str = "DOCVAULT_STALE_LOCK_MS";
const MAX_BACKUPS_ENV: &str = "DOCVAULT_MAX_BACKUPS";
const BACKUPS_ENV: &str = "DOCVAULT_BACKUPS";
const AUDIT_LOG_ENV: &str = "DOCVAULT_AUDIT_LOG";

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LOCK_RETRY_MS: u64 = 100;
pub const DEFAULT_STALE_LOCK_MS: u64 = 30_000;
pub const DEFAULT_MAX_BACKUPS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Wait budget for acquiring a document lock.
    pub lock_timeout_ms: u64,
    /// Poll interval while a sentinel exists.
    pub lock_retry_ms: u64,
    /// Age after which an unrefreshed sentinel may be broken. 0 disables breaking.
    pub stale_lock_ms: u64,
    /// Retention cap per document.
    pub max_backups: usize,
    pub backups_enabled: bool,
    pub audit_log: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_retry_ms: DEFAULT_LOCK_RETRY_MS,
            stale_lock_ms: DEFAULT_STALE_LOCK_MS,
            max_backups: DEFAULT_MAX_BACKUPS,
            backups_enabled: true,
            audit_log: true,
        }
    }
}

impl StoreConfig {
    /// Load `docvault.toml` from the data dir and apply environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self, DocvaultError> {
        let mut config = Self::from_file(&data_dir.join(CONFIG_FILE_NAME))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, DocvaultError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(DocvaultError::IoError)?;
        toml::from_str(&content).map_err(|e| {
            DocvaultError::ConfigError(format!("{}: {}", path.display(), e))
        })
    }

    /// Apply overrides from a variable lookup. Split out so tests need not
    /// mutate the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), DocvaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(LOCK_TIMEOUT_ENV) {
            self.lock_timeout_ms = parse_num(LOCK_TIMEOUT_ENV, &v)?;
        }
        if let Some(v) = lookup(LOCK_RETRY_ENV) {
            self.lock_retry_ms = parse_num(LOCK_RETRY_ENV, &v)?;
        }
        if let Some(v) = lookup(STALE_LOCK_ENV) {
            self.stale_lock_ms = parse_num(STALE_LOCK_ENV, &v)?;
        }
        if let Some(v) = lookup(MAX_BACKUPS_ENV) {
            self.max_backups = parse_num(MAX_BACKUPS_ENV, &v)? as usize;
        }
        if let Some(v) = lookup(BACKUPS_ENV) {
            self.backups_enabled = parse_flag(BACKUPS_ENV, &v)?;
        }
        if let Some(v) = lookup(AUDIT_LOG_ENV) {
            self.audit_log = parse_flag(AUDIT_LOG_ENV, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DocvaultError> {
        if self.lock_retry_ms == 0 {
            return Err(DocvaultError::ConfigError(
                "lock_retry_ms must be greater than 0".to_string(),
            ));
        }
        // A plain write never heartbeats, so the stale window has to outlast
        // the longest wait any writer will accept.
        let floor = self.lock_timeout_ms.max(self.lock_retry_ms);
        if self.stale_lock_ms != 0 && self.stale_lock_ms <= floor {
            return Err(DocvaultError::ConfigError(format!(
                "stale_lock_ms ({}) must exceed lock_timeout_ms ({}) and lock_retry_ms ({}), or be 0",
                self.stale_lock_ms, self.lock_timeout_ms, self.lock_retry_ms
            )));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_lock_ms > 0).then(|| Duration::from_millis(self.stale_lock_ms))
    }
}

/// Resolve the data dir: explicit flag, then `DOCVAULT_DATA_DIR`, then `./data`.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var(DATA_DIR_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn parse_num(name: &str, raw: &str) -> Result<u64, DocvaultError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| DocvaultError::ConfigError(format!("{} must be an integer, got '{}'", name, raw)))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, DocvaultError> {
    match raw.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(DocvaultError::ConfigError(format!(
            "{} must be 0 or 1, got '{}'",
            name, other
        ))),
    }
}
