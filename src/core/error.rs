use std::env;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocvaultError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Document busy: lock on '{key}' not acquired after {waited_ms}ms, retry later")]
    LockTimeout { key: String, waited_ms: u64 },
    #[error("Lock on '{key}' was broken by another writer before the write landed, retry later")]
    LockLost { key: String },
    #[error("Invalid document key: {0}")]
    InvalidKey(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Mutex poisoned: {0}")]
    PoisonedMutex(String),
}

impl DocvaultError {
    /// True when the caller should retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocvaultError::LockTimeout { .. } | DocvaultError::LockLost { .. }
        )
    }
}
