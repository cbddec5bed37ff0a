//! Process-local keyed mutexes.
//!
//! Serializes closures per key inside one process without touching the
//! filesystem. Gives no protection across processes: anything that several
//! OS processes may write must go through [`crate::core::lock`] instead.

use crate::core::error::DocvaultError;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Map from key to a lazily created mutex.
#[derive(Default)]
pub struct MutexTable {
    entries: Mutex<FxHashMap<String, Arc<Mutex<()>>>>,
}

impl MutexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table shared by every store in this process.
    pub fn global() -> &'static MutexTable {
        static GLOBAL: OnceLock<MutexTable> = OnceLock::new();
        GLOBAL.get_or_init(MutexTable::new)
    }

    fn entry(&self, key: &str) -> Result<Arc<Mutex<()>>, DocvaultError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DocvaultError::PoisonedMutex("mutex table entries".to_string()))?;
        Ok(entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Run `f` while holding the mutex for `key`. At most one `f` per key runs
    /// at a time in this process.
    pub fn with_mutex<F, R>(&self, key: &str, f: F) -> Result<R, DocvaultError>
    where
        F: FnOnce() -> R,
    {
        let entry = self.entry(key)?;
        let _guard = entry
            .lock()
            .map_err(|_| DocvaultError::PoisonedMutex(key.to_string()))?;
        Ok(f())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `with_mutex` on the process-wide table.
pub fn with_mutex<F, R>(key: &str, f: F) -> Result<R, DocvaultError>
where
    F: FnOnce() -> R,
{
    MutexTable::global().with_mutex(key, f)
}
