//! Append-only audit trail for operator-relevant store events.
//!
//! Events land in `<data_dir>/store.events.jsonl`, one JSON object per line.
//! String values in event details are scrubbed of credential-looking text
//! before they touch disk.

use crate::core::error::DocvaultError;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const EVENTS_FILE_NAME: &str = "store.events.jsonl";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub ts_ms: u64,
    pub event_id: String,
    pub op: String,
    pub key: String,
    pub status: String,
    pub detail: Value,
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // bcrypt hashes
        (
            Regex::new(r"\$2[aby]?\$\d{2}\$[./A-Za-z0-9]{53}").unwrap(),
            "[BCRYPT_REDACTED]",
        ),
        // prefixed digests
        (
            Regex::new(r"(?i)sha(1|256|512):[0-9a-f]{32,}").unwrap(),
            "[DIGEST_REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(password|passwd|pwd)['"]?\s*[:=]\s*['"]?[^\s'"]{8,}['"]?"#)
                .unwrap(),
            "[PASSWORD_REDACTED]",
        ),
    ]
});

/// Mask credential material inside free text. Serde error messages echo the
/// offending value, so a `reason` may quote a stored hash.
pub fn scrub_text(input: &str) -> Cow<'_, str> {
    let mut text = Cow::Borrowed(input);
    for (pattern, mask) in SECRET_PATTERNS.iter() {
        if pattern.is_match(&text) {
            text = Cow::Owned(pattern.replace_all(&text, *mask).into_owned());
        }
    }
    text
}

/// Scrub every string leaf of an event detail. Details only carry kind, path,
/// reason and sentinel fields, so keys are kept as-is.
pub fn scrub_detail(detail: Value) -> Value {
    match detail {
        Value::String(text) => {
            let masked = match scrub_text(&text) {
                Cow::Owned(masked) => Some(masked),
                Cow::Borrowed(_) => None,
            };
            Value::String(masked.unwrap_or(text))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(scrub_detail).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, scrub_detail(v)))
                .collect(),
        ),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(data_dir: &Path, enabled: bool) -> Self {
        Self {
            path: enabled.then(|| data_dir.join(EVENTS_FILE_NAME)),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event. Failures are logged and swallowed: the audit trail
    /// must never fail the operation it describes.
    pub fn record(&self, op: &str, key: &str, status: &str, detail: Value) {
        let Some(path) = &self.path else {
            return;
        };
        let event = StoreEvent {
            ts_ms: time::now_epoch_ms(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            key: key.to_string(),
            status: status.to_string(),
            detail: scrub_detail(detail),
        };
        if let Err(err) = append(path, &event) {
            tracing::warn!(op, key, error = %err, "failed to append audit event");
        }
    }
}

fn append(path: &Path, event: &StoreEvent) -> Result<(), DocvaultError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(DocvaultError::IoError)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(DocvaultError::IoError)?;
    let line = serde_json::to_string(event)?;
    writeln!(f, "{}", line).map_err(DocvaultError::IoError)?;
    Ok(())
}

/// Read the last `n` events. Unparseable lines are skipped.
pub fn read_last(data_dir: &Path, n: usize) -> Result<Vec<StoreEvent>, DocvaultError> {
    let path = data_dir.join(EVENTS_FILE_NAME);
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = fs::read_to_string(path).map_err(DocvaultError::IoError)?;
    let events: Vec<StoreEvent> = content
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    let start = events.len().saturating_sub(n);
    Ok(events[start..].to_vec())
}
