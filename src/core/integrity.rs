//! Schema validation with self-healing recovery.
//!
//! Each tracked document kind is a typed model implementing
//! [`ValidatedDocument`]. Deserialization checks presence and primitive type of
//! required fields; [`ValidatedDocument::check`] adds kind-specific rules such
//! as "at least one admin account". A document that is missing, unparseable or
//! fails either check is replaced by the kind's default dataset, persisted
//! through the normal write path, and reported via `tracing` plus an audit
//! event. Recovery is never surfaced to end users as an error.
//!
//! Cross-document referential integrity is not checked here.

use crate::core::docstore::DocumentStore;
use crate::core::error::DocvaultError;
use crate::plugins::{admin_users::AdminUsersDb, members::MembersDb};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::ErrorKind;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaKind {
    AdminUsers,
    Members,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::AdminUsers => "admin-users",
            SchemaKind::Members => "members",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = DocvaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin-users" | "admin_users" | "admins" => Ok(SchemaKind::AdminUsers),
            "members" => Ok(SchemaKind::Members),
            other => Err(DocvaultError::ValidationError(format!(
                "unknown schema kind '{}' (expected admin-users or members)",
                other
            ))),
        }
    }
}

/// A document kind with a structural contract and a known-good default.
pub trait ValidatedDocument: Serialize + DeserializeOwned {
    const KIND: SchemaKind;

    /// Rules beyond field presence/type. `Err` carries a human-readable reason.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Hand-authored fallback. Must be deterministic.
    fn default_dataset() -> Self;
}

/// Outcome of inspecting a document against its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Missing,
    Unparseable(String),
    Shape(String),
    Rejected(String),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    pub fn reason(&self) -> String {
        match self {
            Verdict::Valid => "valid".to_string(),
            Verdict::Missing => "missing".to_string(),
            Verdict::Unparseable(r) => format!("unparseable: {}", r),
            Verdict::Shape(r) => format!("shape: {}", r),
            Verdict::Rejected(r) => format!("rejected: {}", r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub key: String,
    pub kind: SchemaKind,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Inspect without writing. I/O errors other than "not found" propagate.
pub fn inspect<T: ValidatedDocument>(
    store: &DocumentStore,
    key: &str,
) -> Result<(Verdict, Option<T>), DocvaultError> {
    let path = store.path_for(key)?;
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok((Verdict::Missing, None)),
        Err(err) => return Err(DocvaultError::IoError(err)),
    };
    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(Value::Null) => return Ok((Verdict::Missing, None)),
        Ok(v) => v,
        Err(err) => return Ok((Verdict::Unparseable(err.to_string()), None)),
    };
    let doc: T = match serde_json::from_value(value) {
        Ok(doc) => doc,
        Err(err) => return Ok((Verdict::Shape(err.to_string()), None)),
    };
    match doc.check() {
        Ok(()) => Ok((Verdict::Valid, Some(doc))),
        Err(reason) => Ok((Verdict::Rejected(reason), None)),
    }
}

/// Return the document if valid; otherwise persist and return the default.
///
/// The fast path takes no lock. On an invalid verdict the document is
/// re-inspected under its lock so a concurrent valid write is never clobbered.
pub fn validate_and_recover<T: ValidatedDocument>(
    store: &DocumentStore,
    key: &str,
) -> Result<T, DocvaultError> {
    if let (Verdict::Valid, Some(doc)) = inspect::<T>(store, key)? {
        return Ok(doc);
    }

    let lock = store.lock_document(key)?;
    let verdict = match inspect::<T>(store, key)? {
        (Verdict::Valid, Some(doc)) => return Ok(doc),
        (verdict, _) => verdict,
    };
    let default = T::default_dataset();
    store.write_under_lock(key, &default, &lock)?;
    lock.release();

    let path = store.path_for(key)?;
    tracing::warn!(
        kind = %T::KIND,
        key,
        path = %path.display(),
        reason = %verdict.reason(),
        "document failed validation, reset to default dataset"
    );
    store.audit().record(
        "recovery.reset",
        key,
        "ok",
        serde_json::json!({
            "kind": T::KIND.as_str(),
            "path": path.display().to_string(),
            "reason": verdict.reason(),
        }),
    );
    Ok(default)
}

/// Read-only diagnosis for a kind chosen at runtime.
pub fn check(
    store: &DocumentStore,
    key: &str,
    kind: SchemaKind,
) -> Result<ValidationReport, DocvaultError> {
    let verdict = match kind {
        SchemaKind::AdminUsers => inspect::<AdminUsersDb>(store, key)?.0,
        SchemaKind::Members => inspect::<MembersDb>(store, key)?.0,
    };
    Ok(ValidationReport {
        key: key.to_string(),
        kind,
        verdict,
    })
}

/// `validate_and_recover` for a kind chosen at runtime, as raw JSON.
pub fn recover_value(
    store: &DocumentStore,
    key: &str,
    kind: SchemaKind,
) -> Result<Value, DocvaultError> {
    let value = match kind {
        SchemaKind::AdminUsers => {
            serde_json::to_value(validate_and_recover::<AdminUsersDb>(store, key)?)?
        }
        SchemaKind::Members => serde_json::to_value(validate_and_recover::<MembersDb>(store, key)?)?,
    };
    Ok(value)
}

pub fn default_value(kind: SchemaKind) -> Result<Value, DocvaultError> {
    let value = match kind {
        SchemaKind::AdminUsers => serde_json::to_value(AdminUsersDb::default_dataset())?,
        SchemaKind::Members => serde_json::to_value(MembersDb::default_dataset())?,
    };
    Ok(value)
}
