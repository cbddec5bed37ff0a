//! Tracked document kinds.
//!
//! Each plugin owns one on-disk document shape, its validation rules and its
//! default dataset. Field names are camelCase on disk; unknown fields are kept
//! so that documents written by other tools round-trip unchanged.

pub mod admin_users;
pub mod members;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed timestamp stamped into default datasets so recovery output is
/// identical no matter when it runs.
pub const SEED_TIMESTAMP: &str = "2024-01-01T00:00:00.000Z";

/// The `metadata` container every tracked document carries. Must be a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentMetadata {
    pub fn seed() -> Self {
        Self {
            version: Some("1.0".to_string()),
            last_updated: Some(SEED_TIMESTAMP.to_string()),
            extra: Map::new(),
        }
    }
}
