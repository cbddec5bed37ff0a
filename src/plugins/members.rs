//! Registered site members (`members.json`). An empty member list is valid.

use crate::core::integrity::{SchemaKind, ValidatedDocument};
use crate::plugins::DocumentMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_KEY: &str = "members";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembersDb {
    pub members: Vec<Member>,
    pub metadata: DocumentMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MembersDb {
    /// Emails compare case-insensitively.
    pub fn find_by_email(&self, email: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }
}

impl ValidatedDocument for MembersDb {
    const KIND: SchemaKind = SchemaKind::Members;

    fn default_dataset() -> Self {
        MembersDb {
            members: Vec::new(),
            metadata: DocumentMetadata::seed(),
            extra: Map::new(),
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "members",
        "version": "1.0",
        "description": "Registered site members",
        "required": {
            "members": "array",
            "metadata": "object",
            "members[]": {
                "id": "string",
                "email": "string",
                "name": "string",
                "isActive": "boolean",
                "createdAt": "string"
            }
        },
        "storage": ["members.json"]
    })
}
