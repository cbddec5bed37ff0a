//! Admin console accounts (`admin-users.json`).
//!
//! An admin-users document with zero accounts is treated as invalid: an empty
//! list would lock every operator out of the console. Recovery therefore
//! re-seeds a single `admin` account whose password is
//! [`DEFAULT_ADMIN_PASSWORD`]. Operators must rotate it after any reset;
//! [`uses_default_credentials`] lets callers detect that it is still active.

use crate::core::integrity::{SchemaKind, ValidatedDocument};
use crate::plugins::{DocumentMetadata, SEED_TIMESTAMP};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_KEY: &str = "admin-users";
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "change-me-now";
const HASH_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub permissions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminUsersDb {
    pub users: Vec<AdminUser>,
    pub metadata: DocumentMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdminUsersDb {
    pub fn find_by_username(&self, username: &str) -> Option<&AdminUser> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn active_users(&self) -> impl Iterator<Item = &AdminUser> {
        self.users.iter().filter(|u| u.is_active)
    }
}

impl ValidatedDocument for AdminUsersDb {
    const KIND: SchemaKind = SchemaKind::AdminUsers;

    fn check(&self) -> Result<(), String> {
        if self.users.is_empty() {
            return Err("no admin accounts".to_string());
        }
        Ok(())
    }

    fn default_dataset() -> Self {
        AdminUsersDb {
            users: vec![AdminUser {
                id: "admin-001".to_string(),
                username: DEFAULT_ADMIN_USERNAME.to_string(),
                email: "admin@localhost".to_string(),
                password_hash: hash_password(DEFAULT_ADMIN_PASSWORD),
                role: "super_admin".to_string(),
                is_active: true,
                permissions: vec!["*".to_string()],
                created_at: SEED_TIMESTAMP.to_string(),
                updated_at: SEED_TIMESTAMP.to_string(),
                extra: Map::new(),
            }],
            metadata: DocumentMetadata::seed(),
            extra: Map::new(),
        }
    }
}

/// `sha256:<hex>` digest used for stored admin passwords.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{}{:x}", HASH_PREFIX, hasher.finalize())
}

pub fn verify_password(user: &AdminUser, candidate: &str) -> bool {
    user.password_hash.starts_with(HASH_PREFIX) && user.password_hash == hash_password(candidate)
}

/// True while any active account still accepts the seed password.
pub fn uses_default_credentials(db: &AdminUsersDb) -> bool {
    db.active_users()
        .any(|u| verify_password(u, DEFAULT_ADMIN_PASSWORD))
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "admin-users",
        "version": "1.0",
        "description": "Admin console accounts",
        "required": {
            "users": "array, non-empty",
            "metadata": "object",
            "users[]": {
                "id": "string",
                "username": "string",
                "email": "string",
                "passwordHash": "string",
                "role": "string",
                "isActive": "boolean",
                "permissions": "array<string>",
                "createdAt": "string",
                "updatedAt": "string"
            }
        },
        "storage": ["admin-users.json"]
    })
}
