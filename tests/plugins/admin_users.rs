use docvault::core::backup;
use docvault::core::config::StoreConfig;
use docvault::core::docstore::DocumentStore;
use docvault::core::events;
use docvault::core::integrity::{
    SchemaKind, ValidatedDocument, check, default_value, recover_value, validate_and_recover,
};
use docvault::plugins::admin_users::{
    AdminUsersDb, DEFAULT_ADMIN_PASSWORD, DEFAULT_KEY, hash_password, uses_default_credentials,
    verify_password,
};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn valid_admins() -> serde_json::Value {
    json!({
        "users": [{
            "id": "u-100",
            "username": "editor",
            "email": "editor@corp.example",
            "passwordHash": hash_password("correct horse"),
            "role": "editor",
            "isActive": true,
            "permissions": ["products", "inquiries"],
            "createdAt": "2024-03-01T09:00:00.000Z",
            "updatedAt": "2024-03-02T09:00:00.000Z",
            "lastLoginAt": "2024-03-05T10:00:00.000Z"
        }],
        "metadata": {"version": "1.0", "lastUpdated": "2024-03-02T09:00:00.000Z"}
    })
}

#[test]
fn test_recovery_is_deterministic_across_failure_modes() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());

    // missing
    let missing = validate_and_recover::<AdminUsersDb>(&store, "missing").unwrap();
    // not json
    fs::write(store.path_for("garbled").unwrap(), "not json").unwrap();
    let garbled = validate_and_recover::<AdminUsersDb>(&store, "garbled").unwrap();
    // zero accounts
    fs::write(store.path_for("empty").unwrap(), r#"{"users": []}"#).unwrap();
    let empty = validate_and_recover::<AdminUsersDb>(&store, "empty").unwrap();

    assert_eq!(missing, garbled);
    assert_eq!(garbled, empty);
    assert_eq!(missing, AdminUsersDb::default_dataset());

    let on_disk: Vec<Vec<u8>> = ["missing", "garbled", "empty"]
        .iter()
        .map(|k| fs::read(store.path_for(k).unwrap()).unwrap())
        .collect();
    assert_eq!(on_disk[0], on_disk[1]);
    assert_eq!(on_disk[1], on_disk[2]);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&on_disk[0]).unwrap(),
        default_value(SchemaKind::AdminUsers).unwrap()
    );
}

#[test]
fn test_recovery_on_valid_document_is_idempotent_and_silent() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());
    let path = store.path_for(DEFAULT_KEY).unwrap();
    fs::write(&path, serde_json::to_vec_pretty(&valid_admins()).unwrap()).unwrap();
    let bytes_before = fs::read(&path).unwrap();

    let first = validate_and_recover::<AdminUsersDb>(&store, DEFAULT_KEY).unwrap();
    let second = validate_and_recover::<AdminUsersDb>(&store, DEFAULT_KEY).unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(fs::read(&path).unwrap(), bytes_before);
    assert!(backup::list(&path).unwrap().is_empty());
    assert!(events::read_last(tmp.path(), 10).unwrap().is_empty());
    assert_eq!(first.users[0].extra["lastLoginAt"], "2024-03-05T10:00:00.000Z");
}

#[test]
fn test_reset_is_observable() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());
    let path = store.path_for(DEFAULT_KEY).unwrap();
    fs::write(&path, r#"{"users": [{"id": 7}], "metadata": {}}"#).unwrap();

    let report = check(&store, DEFAULT_KEY, SchemaKind::AdminUsers).unwrap();
    assert!(!report.verdict.is_valid());
    // check never writes
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        r#"{"users": [{"id": 7}], "metadata": {}}"#
    );

    let value = recover_value(&store, DEFAULT_KEY, SchemaKind::AdminUsers).unwrap();
    assert_eq!(value["users"][0]["username"], "admin");

    let events = events::read_last(tmp.path(), 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op, "recovery.reset");
    assert_eq!(events[0].detail["kind"], "admin-users");
    assert!(events[0].detail["reason"].as_str().unwrap().starts_with("shape"));

    // The corrupt document was backed up before being replaced.
    let snapshots = backup::list(&path).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        fs::read_to_string(&snapshots[0].path).unwrap(),
        r#"{"users": [{"id": 7}], "metadata": {}}"#
    );
}

#[test]
fn test_default_credentials_are_flagged_until_rotated() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());

    let db = validate_and_recover::<AdminUsersDb>(&store, DEFAULT_KEY).unwrap();
    assert!(uses_default_credentials(&db));
    assert!(verify_password(&db.users[0], DEFAULT_ADMIN_PASSWORD));

    let rotated = store
        .update(DEFAULT_KEY, db, |db| {
            db.users[0].password_hash = hash_password("a much better secret");
        })
        .unwrap();
    assert!(!uses_default_credentials(&rotated));

    let reloaded = validate_and_recover::<AdminUsersDb>(&store, DEFAULT_KEY).unwrap();
    assert_eq!(reloaded, rotated);
}

#[test]
fn test_inactive_default_account_is_not_flagged() {
    let mut db = AdminUsersDb::default_dataset();
    db.users[0].is_active = false;
    assert!(!uses_default_credentials(&db));
}
