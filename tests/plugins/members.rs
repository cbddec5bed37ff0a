use docvault::core::config::StoreConfig;
use docvault::core::docstore::DocumentStore;
use docvault::core::integrity::{SchemaKind, ValidatedDocument, check, validate_and_recover};
use docvault::plugins::members::{DEFAULT_KEY, Member, MembersDb};
use serde_json::{Map, json};
use std::fs;
use tempfile::tempdir;

fn member(id: &str, email: &str) -> Member {
    Member {
        id: id.to_string(),
        email: email.to_string(),
        name: format!("Member {}", id),
        is_active: true,
        created_at: "2024-06-01T00:00:00.000Z".to_string(),
        extra: Map::new(),
    }
}

#[test]
fn test_empty_member_list_is_not_reset() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());
    let path = store.path_for(DEFAULT_KEY).unwrap();
    fs::write(&path, r#"{"members": [], "metadata": {"version": "3"}}"#).unwrap();

    let db = validate_and_recover::<MembersDb>(&store, DEFAULT_KEY).unwrap();
    assert!(db.members.is_empty());
    assert_eq!(db.metadata.version.as_deref(), Some("3"));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        r#"{"members": [], "metadata": {"version": "3"}}"#
    );
}

#[test]
fn test_missing_metadata_triggers_reset() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());
    fs::write(
        store.path_for(DEFAULT_KEY).unwrap(),
        r#"{"members": [{"id": "m1"}]}"#,
    )
    .unwrap();

    let report = check(&store, DEFAULT_KEY, SchemaKind::Members).unwrap();
    assert!(!report.verdict.is_valid());

    let db = validate_and_recover::<MembersDb>(&store, DEFAULT_KEY).unwrap();
    assert_eq!(db, MembersDb::default_dataset());
    assert!(check(&store, DEFAULT_KEY, SchemaKind::Members).unwrap().verdict.is_valid());
}

#[test]
fn test_signup_flow_through_update() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());

    let db = validate_and_recover::<MembersDb>(&store, DEFAULT_KEY).unwrap();
    let db = store
        .update(DEFAULT_KEY, db, |db| db.members.push(member("m1", "kim@corp.example")))
        .unwrap();
    let db = store
        .update(DEFAULT_KEY, db, |db| db.members.push(member("m2", "lee@corp.example")))
        .unwrap();
    assert_eq!(db.members.len(), 2);

    let reloaded = validate_and_recover::<MembersDb>(&store, DEFAULT_KEY).unwrap();
    assert_eq!(reloaded.find_by_email("LEE@corp.example").unwrap().id, "m2");
}

#[test]
fn test_foreign_fields_survive_typed_round_trip() {
    let tmp = tempdir().unwrap();
    let store = DocumentStore::with_config(tmp.path(), StoreConfig::default());
    let raw = json!({
        "members": [{
            "id": "m1", "email": "a@b.c", "name": "A", "isActive": false,
            "createdAt": "t", "approvalLine": ["lead", "director"]
        }],
        "metadata": {"lastUpdated": "t"},
        "pendingInvites": 3
    });
    store.write(DEFAULT_KEY, &raw).unwrap();

    let db = validate_and_recover::<MembersDb>(&store, DEFAULT_KEY).unwrap();
    store.write(DEFAULT_KEY, &db).unwrap();
    assert_eq!(store.read_value(DEFAULT_KEY), Some(raw));
}
