//! Session Record and credential store behaviour across store instances,
//! the way separate `cr-dev` invocations see it.

use comradarr_dev::config::SessionMode;
use comradarr_dev::state::{CredentialEntry, SessionRecord, StateStore};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

fn create_store() -> (TempDir, StateStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = StateStore::new(
        dir.path().join("cr-dev-state.json"),
        dir.path().join(".cr-dev-dbs.json"),
    );
    (dir, store)
}

fn entry(tag: &str) -> CredentialEntry {
    CredentialEntry::new(
        format!("pw_{}", tag),
        format!("key_{}", tag),
        format!("admin_{}", tag),
    )
}

#[test]
fn session_record_survives_a_new_store() {
    let (dir, store) = create_store();
    let record = SessionRecord {
        pid: 4242,
        port: 5199,
        db_name: "comradarr_dev_0badf00d".to_string(),
        db_password: "secret".to_string(),
        mode: SessionMode::Persistent,
        ..SessionRecord::default()
    };
    store.save_session(&record).expect("save");

    let reopened = StateStore::new(
        dir.path().join("cr-dev-state.json"),
        dir.path().join(".cr-dev-dbs.json"),
    );
    assert_eq!(reopened.load_session(), Some(record));

    reopened.remove_session().expect("remove");
    assert!(store.load_session().is_none());
    // Removing twice is fine.
    store.remove_session().expect("second remove");
}

#[test]
fn update_pid_keeps_everything_else() {
    let (_dir, store) = create_store();
    let record = SessionRecord {
        pid: std::process::id(),
        db_name: "mydb".to_string(),
        mode: SessionMode::Reconnect,
        ..SessionRecord::default()
    };
    store.save_session(&record).expect("save");
    store.update_session_pid(31337).expect("update");

    let updated = store.load_session().expect("record present");
    assert_eq!(updated.pid, 31337);
    assert_eq!(updated.db_name, "mydb");
    assert_eq!(updated.mode, SessionMode::Reconnect);
}

#[test]
fn credentials_are_listed_in_name_order() {
    let (_dir, store) = create_store();
    for name in ["zeta", "alpha", "mid"] {
        store.save_credential(name, entry(name)).expect("save");
    }
    assert_eq!(store.list_credential_names(), vec!["alpha", "mid", "zeta"]);

    assert!(store.remove_credential("mid").expect("remove"));
    assert!(!store.remove_credential("mid").expect("remove again"));
    assert_eq!(store.list_credential_names(), vec!["alpha", "zeta"]);
}

#[test]
fn saving_overwrites_an_existing_entry() {
    let (_dir, store) = create_store();
    store.save_credential("mydb", entry("old")).expect("save");
    store.save_credential("mydb", entry("new")).expect("save");

    let loaded = store.peek_credential("mydb").expect("entry");
    assert_eq!(loaded.password, "pw_new");
    assert_eq!(store.list_all_credentials().len(), 1);
}

#[test]
fn corrupt_files_read_as_empty() {
    let (dir, store) = create_store();
    fs::write(dir.path().join("cr-dev-state.json"), "{ not json").expect("write");
    fs::write(dir.path().join(".cr-dev-dbs.json"), "[1, 2, 3]").expect("write");

    assert!(store.load_session().is_none());
    assert!(store.list_all_credentials().is_empty());
    assert!(store.load_credential("anything").is_none());

    // A write replaces the corrupt document.
    store.save_credential("mydb", entry("a")).expect("save");
    assert_eq!(store.list_credential_names(), vec!["mydb"]);
}

#[test]
fn partial_credential_entries_read_with_defaults() {
    let (dir, store) = create_store();
    fs::write(
        dir.path().join(".cr-dev-dbs.json"),
        r#"{
            "keep_me": {"password": "pw", "secret_key": "sk", "admin_password": "ap",
                        "saved_at": "2026-01-02T03:04:05Z"},
            "old": {"password": "legacy", "saved_at": ""},
            "naive": {"password": "p", "saved_at": "2025-06-01T12:00:00.123456"}
        }"#,
    )
    .expect("write");

    assert_eq!(store.list_credential_names(), vec!["keep_me", "naive", "old"]);

    let old = store.peek_credential("old").expect("partial entry");
    assert_eq!(old.password, "legacy");
    assert!(old.secret_key.is_empty());
    assert!(old.last_used.is_none());

    let naive = store.peek_credential("naive").expect("naive timestamp");
    assert_eq!(naive.saved_at.to_rfc3339(), "2025-06-01T12:00:00.123456+00:00");
}

#[test]
fn unreadable_entry_does_not_cost_the_others() {
    let (dir, store) = create_store();
    let path = dir.path().join(".cr-dev-dbs.json");
    fs::write(
        &path,
        r#"{
            "keep_me": {"password": "pw", "secret_key": "sk", "admin_password": "ap"},
            "broken": {"password": 42}
        }"#,
    )
    .expect("write");

    assert_eq!(store.list_credential_names(), vec!["keep_me"]);
    assert!(store.peek_credential("broken").is_none());

    store.save_credential("newdb", entry("new")).expect("save");
    assert_eq!(store.list_credential_names(), vec!["keep_me", "newdb"]);
    assert_eq!(store.load_credential("keep_me").expect("kept").password, "pw");

    // The unreadable entry is left on disk for a newer version to read.
    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(raw["broken"]["password"], 42);
}

#[test]
fn credential_file_is_plain_json_keyed_by_name() {
    let (dir, store) = create_store();
    store.save_credential("mydb", entry("a")).expect("save");

    let raw = fs::read_to_string(dir.path().join(".cr-dev-dbs.json")).expect("read");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(parsed["mydb"]["password"], "pw_a");
    assert_eq!(parsed["mydb"]["secret_key"], "key_a");
    assert!(parsed["mydb"]["saved_at"].is_string());
}

#[test]
fn database_in_use_requires_a_live_process() {
    let (_dir, store) = create_store();
    let mut record = SessionRecord {
        pid: std::process::id(),
        db_name: "mydb".to_string(),
        ..SessionRecord::default()
    };
    store.save_session(&record).expect("save");
    assert!(store.is_database_in_use("mydb").is_some());
    assert!(store.is_database_in_use("other").is_none());

    record.pid = u32::MAX;
    store.save_session(&record).expect("save");
    assert!(store.is_database_in_use("mydb").is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every load stamps `last_used` no earlier than the previous one and
    /// never moves `saved_at`.
    #[test]
    fn loading_refreshes_last_used(loads in 1usize..5) {
        let (_dir, store) = create_store();
        store.save_credential("mydb", entry("a")).expect("save");
        let saved_at = store.peek_credential("mydb").expect("entry").saved_at;

        let mut previous = None;
        for _ in 0..loads {
            let loaded = store.load_credential("mydb").expect("entry");
            let last_used = loaded.last_used.expect("stamped");
            prop_assert!(last_used >= saved_at);
            if let Some(prev) = previous {
                prop_assert!(last_used >= prev);
            }
            prop_assert_eq!(loaded.saved_at, saved_at);
            previous = Some(last_used);
        }
        prop_assert_eq!(store.peek_credential("mydb").expect("entry").last_used, previous);
    }

    /// The map behaves like a set of names under insert and remove.
    #[test]
    fn store_tracks_names_like_a_set(
        ops in prop::collection::vec((any::<bool>(), "[a-z]{1,4}"), 1..20)
    ) {
        let (_dir, store) = create_store();
        let mut expected = std::collections::BTreeSet::new();
        for (insert, name) in ops {
            if insert {
                store.save_credential(&name, entry(&name)).expect("save");
                expected.insert(name);
            } else {
                let removed = store.remove_credential(&name).expect("remove");
                prop_assert_eq!(removed, expected.remove(&name));
            }
        }
        let names: Vec<String> = expected.into_iter().collect();
        prop_assert_eq!(store.list_credential_names(), names);
    }
}
