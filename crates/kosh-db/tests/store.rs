// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end store scenarios: create/reopen, wrong passphrase, rename,
//! deletion tombstones, passthrough preservation, backup recovery.

use kosh_db::{Error, META_DELETED, META_RENAMED_FROM, Record, Result, Store};
use std::path::PathBuf;

fn fixed(pass: &'static str) -> impl FnMut(&str) -> Result<String> {
    move |_: &str| Ok(pass.to_string())
}

/// Returns each scripted answer once, then cancels.
fn scripted(answers: Vec<&'static str>) -> impl FnMut(&str) -> Result<String> {
    let mut answers = answers.into_iter();
    move |_: &str| answers.next().map(str::to_string).ok_or(Error::Canceled)
}

fn tmpdb() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("koshdb");
    (dir, path)
}

fn site_record(password: &str) -> Record {
    let mut r = Record::new("site");
    r.set_field("Username", "u");
    r.set_field("Password", password);
    r
}

#[test]
fn create_add_reopen() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.save().unwrap();
    }
    let store = Store::open(&path, &mut fixed("pw")).unwrap();
    assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
    assert_eq!(store.get("site").unwrap().get("Username"), Some("u"));
    assert_eq!(store.names(), vec!["site"]);
}

#[test]
fn wrong_passphrase_rejected_before_any_record() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.save().unwrap();
    }
    // The first k: line rejects "wrong"; the store re-prompts for that key
    // slot and the user gives up, so nothing is ever decrypted.
    match Store::open(&path, &mut scripted(vec!["wrong"])) {
        Err(Error::Canceled) => {}
        other => panic!("expected Canceled, got {:?}", other.err()),
    }
}

#[test]
fn reprompt_until_the_slot_unlocks() {
    let (_dir, path) = tmpdb();
    drop(Store::open(&path, &mut fixed("pw")).unwrap());
    let store = Store::open(&path, &mut scripted(vec!["wrong", "also wrong", "pw"])).unwrap();
    assert!(store.is_empty());
}

#[test]
fn rename_moves_index_and_chains_history() {
    let (_dir, path) = tmpdb();
    let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
    store.insert(site_record("p")).unwrap();

    store.rename("site", "site2").unwrap();

    assert!(store.get("site").is_none());
    let head = store.get_id("site2").unwrap();
    assert_eq!(store.record(head).name(), "site2");
    assert_eq!(store.record(head).get_meta(META_RENAMED_FROM), Some("site"));
    let older = store.older_of(head).expect("rename links history");
    assert_eq!(store.record(older).name(), "site");
    assert_eq!(store.newer_of(older), Some(head));

    // Round-trips through disk.
    store.save().unwrap();
    drop(store);
    let store = Store::open(&path, &mut fixed("pw")).unwrap();
    assert!(store.get("site").is_none());
    assert_eq!(store.get("site2").unwrap().get("Password"), Some("p"));
}

#[test]
fn deletion_tombstone_survives_reopen() {
    let (_dir, path) = tmpdb();
    let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
    store.insert(site_record("p")).unwrap();
    store.rename("site", "site2").unwrap();
    store.delete("site2").unwrap();

    let check = |store: &Store| {
        assert!(store.get("site2").is_none());
        assert!(store.is_empty());
        let tombstone = store
            .history()
            .find(|r| r.is_deleted())
            .expect("tombstone in history");
        assert_eq!(tombstone.get_meta(META_DELETED), Some("true"));
        assert_eq!(tombstone.iter_fields().count(), 0);
        assert_eq!(tombstone.name(), "site2");
    };
    check(&store);

    store.save().unwrap();
    drop(store);
    let store = Store::open(&path, &mut fixed("pw")).unwrap();
    check(&store);
}

#[test]
fn passthrough_lines_preserved_bytewise_in_order() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.save().unwrap();
    }
    // Future versions of the format may add line kinds this version does not
    // understand; they must ride along untouched.
    let mut contents = std::fs::read(&path).unwrap();
    contents.extend_from_slice(b"# a comment the user typed\n");
    contents.extend_from_slice(b"z:some-future-extension\n");
    std::fs::write(&path, &contents).unwrap();

    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.save().unwrap();
    }
    let rewritten = String::from_utf8(std::fs::read(&path).unwrap()).unwrap();
    let comment_at = rewritten.find("# a comment the user typed\n").unwrap();
    let future_at = rewritten.find("z:some-future-extension\n").unwrap();
    assert!(comment_at < future_at);

    // And the store still reads cleanly with both lines present.
    let store = Store::open(&path, &mut fixed("pw")).unwrap();
    assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
}

#[test]
fn index_and_history_survive_roundtrip() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("one")).unwrap();
        let mut edit = store.get("site").unwrap().clone_for_edit();
        edit.set_field("Password", "two");
        store.insert(edit).unwrap();
        store.save().unwrap();
    }
    let store = Store::open(&path, &mut fixed("pw")).unwrap();
    assert_eq!(store.get("site").unwrap().get("Password"), Some("two"));
    let history: Vec<_> = store.history().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get("Password"), Some("one"));
    let head = store.get_id("site").unwrap();
    let older = store.older_of(head).unwrap();
    assert!(store.record(older).timestamp() <= store.record(head).timestamp());
}

#[test]
fn backup_file_remains_openable() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.save().unwrap();
        let mut edit = store.get("site").unwrap().clone_for_edit();
        edit.set_field("Password", "q");
        store.insert(edit).unwrap();
        store.save().unwrap();
    }
    // A crash between the backup rename and the final rename leaves only
    // `<path>~`; that file is a complete, older database.
    let mut backup = path.clone().into_os_string();
    backup.push("~");
    std::fs::remove_file(&path).unwrap();
    let store = Store::open(PathBuf::from(&backup), &mut fixed("pw")).unwrap();
    assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
}

#[test]
fn second_key_unlocks_with_its_own_passphrase() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("pw")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.add_master_key("other-pass");
        store.save().unwrap();
    }
    // First prompt answers "pw"; the second key slot rejects it and the
    // slot-specific prompt answers "other-pass".
    let store = Store::open(&path, &mut scripted(vec!["pw", "other-pass"])).unwrap();
    assert_eq!(store.master_key_count(), 2);
    assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
}

#[test]
fn change_passphrase_keeps_records() {
    let (_dir, path) = tmpdb();
    {
        let mut store = Store::open(&path, &mut fixed("old")).unwrap();
        store.insert(site_record("p")).unwrap();
        store.change_passphrase(0, "new").unwrap();
        store.save().unwrap();
    }
    assert!(matches!(
        Store::open(&path, &mut scripted(vec!["old"])),
        Err(Error::Canceled)
    ));
    let store = Store::open(&path, &mut fixed("new")).unwrap();
    assert_eq!(store.get("site").unwrap().get("Password"), Some("p"));
}
