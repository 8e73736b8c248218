// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn open_temp() -> (tempfile::TempDir, RedbStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = RedbStore::open(&dir.path().join("bridge.redb")).unwrap();
    (dir, store)
}

#[test]
fn get_from_missing_table_is_none() {
    let (_dir, store) = open_temp();
    assert_eq!(store.get("g/s/idMap", "x:1").unwrap(), None);
}

#[test]
fn put_get_round_trip() {
    let (_dir, store) = open_temp();
    store.put("g/s/idMap", "x:1", b"ulid").unwrap();
    assert_eq!(store.get("g/s/idMap", "x:1").unwrap().as_deref(), Some(&b"ulid"[..]));
}

#[test]
fn put_all_commits_every_entry() {
    let (_dir, store) = open_temp();
    store.put_all("g/s/idMap", &[("x:1", b"a"), ("r:A", b"1")]).unwrap();
    assert!(store.get("g/s/idMap", "x:1").unwrap().is_some());
    assert!(store.get("g/s/idMap", "r:A").unwrap().is_some());
}

#[test]
fn scan_is_key_ordered() {
    let (_dir, store) = open_temp();
    store.put("g/s/t", "b", b"2").unwrap();
    store.put("g/s/t", "a", b"1").unwrap();
    let keys: Vec<String> = store.scan("g/s/t").unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn drop_table_and_list() {
    let (_dir, store) = open_temp();
    store.put("g/s/a", "k", b"v").unwrap();
    store.put("g/s/b", "k", b"v").unwrap();
    store.drop_table("g/s/a").unwrap();
    let tables = store.tables().unwrap();
    assert!(!tables.contains(&"g/s/a".to_owned()));
    assert!(tables.contains(&"g/s/b".to_owned()));
}

#[test]
fn remove_is_silent_when_absent() {
    let (_dir, store) = open_temp();
    store.remove("g/s/none", "k").unwrap();
    store.put("g/s/t", "k", b"v").unwrap();
    store.remove("g/s/t", "k").unwrap();
    assert_eq!(store.get("g/s/t", "k").unwrap(), None);
}
