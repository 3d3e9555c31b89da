//! Integration tests for the file-backed store and change markers.

use bibsync_store::{
    ChangeKind, CreateEntity, Entity, EntityKind, Library, LibraryId, MarkObjectsAsSynced,
    ModifyEntity, Store, StoreError,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn book(key: &str, title: &str) -> Entity {
    let mut item = Entity::new(LibraryId::User, key, EntityKind::Item);
    item.item_type = Some("book".into());
    item.set_field("title", title);
    item
}

#[test]
fn test_reopen_restores_entities_and_markers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("library");

    {
        let store = Store::open(&path).unwrap();
        store
            .put_library(Library::new(LibraryId::User, "My Library").with_version(3))
            .unwrap();
        store
            .perform(|txn| txn.perform(CreateEntity { entity: book("ITEM2345", "Dune") }))
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.library(LibraryId::User).unwrap().version, 3);
    let item = store.entity(LibraryId::User, "ITEM2345").unwrap();
    assert_eq!(item.field("title"), Some("Dune"));
    assert!(item.has_change(ChangeKind::Created));
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _store = Store::open(dir.path()).unwrap();
    assert!(matches!(Store::open(dir.path()), Err(StoreError::Locked)));
}

#[test]
fn test_failed_transaction_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.put_library(Library::new(LibraryId::User, "Mine")).unwrap();
    let commits = store.commit_count();

    let result: Result<(), StoreError> = store.perform(|txn| {
        txn.perform(CreateEntity { entity: book("ITEM2345", "Dune") })?;
        Err(StoreError::aborted("file metadata missing"))
    });

    assert!(result.is_err());
    assert!(store.entity(LibraryId::User, "ITEM2345").is_none());
    assert_eq!(store.commit_count(), commits);
}

#[test]
fn test_later_markers_survive_confirmation() {
    let store = Store::open_in_memory();
    store.put_library(Library::new(LibraryId::User, "Mine")).unwrap();
    let created = store
        .perform(|txn| txn.perform(CreateEntity { entity: book("ITEM2345", "Dune") }))
        .unwrap();
    let submitted: Vec<_> = created.changes.iter().map(|m| m.identifier).collect();

    // Edited again while the first write was in flight.
    let later = store
        .perform(|txn| {
            txn.perform(ModifyEntity::new(LibraryId::User, "ITEM2345", |e: &mut Entity| {
                e.set_field("title", "Dune Messiah");
            }))
        })
        .unwrap();
    assert_eq!(later.len(), 1);

    let mut change_uuids = BTreeMap::new();
    change_uuids.insert("ITEM2345".to_string(), submitted);
    let cleared = store
        .perform(|txn| {
            txn.perform(MarkObjectsAsSynced {
                library_id: LibraryId::User,
                keys: vec!["ITEM2345".into()],
                change_uuids,
                version: 8,
                update_library_version: true,
            })
        })
        .unwrap();

    let item = store.entity(LibraryId::User, "ITEM2345").unwrap();
    assert_eq!(cleared, 2);
    assert_eq!(item.version, 8);
    assert_eq!(item.changes.len(), 1);
    assert_eq!(item.changes[0].identifier, later[0]);
    assert_eq!(store.library(LibraryId::User).unwrap().version, 8);
}
