//! Store requests used by the sync pipeline.

use crate::change::{ChangeKind, ChangeRecorder};
use crate::entity::{Entity, EntityKind, Library};
use crate::error::{StoreError, StoreResult};
use crate::transaction::{StoreRequest, Transaction};
use crate::types::LibraryId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Marks a collection as the most recently used destination.
///
/// A missing collection is not an error: the touch is best-effort
/// bookkeeping that must never block the write it accompanies.
#[derive(Debug, Clone)]
pub struct UpdateCollectionLastUsed {
    /// Library of the collection.
    pub library_id: LibraryId,
    /// Collection key.
    pub key: String,
    /// Timestamp to record.
    pub timestamp: DateTime<Utc>,
}

impl StoreRequest for UpdateCollectionLastUsed {
    type Output = ();

    fn process(self, txn: &mut Transaction) -> StoreResult<()> {
        match txn.entity(self.library_id, &self.key) {
            Some(mut collection) if collection.kind == EntityKind::Collection => {
                collection.last_used = Some(self.timestamp);
                txn.put_entity(collection);
            }
            _ => debug!(key = %self.key, library = %self.library_id, "last-used collection not found"),
        }
        Ok(())
    }
}

/// Inserts a locally created entity and records its creation markers.
#[derive(Debug, Clone)]
pub struct CreateEntity {
    /// The new entity. Existing markers on it are replaced.
    pub entity: Entity,
}

impl StoreRequest for CreateEntity {
    type Output = Entity;

    fn process(self, txn: &mut Transaction) -> StoreResult<Entity> {
        let mut entity = self.entity;
        txn.library(entity.library_id)?;
        if txn.entity(entity.library_id, &entity.key).is_some() {
            return Err(StoreError::AlreadyExists {
                library_id: entity.library_id,
                key: entity.key,
            });
        }

        let mut kinds = vec![ChangeKind::Created, ChangeKind::Fields];
        if !entity.tags.is_empty() {
            kinds.push(ChangeKind::Tags);
        }
        if !entity.collection_keys.is_empty() {
            kinds.push(ChangeKind::Collections);
        }
        if entity.parent_key.is_some() {
            kinds.push(ChangeKind::Parent);
        }
        if entity.trashed {
            kinds.push(ChangeKind::Trash);
        }

        entity.changes.clear();
        entity.version = 0;
        txn.record_changes(&mut entity, &kinds);
        txn.put_entity(entity.clone());
        Ok(entity)
    }
}

/// Applies an edit to an existing entity and records what changed.
pub struct ModifyEntity<F> {
    /// Library of the entity.
    pub library_id: LibraryId,
    /// Entity key.
    pub key: String,
    /// The edit to apply.
    pub edit: F,
}

impl<F> ModifyEntity<F>
where
    F: FnOnce(&mut Entity),
{
    /// Creates a modify request.
    pub fn new(library_id: LibraryId, key: impl Into<String>, edit: F) -> Self {
        Self {
            library_id,
            key: key.into(),
            edit,
        }
    }
}

impl<F> StoreRequest for ModifyEntity<F>
where
    F: FnOnce(&mut Entity),
{
    /// Identifiers of the markers recorded by the edit.
    type Output = Vec<Uuid>;

    fn process(self, txn: &mut Transaction) -> StoreResult<Vec<Uuid>> {
        let before = txn.require_entity(self.library_id, &self.key)?;
        if before.deleted {
            return Err(StoreError::invalid_operation(format!(
                "object {} is deleted",
                self.key
            )));
        }
        let mut after = before.clone();
        (self.edit)(&mut after);
        // Identity and sync bookkeeping are not editable.
        after.key = before.key.clone();
        after.library_id = before.library_id;
        after.version = before.version;
        after.changes = before.changes.clone();

        let kinds = ChangeRecorder::diff(&before, &after);
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        after.date_modified = Utc::now();
        let ids = txn.record_changes(&mut after, &kinds);
        txn.put_entity(after);
        Ok(ids)
    }
}

/// Marks an entity as deleted; the local record stays until the server confirms.
#[derive(Debug, Clone)]
pub struct MarkForDeletion {
    /// Library of the entity.
    pub library_id: LibraryId,
    /// Entity key.
    pub key: String,
}

impl StoreRequest for MarkForDeletion {
    type Output = ();

    fn process(self, txn: &mut Transaction) -> StoreResult<()> {
        let mut entity = txn.require_entity(self.library_id, &self.key)?;
        if entity.deleted {
            return Ok(());
        }
        if entity.version == 0 {
            // Never reached the server, nothing to delete remotely.
            txn.remove_entity(self.library_id, &self.key);
            return Ok(());
        }
        entity.deleted = true;
        txn.record_changes(&mut entity, &[ChangeKind::Deleted]);
        txn.put_entity(entity);
        Ok(())
    }
}

/// Records server acceptance of submitted objects.
///
/// For every confirmed key, exactly the markers listed in `change_uuids`
/// are cleared and the entity version advances to `version`, in the same
/// transaction.
#[derive(Debug, Clone)]
pub struct MarkObjectsAsSynced {
    /// Library of the objects.
    pub library_id: LibraryId,
    /// Keys the server accepted (or reported unchanged).
    pub keys: Vec<String>,
    /// Marker identifiers carried by the submission.
    pub change_uuids: BTreeMap<String, Vec<Uuid>>,
    /// Version assigned by the server.
    pub version: u64,
    /// Whether the library baseline also advances to `version`.
    pub update_library_version: bool,
}

impl StoreRequest for MarkObjectsAsSynced {
    /// Number of markers cleared.
    type Output = usize;

    fn process(self, txn: &mut Transaction) -> StoreResult<usize> {
        let mut cleared = 0;
        for key in &self.keys {
            let Some(mut entity) = txn.entity(self.library_id, key) else {
                debug!(%key, library = %self.library_id, "confirmed object no longer exists locally");
                continue;
            };
            if let Some(ids) = self.change_uuids.get(key) {
                cleared += entity.clear_changes(ids);
            }
            entity.version = self.version;
            txn.put_entity(entity);
        }

        if self.update_library_version {
            let mut library = txn.library(self.library_id)?;
            library.version = library.version.max(self.version);
            txn.put_library(library);
        }
        Ok(cleared)
    }
}

/// Removes objects whose deletion the server confirmed.
#[derive(Debug, Clone)]
pub struct RemoveConfirmedDeletions {
    /// Library of the objects.
    pub library_id: LibraryId,
    /// Deleted keys.
    pub keys: Vec<String>,
    /// Library version after the deletion.
    pub version: u64,
}

impl StoreRequest for RemoveConfirmedDeletions {
    type Output = ();

    fn process(self, txn: &mut Transaction) -> StoreResult<()> {
        for key in &self.keys {
            if txn.entity(self.library_id, key).is_some_and(|e| e.deleted) {
                txn.remove_entity(self.library_id, key);
            }
        }
        let mut library = txn.library(self.library_id)?;
        library.version = library.version.max(self.version);
        txn.put_library(library);
        Ok(())
    }
}

/// Sets a library's version baseline.
#[derive(Debug, Clone, Copy)]
pub struct UpdateLibraryVersion {
    /// Library to update.
    pub library_id: LibraryId,
    /// New baseline.
    pub version: u64,
}

impl StoreRequest for UpdateLibraryVersion {
    type Output = ();

    fn process(self, txn: &mut Transaction) -> StoreResult<()> {
        let mut library = txn.library(self.library_id)?;
        library.version = self.version;
        txn.put_library(library);
        Ok(())
    }
}

/// Reads a library.
#[derive(Debug, Clone, Copy)]
pub struct ReadLibrary {
    /// Library to read.
    pub library_id: LibraryId,
}

impl StoreRequest for ReadLibrary {
    type Output = Library;

    fn process(self, txn: &mut Transaction) -> StoreResult<Library> {
        txn.library(self.library_id)
    }
}

/// Reads objects of the given kinds that carry unconfirmed (non-deletion) changes.
#[derive(Debug, Clone)]
pub struct ReadPendingChanges {
    /// Library to scan.
    pub library_id: LibraryId,
    /// Kinds to include.
    pub kinds: Vec<EntityKind>,
}

impl StoreRequest for ReadPendingChanges {
    type Output = Vec<Entity>;

    fn process(self, txn: &mut Transaction) -> StoreResult<Vec<Entity>> {
        Ok(txn
            .entities_in(self.library_id)
            .into_iter()
            .filter(|e| self.kinds.contains(&e.kind) && e.has_changes() && !e.deleted)
            .collect())
    }
}

/// Reads objects of the given kinds that are deleted locally and await confirmation.
#[derive(Debug, Clone)]
pub struct ReadPendingDeletions {
    /// Library to scan.
    pub library_id: LibraryId,
    /// Kinds to include.
    pub kinds: Vec<EntityKind>,
}

impl StoreRequest for ReadPendingDeletions {
    type Output = Vec<Entity>;

    fn process(self, txn: &mut Transaction) -> StoreResult<Vec<Entity>> {
        Ok(txn
            .entities_in(self.library_id)
            .into_iter()
            .filter(|e| self.kinds.contains(&e.kind) && e.deleted)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Tag;
    use crate::store::Store;

    fn store() -> Store {
        let store = Store::open_in_memory();
        store
            .put_library(Library::new(LibraryId::User, "Mine").with_version(10))
            .unwrap();
        store
    }

    fn create(store: &Store, key: &str, kind: EntityKind) -> Entity {
        store
            .perform(|txn| {
                txn.perform(CreateEntity {
                    entity: Entity::new(LibraryId::User, key, kind),
                })
            })
            .unwrap()
    }

    #[test]
    fn create_records_markers() {
        let store = store();
        let mut entity = Entity::new(LibraryId::User, "ITEM2345", EntityKind::Item);
        entity.tags.push(Tag::new("x"));

        let (created, produced) = store
            .perform(|txn| {
                let created = txn.perform(CreateEntity { entity })?;
                Ok((created, txn.produced_changes(LibraryId::User)))
            })
            .unwrap();

        assert!(created.has_change(ChangeKind::Created));
        assert!(created.has_change(ChangeKind::Tags));
        let ids: Vec<Uuid> = created.changes.iter().map(|c| c.identifier).collect();
        assert_eq!(produced.get("ITEM2345"), Some(&ids));
    }

    #[test]
    fn create_duplicate_fails() {
        let store = store();
        create(&store, "ITEM2345", EntityKind::Item);
        let result = store.perform(|txn| {
            txn.perform(CreateEntity {
                entity: Entity::new(LibraryId::User, "ITEM2345", EntityKind::Item),
            })
        });
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn create_in_unknown_library_fails() {
        let store = store();
        let result = store.perform(|txn| {
            txn.perform(CreateEntity {
                entity: Entity::new(LibraryId::Group(2), "ITEM2345", EntityKind::Item),
            })
        });
        assert!(matches!(result, Err(StoreError::LibraryNotFound(_))));
    }

    #[test]
    fn touch_collection_sets_last_used() {
        let store = store();
        create(&store, "COLL2345", EntityKind::Collection);
        let now = Utc::now();
        store
            .perform(|txn| {
                txn.perform(UpdateCollectionLastUsed {
                    library_id: LibraryId::User,
                    key: "COLL2345".into(),
                    timestamp: now,
                })?;
                txn.perform(UpdateCollectionLastUsed {
                    library_id: LibraryId::User,
                    key: "MISSING2".into(),
                    timestamp: now,
                })
            })
            .unwrap();
        assert_eq!(
            store.entity(LibraryId::User, "COLL2345").unwrap().last_used,
            Some(now)
        );
    }

    #[test]
    fn modify_records_only_real_changes() {
        let store = store();
        create(&store, "ITEM2345", EntityKind::Item);

        let ids = store
            .perform(|txn| {
                txn.perform(ModifyEntity::new(LibraryId::User, "ITEM2345", |e: &mut Entity| {
                    e.set_field("title", "New title")
                }))
            })
            .unwrap();
        assert_eq!(ids.len(), 1);

        let ids = store
            .perform(|txn| {
                txn.perform(ModifyEntity::new(LibraryId::User, "ITEM2345", |_: &mut Entity| {}))
            })
            .unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn mark_synced_clears_only_listed_markers() {
        let store = store();
        let created = create(&store, "ITEM2345", EntityKind::Item);
        let submitted: Vec<Uuid> = created.changes.iter().map(|c| c.identifier).collect();

        // A later edit produces a marker the submission did not carry.
        store
            .perform(|txn| {
                txn.perform(ModifyEntity::new(LibraryId::User, "ITEM2345", |e: &mut Entity| {
                    e.trashed = true
                }))
            })
            .unwrap();

        let cleared = store
            .perform(|txn| {
                txn.perform(MarkObjectsAsSynced {
                    library_id: LibraryId::User,
                    keys: vec!["ITEM2345".into()],
                    change_uuids: BTreeMap::from([("ITEM2345".to_string(), submitted)]),
                    version: 11,
                    update_library_version: true,
                })
            })
            .unwrap();

        assert_eq!(cleared, 2);
        let entity = store.entity(LibraryId::User, "ITEM2345").unwrap();
        assert_eq!(entity.version, 11);
        assert_eq!(entity.change_kinds().into_iter().collect::<Vec<_>>(), vec![ChangeKind::Trash]);
        assert_eq!(store.library(LibraryId::User).unwrap().version, 11);
    }

    #[test]
    fn deletion_flow() {
        let store = store();
        create(&store, "COLL2345", EntityKind::Collection);

        // Unsynced objects are removed right away.
        store
            .perform(|txn| {
                txn.perform(MarkForDeletion {
                    library_id: LibraryId::User,
                    key: "COLL2345".into(),
                })
            })
            .unwrap();
        assert!(store.entity(LibraryId::User, "COLL2345").is_none());

        create(&store, "COLL6789", EntityKind::Collection);
        store
            .perform(|txn| {
                let mut e = txn.require_entity(LibraryId::User, "COLL6789")?;
                e.version = 10;
                e.changes.clear();
                txn.put_entity(e);
                txn.perform(MarkForDeletion {
                    library_id: LibraryId::User,
                    key: "COLL6789".into(),
                })
            })
            .unwrap();

        let pending = store
            .perform(|txn| {
                txn.perform(ReadPendingDeletions {
                    library_id: LibraryId::User,
                    kinds: vec![EntityKind::Collection],
                })
            })
            .unwrap();
        assert_eq!(pending.len(), 1);

        store
            .perform(|txn| {
                txn.perform(RemoveConfirmedDeletions {
                    library_id: LibraryId::User,
                    keys: vec!["COLL6789".into()],
                    version: 12,
                })
            })
            .unwrap();
        assert!(store.entity(LibraryId::User, "COLL6789").is_none());
        assert_eq!(store.library(LibraryId::User).unwrap().version, 12);
    }

    #[test]
    fn pending_changes_filters_by_kind() {
        let store = store();
        create(&store, "ITEM2345", EntityKind::Item);
        create(&store, "COLL2345", EntityKind::Collection);

        let pending = store
            .perform(|txn| {
                txn.perform(ReadPendingChanges {
                    library_id: LibraryId::User,
                    kinds: vec![EntityKind::Collection],
                })
            })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "COLL2345");
    }
}
