//! Write transactions.

use crate::change::{ChangeKind, ChangeRecorder};
use crate::entity::{Entity, Library};
use crate::error::{StoreError, StoreResult};
use crate::store::StoreState;
use crate::types::{EntityRef, LibraryId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// A typed unit of work executed inside a transaction.
///
/// Requests compose: a request may perform other requests on the same
/// transaction, and all of them commit or roll back together.
pub trait StoreRequest {
    /// Value produced by the request.
    type Output;

    /// Runs the request against the transaction.
    fn process(self, txn: &mut Transaction) -> StoreResult<Self::Output>;
}

/// An open write transaction.
///
/// Reads see the committed state as of `begin` plus this transaction's own
/// pending writes. Nothing is visible to other readers until the store
/// commits the transaction; if the transaction body fails, every pending
/// write (including change markers) is discarded.
#[derive(Debug)]
pub struct Transaction {
    /// Committed state when the transaction began.
    base: Arc<StoreState>,
    /// Pending entity writes (`None` removes the entity).
    entity_writes: BTreeMap<EntityRef, Option<Entity>>,
    /// Pending library writes.
    library_writes: BTreeMap<LibraryId, Library>,
    /// Reads served from the committed state.
    read_cache: HashMap<EntityRef, Entity>,
    /// Markers produced by this transaction.
    recorder: ChangeRecorder,
    invalidated: bool,
}

impl Transaction {
    pub(crate) fn new(base: Arc<StoreState>) -> Self {
        Self {
            base,
            entity_writes: BTreeMap::new(),
            library_writes: BTreeMap::new(),
            read_cache: HashMap::new(),
            recorder: ChangeRecorder::new(),
            invalidated: false,
        }
    }

    /// Performs a request on this transaction.
    pub fn perform<R: StoreRequest>(&mut self, request: R) -> StoreResult<R::Output> {
        request.process(self)
    }

    /// Returns a library.
    pub fn library(&self, id: LibraryId) -> StoreResult<Library> {
        self.library_writes
            .get(&id)
            .or_else(|| self.base.libraries.get(&id))
            .cloned()
            .ok_or(StoreError::LibraryNotFound(id))
    }

    /// Inserts or replaces a library.
    pub fn put_library(&mut self, library: Library) {
        self.library_writes.insert(library.id, library);
    }

    /// Returns an entity, or `None` if it does not exist.
    pub fn entity(&mut self, library_id: LibraryId, key: &str) -> Option<Entity> {
        let entity_ref = EntityRef::new(library_id, key);
        if let Some(write) = self.entity_writes.get(&entity_ref) {
            return write.clone();
        }
        if let Some(cached) = self.read_cache.get(&entity_ref) {
            return Some(cached.clone());
        }
        let entity = self.base.entities.get(&entity_ref).cloned()?;
        self.read_cache.insert(entity_ref, entity.clone());
        Some(entity)
    }

    /// Returns an entity or a `NotFound` error.
    pub fn require_entity(&mut self, library_id: LibraryId, key: &str) -> StoreResult<Entity> {
        self.entity(library_id, key)
            .ok_or_else(|| StoreError::not_found(library_id, key))
    }

    /// Returns every entity of a library, including pending writes.
    pub fn entities_in(&self, library_id: LibraryId) -> Vec<Entity> {
        let mut merged: BTreeMap<&EntityRef, Option<&Entity>> = self
            .base
            .entities
            .iter()
            .filter(|(r, _)| r.library_id == library_id)
            .map(|(r, e)| (r, Some(e)))
            .collect();
        for (r, write) in &self.entity_writes {
            if r.library_id == library_id {
                merged.insert(r, write.as_ref());
            }
        }
        merged.into_values().flatten().cloned().collect()
    }

    /// Inserts or replaces an entity.
    pub fn put_entity(&mut self, entity: Entity) {
        let entity_ref = entity.entity_ref();
        self.read_cache.remove(&entity_ref);
        self.entity_writes.insert(entity_ref, Some(entity));
    }

    /// Removes an entity.
    pub fn remove_entity(&mut self, library_id: LibraryId, key: &str) {
        let entity_ref = EntityRef::new(library_id, key);
        self.read_cache.remove(&entity_ref);
        self.entity_writes.insert(entity_ref, None);
    }

    /// Attaches change markers to an entity and records them for this transaction.
    pub fn record_changes(&mut self, entity: &mut Entity, kinds: &[ChangeKind]) -> Vec<Uuid> {
        self.recorder.record(entity, kinds)
    }

    /// Returns the marker identifiers produced in one library, keyed by entity key.
    #[must_use]
    pub fn produced_changes(&self, library_id: LibraryId) -> BTreeMap<String, Vec<Uuid>> {
        self.recorder.produced_in(library_id)
    }

    /// Drops all reads cached by this transaction.
    ///
    /// Reads after invalidation are served from pending writes or the
    /// committed state again.
    pub fn invalidate(&mut self) {
        self.read_cache.clear();
        self.invalidated = true;
    }

    /// Returns true if `invalidate` was called.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Returns the number of cached reads.
    #[must_use]
    pub fn cached_reads(&self) -> usize {
        self.read_cache.len()
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.entity_writes.len() + self.library_writes.len()
    }

    /// Applies the pending writes to `state`.
    pub(crate) fn apply_to(self, state: &mut StoreState) {
        for (id, library) in self.library_writes {
            state.libraries.insert(id, library);
        }
        for (entity_ref, write) in self.entity_writes {
            match write {
                Some(entity) => {
                    state.entities.insert(entity_ref, entity);
                }
                None => {
                    state.entities.remove(&entity_ref);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    fn base_state() -> Arc<StoreState> {
        let mut state = StoreState::default();
        state
            .libraries
            .insert(LibraryId::User, Library::new(LibraryId::User, "My Library"));
        let entity = Entity::new(LibraryId::User, "BASE2345", EntityKind::Item);
        state.entities.insert(entity.entity_ref(), entity);
        Arc::new(state)
    }

    #[test]
    fn reads_see_pending_writes() {
        let mut txn = Transaction::new(base_state());
        assert!(txn.entity(LibraryId::User, "NEW23456").is_none());

        txn.put_entity(Entity::new(LibraryId::User, "NEW23456", EntityKind::Item));
        assert!(txn.entity(LibraryId::User, "NEW23456").is_some());

        txn.remove_entity(LibraryId::User, "BASE2345");
        assert!(txn.entity(LibraryId::User, "BASE2345").is_none());
        assert_eq!(txn.entities_in(LibraryId::User).len(), 1);
    }

    #[test]
    fn invalidate_drops_cached_reads() {
        let mut txn = Transaction::new(base_state());
        assert!(txn.entity(LibraryId::User, "BASE2345").is_some());
        assert_eq!(txn.cached_reads(), 1);

        txn.invalidate();
        assert_eq!(txn.cached_reads(), 0);
        assert!(txn.is_invalidated());
    }

    #[test]
    fn missing_library_is_an_error() {
        let txn = Transaction::new(base_state());
        assert!(txn.library(LibraryId::User).is_ok());
        assert!(matches!(
            txn.library(LibraryId::Group(1)),
            Err(StoreError::LibraryNotFound(LibraryId::Group(1)))
        ));
    }
}
