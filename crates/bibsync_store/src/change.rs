//! Change markers and change recording.
//!
//! Every local mutation of a synced object leaves one or more
//! [`ChangeMarker`]s on the entity. A submission reports the identifiers of
//! the markers it carried, and only those markers are cleared once the
//! server confirms the write. Markers produced after the submission was
//! built therefore survive for the next run.

use crate::entity::Entity;
use crate::types::{EntityRef, LibraryId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// What part of an object changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The object was created locally.
    Created,
    /// One or more field values changed.
    Fields,
    /// The tag set changed.
    Tags,
    /// Collection membership (or parent collection) changed.
    Collections,
    /// The parent item changed.
    Parent,
    /// The trash flag changed.
    Trash,
    /// The object was deleted.
    Deleted,
}

/// One recorded change on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMarker {
    /// Unique marker identifier.
    pub identifier: Uuid,
    /// Kind of change.
    pub kind: ChangeKind,
}

impl ChangeMarker {
    /// Creates a marker with a fresh identifier.
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            kind,
        }
    }
}

/// Records change markers produced inside one transaction.
///
/// The recorder lives as long as its transaction; when the transaction
/// rolls back, both the markers attached to the (discarded) entities and
/// the recorder's bookkeeping disappear together.
#[derive(Debug, Default)]
pub struct ChangeRecorder {
    produced: BTreeMap<EntityRef, Vec<Uuid>>,
}

impl ChangeRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches one marker per kind to `entity` and remembers their identifiers.
    ///
    /// Returns the identifiers of the new markers, in `kinds` order.
    pub fn record(&mut self, entity: &mut Entity, kinds: &[ChangeKind]) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let marker = ChangeMarker::new(*kind);
            ids.push(marker.identifier);
            entity.changes.push(marker);
        }
        if !ids.is_empty() {
            self.produced
                .entry(entity.entity_ref())
                .or_default()
                .extend(ids.iter().copied());
        }
        ids
    }

    /// Computes which change kinds turn `before` into `after`.
    #[must_use]
    pub fn diff(before: &Entity, after: &Entity) -> Vec<ChangeKind> {
        let mut kinds = Vec::new();
        if before.fields != after.fields || before.item_type != after.item_type {
            kinds.push(ChangeKind::Fields);
        }
        if before.tags != after.tags {
            kinds.push(ChangeKind::Tags);
        }
        if before.collection_keys != after.collection_keys {
            kinds.push(ChangeKind::Collections);
        }
        if before.parent_key != after.parent_key {
            kinds.push(ChangeKind::Parent);
        }
        if before.trashed != after.trashed {
            kinds.push(ChangeKind::Trash);
        }
        if !before.deleted && after.deleted {
            kinds.push(ChangeKind::Deleted);
        }
        kinds
    }

    /// Returns the marker identifiers produced so far for one library, keyed by entity key.
    #[must_use]
    pub fn produced_in(&self, library_id: LibraryId) -> BTreeMap<String, Vec<Uuid>> {
        self.produced
            .iter()
            .filter(|(r, _)| r.library_id == library_id)
            .map(|(r, ids)| (r.key.clone(), ids.clone()))
            .collect()
    }

    /// Returns all produced marker identifiers.
    #[must_use]
    pub fn produced(&self) -> &BTreeMap<EntityRef, Vec<Uuid>> {
        &self.produced
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.produced.is_empty()
    }
}
