//! Bibliographic data model.

use crate::change::{ChangeKind, ChangeMarker};
use crate::types::{EntityRef, LibraryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A library and its version baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Library identifier.
    pub id: LibraryId,
    /// Display name.
    pub name: String,
    /// Last library version confirmed by the server.
    pub version: u64,
    /// Whether the user may write metadata to this library.
    pub can_edit_metadata: bool,
    /// Whether the user may upload files to this library.
    pub can_edit_files: bool,
}

impl Library {
    /// Creates an editable library at version 0.
    pub fn new(id: LibraryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            version: 0,
            can_edit_metadata: true,
            can_edit_files: true,
        }
    }

    /// Sets the version baseline.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Marks the library read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.can_edit_metadata = false;
        self.can_edit_files = false;
        self
    }
}

/// The kind of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A regular item.
    Item,
    /// An attachment item.
    Attachment,
    /// A collection.
    Collection,
    /// A saved search.
    Search,
}

/// A single field value.
///
/// `base_key` is set for type-specific variants of a base field (for
/// example `publicationTitle` based on `publisher`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub key: String,
    /// Base field name, for variant fields.
    pub base_key: Option<String>,
    /// Field value.
    pub value: String,
}

impl Field {
    /// Creates a field without a base key.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_key: None,
            value: value.into(),
        }
    }
}

/// A tag attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Tag type (0 = manual, 1 = automatic).
    pub tag_type: u8,
}

impl Tag {
    /// Creates a manual tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag_type: 0,
        }
    }
}

/// A locally stored object: item, attachment, collection or search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Key, unique within the library.
    pub key: String,
    /// Owning library.
    pub library_id: LibraryId,
    /// Object kind.
    pub kind: EntityKind,
    /// Item type for items and attachments.
    pub item_type: Option<String>,
    /// Last server-confirmed version (0 if never synced).
    pub version: u64,
    /// Field values.
    pub fields: Vec<Field>,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Collections the object belongs to (items) or parent collection (collections).
    pub collection_keys: BTreeSet<String>,
    /// Parent item key (attachments, notes).
    pub parent_key: Option<String>,
    /// Whether the object is in the trash.
    pub trashed: bool,
    /// Whether the object is locally deleted and awaiting confirmation.
    pub deleted: bool,
    /// Creation timestamp.
    pub date_added: DateTime<Utc>,
    /// Last modification timestamp.
    pub date_modified: DateTime<Utc>,
    /// Last time the collection was picked as a destination.
    pub last_used: Option<DateTime<Utc>>,
    /// Pending change markers.
    pub changes: Vec<ChangeMarker>,
}

impl Entity {
    /// Creates an empty, never-synced entity.
    pub fn new(library_id: LibraryId, key: impl Into<String>, kind: EntityKind) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            library_id,
            kind,
            item_type: None,
            version: 0,
            fields: Vec::new(),
            tags: Vec::new(),
            collection_keys: BTreeSet::new(),
            parent_key: None,
            trashed: false,
            deleted: false,
            date_added: now,
            date_modified: now,
            last_used: None,
            changes: Vec::new(),
        }
    }

    /// Returns a reference to this entity.
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.library_id, self.key.clone())
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }

    /// Sets a field value, replacing an existing one.
    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => field.value = value,
            None => self.fields.push(Field::new(key, value)),
        }
    }

    /// Returns true if the entity has unconfirmed changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Returns true if any pending marker is of the given kind.
    #[must_use]
    pub fn has_change(&self, kind: ChangeKind) -> bool {
        self.changes.iter().any(|c| c.kind == kind)
    }

    /// Returns the set of pending change kinds.
    #[must_use]
    pub fn change_kinds(&self) -> BTreeSet<ChangeKind> {
        self.changes.iter().map(|c| c.kind).collect()
    }

    /// Removes the markers with the given identifiers.
    ///
    /// Returns the number of markers removed. Markers recorded after the
    /// identifiers were collected are kept.
    pub fn clear_changes(&mut self, identifiers: &[Uuid]) -> usize {
        let before = self.changes.len();
        self.changes.retain(|c| !identifiers.contains(&c.identifier));
        before - self.changes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_field_replaces_existing() {
        let mut entity = Entity::new(LibraryId::User, "AAAA2222", EntityKind::Item);
        entity.set_field("title", "First");
        entity.set_field("title", "Second");
        assert_eq!(entity.fields.len(), 1);
        assert_eq!(entity.field("title"), Some("Second"));
        assert_eq!(entity.field("url"), None);
    }

    #[test]
    fn clear_changes_keeps_unlisted_markers() {
        let mut entity = Entity::new(LibraryId::User, "AAAA2222", EntityKind::Item);
        let first = ChangeMarker::new(ChangeKind::Fields);
        let second = ChangeMarker::new(ChangeKind::Tags);
        entity.changes = vec![first.clone(), second.clone()];

        assert_eq!(entity.clear_changes(&[first.identifier]), 1);
        assert_eq!(entity.changes, vec![second]);
        assert!(entity.has_change(ChangeKind::Tags));
        assert!(!entity.has_change(ChangeKind::Fields));
    }

    #[test]
    fn library_builders() {
        let lib = Library::new(LibraryId::Group(4), "Lab").with_version(12).read_only();
        assert_eq!(lib.version, 12);
        assert!(!lib.can_edit_metadata);
        assert!(!lib.can_edit_files);
    }
}
