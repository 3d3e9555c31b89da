//! Syncable object types.

use bibsync_store::EntityKind;
use std::fmt;

/// The object type a sync action operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncObject {
    /// Collections.
    Collection,
    /// Saved searches.
    Search,
    /// Items, including attachments.
    Item,
    /// Library settings.
    Settings,
    /// Trashed items.
    Trash,
}

impl SyncObject {
    /// Returns the API path segment for this object type.
    #[must_use]
    pub fn api_path(&self) -> &'static str {
        match self {
            SyncObject::Collection => "collections",
            SyncObject::Search => "searches",
            SyncObject::Item => "items",
            SyncObject::Settings => "settings",
            SyncObject::Trash => "items/trash",
        }
    }

    /// Returns the query parameter used to address keys in bulk deletions.
    #[must_use]
    pub fn key_parameter(&self) -> &'static str {
        match self {
            SyncObject::Collection => "collectionKey",
            SyncObject::Search => "searchKey",
            SyncObject::Item | SyncObject::Trash => "itemKey",
            SyncObject::Settings => "settingKey",
        }
    }

    /// Returns the stored entity kinds covered by this object type.
    #[must_use]
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            SyncObject::Collection => &[EntityKind::Collection],
            SyncObject::Search => &[EntityKind::Search],
            SyncObject::Item | SyncObject::Trash => &[EntityKind::Item, EntityKind::Attachment],
            SyncObject::Settings => &[],
        }
    }

    /// Returns the object type used to submit an entity kind.
    #[must_use]
    pub fn from_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Collection => SyncObject::Collection,
            EntityKind::Search => SyncObject::Search,
            EntityKind::Item | EntityKind::Attachment => SyncObject::Item,
        }
    }
}

impl fmt::Display for SyncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncObject::Collection => "collection",
            SyncObject::Search => "search",
            SyncObject::Item => "item",
            SyncObject::Settings => "settings",
            SyncObject::Trash => "trash",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_object() {
        for kind in [
            EntityKind::Item,
            EntityKind::Attachment,
            EntityKind::Collection,
            EntityKind::Search,
        ] {
            assert!(SyncObject::from_kind(kind).entity_kinds().contains(&kind));
        }
    }

    #[test]
    fn api_paths() {
        assert_eq!(SyncObject::Item.api_path(), "items");
        assert_eq!(SyncObject::Collection.key_parameter(), "collectionKey");
    }
}
