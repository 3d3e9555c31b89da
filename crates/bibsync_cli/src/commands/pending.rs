//! Pending command implementation.
//!
//! Lists the change markers awaiting submission, optionally with the write
//! parameters the next sync would send for each entity.

use super::{open_store, CliError};
use bibsync_store::{Entity, LibraryId, Store};
use bibsync_sync_engine::{update_parameters, Parameters};
use serde::Serialize;
use std::path::Path;

/// One entity with pending changes.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    /// Library identifier.
    pub library: String,
    /// Entity key.
    pub key: String,
    /// Entity kind.
    pub kind: String,
    /// Whether the entity awaits deletion.
    pub deleted: bool,
    /// Kinds of the recorded changes.
    pub changes: Vec<String>,
    /// Write parameters, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    library: Option<LibraryId>,
    show_parameters: bool,
    format: &str,
) -> Result<(), CliError> {
    let store = open_store(path)?;
    let entries = pending(&store, library, show_parameters);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries)?,
    }
    Ok(())
}

/// Collects entities with change markers, in library then key order.
pub fn pending(store: &Store, library: Option<LibraryId>, show_parameters: bool) -> Vec<PendingEntry> {
    let mut libraries: Vec<LibraryId> = match library {
        Some(id) => vec![id],
        None => store.libraries().iter().map(|l| l.id).collect(),
    };
    libraries.sort();

    let mut entries = Vec::new();
    for id in libraries {
        let mut entities: Vec<Entity> = store
            .entities(id)
            .into_iter()
            .filter(|e| e.has_changes() || e.deleted)
            .collect();
        entities.sort_by(|a, b| a.key.cmp(&b.key));

        entries.extend(entities.iter().map(|entity| PendingEntry {
            library: id.to_string(),
            key: entity.key.clone(),
            kind: format!("{:?}", entity.kind).to_lowercase(),
            deleted: entity.deleted,
            changes: entity
                .change_kinds()
                .iter()
                .map(|k| format!("{k:?}").to_lowercase())
                .collect(),
            parameters: (show_parameters && !entity.deleted).then(|| update_parameters(entity)),
        }));
    }
    entries
}

fn print_text_output(entries: &[PendingEntry]) -> Result<(), CliError> {
    if entries.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }
    for entry in entries {
        let what = if entry.deleted {
            "deleted".to_string()
        } else {
            entry.changes.join(", ")
        };
        println!("{:<12} {:<10} {:<8} {what}", entry.library, entry.kind, entry.key);
        if let Some(parameters) = &entry.parameters {
            println!("    {}", serde_json::to_string(parameters)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_store::{CreateEntity, EntityKind, Library, MarkForDeletion};

    fn store() -> Store {
        let store = Store::open_in_memory();
        store.put_library(Library::new(LibraryId::User, "Mine")).unwrap();
        store.put_library(Library::new(LibraryId::Group(3), "Lab")).unwrap();
        store
            .perform(|txn| {
                let mut item = Entity::new(LibraryId::User, "ITEM2345", EntityKind::Item);
                item.item_type = Some("book".into());
                item.set_field("title", "Dune");
                txn.perform(CreateEntity { entity: item })?;
                txn.perform(CreateEntity {
                    entity: Entity::new(LibraryId::Group(3), "COLL2345", EntityKind::Collection),
                })
            })
            .unwrap();
        store
    }

    #[test]
    fn lists_every_library_in_order() {
        let entries = pending(&store(), None, false);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["ITEM2345", "COLL2345"]);
        assert!(entries[0].changes.contains(&"created".to_string()));
        assert!(entries[0].parameters.is_none());
    }

    #[test]
    fn filters_by_library_and_shows_parameters() {
        let entries = pending(&store(), Some(LibraryId::User), true);
        assert_eq!(entries.len(), 1);
        let parameters = entries[0].parameters.as_ref().unwrap();
        assert_eq!(parameters.get("title").and_then(|v| v.as_str()), Some("Dune"));
    }

    #[test]
    fn deletions_are_listed() {
        let store = store();
        store
            .perform(|txn| {
                let mut synced = Entity::new(LibraryId::User, "OLDI2345", EntityKind::Item);
                synced.version = 5;
                txn.put_entity(synced);
                txn.perform(MarkForDeletion {
                    library_id: LibraryId::User,
                    key: "OLDI2345".into(),
                })
            })
            .unwrap();
        let entries = pending(&store, Some(LibraryId::User), true);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].key, "OLDI2345");
        assert!(entries[1].deleted);
        assert!(entries[1].parameters.is_none());
        assert!(!entries[0].deleted);
        assert!(entries[0].parameters.is_some());
    }
}
