//! Inspect command implementation.

use super::{open_store, CliError};
use bibsync_store::{Library, Store};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of libraries.
    pub library_count: usize,
    /// Number of stored entities across libraries.
    pub entity_count: usize,
    /// Per-library statistics.
    pub libraries: Vec<LibraryStats>,
}

/// Statistics for a single library.
#[derive(Debug, Serialize)]
pub struct LibraryStats {
    /// Library identifier, e.g. `group 5`.
    pub library: String,
    /// Display name.
    pub name: String,
    /// Version baseline.
    pub version: u64,
    /// Whether metadata can be written.
    pub can_edit_metadata: bool,
    /// Whether files can be written.
    pub can_edit_files: bool,
    /// Number of entities.
    pub entity_count: usize,
    /// Entities with pending change markers.
    pub changed: usize,
    /// Entities deleted locally and not yet confirmed.
    pub deleted: usize,
    /// Entities in the trash.
    pub trashed: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let store = open_store(path)?;
    let result = inspect(&store, path);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects statistics for every library in the store.
pub fn inspect(store: &Store, path: &Path) -> InspectResult {
    let libraries: Vec<LibraryStats> = store
        .libraries()
        .iter()
        .map(|library| library_stats(store, library))
        .collect();

    InspectResult {
        path: path.display().to_string(),
        library_count: libraries.len(),
        entity_count: libraries.iter().map(|l| l.entity_count).sum(),
        libraries,
    }
}

fn library_stats(store: &Store, library: &Library) -> LibraryStats {
    let entities = store.entities(library.id);
    LibraryStats {
        library: library.id.to_string(),
        name: library.name.clone(),
        version: library.version,
        can_edit_metadata: library.can_edit_metadata,
        can_edit_files: library.can_edit_files,
        entity_count: entities.len(),
        changed: entities.iter().filter(|e| e.has_changes() && !e.deleted).count(),
        deleted: entities.iter().filter(|e| e.deleted).count(),
        trashed: entities.iter().filter(|e| e.trashed).count(),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("bibsync store: {}", result.path);
    println!("  Libraries: {}", result.library_count);
    println!("  Entities:  {}", result.entity_count);

    for library in &result.libraries {
        let access = match (library.can_edit_metadata, library.can_edit_files) {
            (true, true) => "read/write",
            (true, false) => "metadata only",
            _ => "read only",
        };
        println!();
        println!("  {} ({})", library.name, library.library);
        println!("    Version:  {}", library.version);
        println!("    Access:   {access}");
        println!("    Entities: {}", library.entity_count);
        println!("    Changed:  {}", library.changed);
        println!("    Deleted:  {}", library.deleted);
        println!("    Trashed:  {}", library.trashed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_store::{CreateEntity, Entity, EntityKind, LibraryId};

    #[test]
    fn counts_pending_entities() {
        let store = Store::open_in_memory();
        store
            .put_library(Library::new(LibraryId::User, "My Library").with_version(4))
            .unwrap();
        store
            .perform(|txn| {
                txn.perform(CreateEntity {
                    entity: Entity::new(LibraryId::User, "ITEM2345", EntityKind::Item),
                })
            })
            .unwrap();

        let result = inspect(&store, Path::new("/tmp/library"));
        assert_eq!(result.library_count, 1);
        assert_eq!(result.entity_count, 1);
        assert_eq!(result.libraries[0].changed, 1);
        assert_eq!(result.libraries[0].version, 4);
        assert_eq!(result.libraries[0].library, "my library");
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("absent"), "text").unwrap_err();
        assert!(matches!(err, CliError::NotFound(_)));
    }
}
