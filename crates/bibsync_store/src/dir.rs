//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! └─ store.cbor        # Snapshot of libraries and entities
//! ```
//!
//! The snapshot is rewritten after every commit through a temporary file
//! and an atomic rename, so a crash leaves either the old or the new
//! snapshot on disk.

use crate::entity::{Entity, Library};
use crate::error::{StoreError, StoreResult};
use crate::store::StoreState;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.cbor";
const SNAPSHOT_TEMP: &str = "store.cbor.tmp";

/// Current snapshot format.
const FORMAT_VERSION: u16 = 1;

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format_version: u16,
    libraries: Vec<Library>,
    entities: Vec<Entity>,
}

/// Holds the exclusive lock on a store directory.
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Loads the snapshot, or an empty state if none was written yet.
    pub(crate) fn load(&self) -> StoreResult<StoreState> {
        let snapshot_path = self.path.join(SNAPSHOT_FILE);
        if !snapshot_path.exists() {
            return Ok(StoreState::default());
        }
        let reader = BufReader::new(File::open(&snapshot_path)?);
        let snapshot: Snapshot =
            ciborium::de::from_reader(reader).map_err(|e| StoreError::codec(e.to_string()))?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(StoreError::codec(format!(
                "unsupported snapshot format {}",
                snapshot.format_version
            )));
        }

        let mut state = StoreState::default();
        for library in snapshot.libraries {
            state.libraries.insert(library.id, library);
        }
        for entity in snapshot.entities {
            state.entities.insert(entity.entity_ref(), entity);
        }
        Ok(state)
    }

    /// Writes the snapshot atomically.
    pub(crate) fn save(&self, state: &StoreState) -> StoreResult<()> {
        let snapshot = Snapshot {
            format_version: FORMAT_VERSION,
            libraries: state.libraries.values().cloned().collect(),
            entities: state.entities.values().cloned().collect(),
        };

        let temp_path = self.path.join(SNAPSHOT_TEMP);
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            ciborium::ser::into_writer(&snapshot, &mut writer)
                .map_err(|e| StoreError::codec(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, self.path.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::types::LibraryId;
    use tempfile::TempDir;

    #[test]
    fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let dir = StoreDir::open(temp.path()).unwrap();

        let mut state = StoreState::default();
        state
            .libraries
            .insert(LibraryId::User, Library::new(LibraryId::User, "Mine").with_version(3));
        let entity = Entity::new(LibraryId::User, "KEEP2345", EntityKind::Collection);
        state.entities.insert(entity.entity_ref(), entity);
        dir.save(&state).unwrap();

        let loaded = dir.load().unwrap();
        assert_eq!(loaded.libraries[&LibraryId::User].version, 3);
        assert_eq!(loaded.entities.len(), 1);
    }

    #[test]
    fn second_open_is_locked() {
        let temp = TempDir::new().unwrap();
        let _first = StoreDir::open(temp.path()).unwrap();
        assert!(matches!(StoreDir::open(temp.path()), Err(StoreError::Locked)));
    }

    #[test]
    fn empty_dir_loads_empty_state() {
        let temp = TempDir::new().unwrap();
        let dir = StoreDir::open(temp.path()).unwrap();
        let state = dir.load().unwrap();
        assert!(state.libraries.is_empty());
        assert!(state.entities.is_empty());
    }
}
