//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores, seeded
//! libraries and common sync configurations.

use bibsync_store::{CreateEntity, Entity, EntityKind, Library, LibraryId, Store};
use bibsync_sync_engine::{RetryConfig, RunReport, RunState, SyncConfig, SyncObserver};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// User id used by fixtures.
pub const TEST_USER_ID: u64 = 7;

/// API base URL used by fixtures.
pub const TEST_API_URL: &str = "https://api.test.invalid";

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<Store>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(Store::open_in_memory()),
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test store.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(&temp_dir.path().join("library"))
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Adds a library.
    pub fn with_library(self, library: Library) -> Self {
        self.store
            .put_library(library)
            .expect("Failed to store library");
        self
    }

    /// Returns a shared handle to the store.
    pub fn shared(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Returns the store directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("library"))
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use bibsync_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         assert!(store.libraries().is_empty());
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// The user's library at `version`.
pub fn user_library(version: u64) -> Library {
    Library::new(LibraryId::User, "My Library").with_version(version)
}

/// An editable group library at `version`.
pub fn group_library(group_id: u64, version: u64) -> Library {
    Library::new(LibraryId::Group(group_id), format!("Group {group_id}")).with_version(version)
}

/// A book item with a title.
pub fn book(library_id: LibraryId, key: &str, title: &str) -> Entity {
    let mut item = Entity::new(library_id, key, EntityKind::Item);
    item.item_type = Some("book".to_string());
    item.set_field("title", title);
    item
}

/// A collection with a name.
pub fn collection(library_id: LibraryId, key: &str, name: &str) -> Entity {
    let mut collection = Entity::new(library_id, key, EntityKind::Collection);
    collection.set_field("name", name);
    collection
}

/// Creates an entity locally, recording its change markers.
pub fn create(store: &Store, entity: Entity) -> Entity {
    store
        .perform(|txn| txn.perform(CreateEntity { entity }))
        .expect("Failed to create entity")
}

/// A sync configuration for [`TEST_USER_ID`] against [`TEST_API_URL`] that
/// restarts without delay.
pub fn test_config() -> SyncConfig {
    SyncConfig::new(TEST_USER_ID, TEST_API_URL).with_retry(
        RetryConfig::new(3)
            .with_restart_delay(Duration::ZERO)
            .with_jitter(false),
    )
}

/// Records every state change and report of the runs it observes.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<RunState>>,
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingObserver {
    /// Creates a new observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// States observed so far.
    pub fn states(&self) -> Vec<RunState> {
        self.states.lock().clone()
    }

    /// Reports observed so far.
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().clone()
    }
}

impl SyncObserver for RecordingObserver {
    fn state_changed(&self, _libraries: &[LibraryId], state: RunState) {
        self.states.lock().push(state);
    }

    fn finished(&self, report: &RunReport) {
        self.reports.lock().push(report.clone());
    }
}
