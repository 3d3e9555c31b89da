//! The local store.

use crate::dir::StoreDir;
use crate::entity::{Entity, Library};
use crate::error::StoreResult;
use crate::transaction::Transaction;
use crate::types::{EntityRef, LibraryId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Committed store contents.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) libraries: BTreeMap<LibraryId, Library>,
    pub(crate) entities: BTreeMap<EntityRef, Entity>,
}

/// Transactional store for libraries and their objects.
///
/// ## Single-Writer Guarantee
///
/// [`Store::perform`] holds an exclusive write lock for the whole
/// transaction body, so at most one writer exists at a time. Readers never
/// take the write lock: they see the last committed state and may run
/// concurrently with each other and with an open (uncommitted) writer.
pub struct Store {
    /// Last committed state.
    state: RwLock<Arc<StoreState>>,
    /// Write lock, only one writer at a time.
    write_lock: Mutex<()>,
    /// Backing directory, `None` for in-memory stores.
    dir: Option<StoreDir>,
    /// Number of committed transactions.
    commits: AtomicU64,
}

impl Store {
    /// Opens an empty in-memory store.
    pub fn open_in_memory() -> Self {
        Self::with_state(StoreState::default(), None)
    }

    /// Opens (or creates) a store persisted in `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Locked`] if another process holds the
    /// store, or a codec error if the snapshot cannot be decoded.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let state = dir.load()?;
        debug!(
            path = %path.display(),
            libraries = state.libraries.len(),
            entities = state.entities.len(),
            "opened store"
        );
        Ok(Self::with_state(state, Some(dir)))
    }

    fn with_state(state: StoreState, dir: Option<StoreDir>) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            write_lock: Mutex::new(()),
            dir,
            commits: AtomicU64::new(0),
        }
    }

    /// Executes `f` within a write transaction.
    ///
    /// If `f` returns `Ok`, its writes are committed (and persisted for
    /// file-backed stores) atomically. If it returns `Err`, every pending
    /// write is discarded and the committed state is untouched.
    pub fn perform<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> StoreResult<T>,
    {
        let _writer = self.write_lock.lock();
        let base = Arc::clone(&self.state.read());
        let mut txn = Transaction::new(base);

        match f(&mut txn) {
            Ok(result) => {
                self.commit(txn)?;
                Ok(result)
            }
            Err(e) => {
                debug!(error = %e, writes = txn.write_count(), "transaction rolled back");
                Err(e)
            }
        }
    }

    fn commit(&self, txn: Transaction) -> StoreResult<()> {
        if txn.write_count() == 0 {
            return Ok(());
        }
        if !txn.is_invalidated() {
            debug!(cached = txn.cached_reads(), "committing without invalidating read cache");
        }

        // The writer lock is held, so the committed state cannot move underneath us.
        let mut next = StoreState::clone(&self.state.read());
        txn.apply_to(&mut next);

        if let Some(dir) = &self.dir {
            if let Err(e) = dir.save(&next) {
                warn!(error = %e, "failed to persist snapshot, transaction rolled back");
                return Err(e);
            }
        }

        *self.state.write() = Arc::new(next);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Inserts or replaces a library in its own transaction.
    pub fn put_library(&self, library: Library) -> StoreResult<()> {
        self.perform(|txn| {
            txn.put_library(library);
            Ok(())
        })
    }

    /// Returns a committed library.
    pub fn library(&self, id: LibraryId) -> Option<Library> {
        self.state.read().libraries.get(&id).cloned()
    }

    /// Returns all committed libraries.
    pub fn libraries(&self) -> Vec<Library> {
        self.state.read().libraries.values().cloned().collect()
    }

    /// Returns a committed entity.
    pub fn entity(&self, library_id: LibraryId, key: &str) -> Option<Entity> {
        self.state
            .read()
            .entities
            .get(&EntityRef::new(library_id, key))
            .cloned()
    }

    /// Returns all committed entities of a library.
    pub fn entities(&self, library_id: LibraryId) -> Vec<Entity> {
        self.state
            .read()
            .entities
            .values()
            .filter(|e| e.library_id == library_id)
            .cloned()
            .collect()
    }

    /// Returns the number of committed transactions since open.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns true if the store is backed by a directory.
    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Store")
            .field("libraries", &state.libraries.len())
            .field("entities", &state.entities.len())
            .field("persistent", &self.dir.is_some())
            .finish_non_exhaustive()
    }
}
