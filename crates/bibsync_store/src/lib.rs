//! # bibsync Store
//!
//! Local transactional store for bibsync.
//!
//! This crate provides:
//! - The bibliographic data model (libraries, items, collections, searches, attachments)
//! - Change markers and the [`ChangeRecorder`] that produces them
//! - Single-writer transactions with commit-or-rollback semantics
//! - Typed store requests executed inside a transaction
//! - A durable CBOR snapshot guarded by an exclusive lock file
//!
//! ## Key Invariants
//!
//! - At most one write transaction is open per store
//! - A transaction is applied entirely or not at all
//! - Change markers are cleared only by identifier, together with the
//!   server-confirmed version

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod dir;
mod entity;
mod error;
mod requests;
mod store;
mod transaction;
mod types;

pub use change::{ChangeKind, ChangeMarker, ChangeRecorder};
pub use entity::{Entity, EntityKind, Field, Library, Tag};
pub use error::{StoreError, StoreResult};
pub use requests::{
    CreateEntity, MarkForDeletion, MarkObjectsAsSynced, ModifyEntity, ReadLibrary,
    ReadPendingChanges, ReadPendingDeletions, RemoveConfirmedDeletions, UpdateCollectionLastUsed,
    UpdateLibraryVersion,
};
pub use store::Store;
pub use transaction::{StoreRequest, Transaction};
pub use types::{EntityRef, LibraryId};
