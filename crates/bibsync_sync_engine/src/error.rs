//! Error types for the sync engine.

use bibsync_store::{LibraryId, StoreError};
use bibsync_sync_protocol::{LocalFailure, RecordError, SyncError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine itself, outside the sync error taxonomy.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A classified sync error surfaced outside a run.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A run is already in progress for some of the requested libraries.
    #[error("sync already running for {libraries:?}")]
    Busy {
        /// Libraries that are already being synced.
        libraries: Vec<LibraryId>,
    },

    /// Invalid scheduler state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// An attachment record lacks file metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    /// No MD5 checksum for the attachment file.
    #[error("attachment file checksum is missing")]
    Md5Missing,

    /// No modification time for the attachment file.
    #[error("attachment file modification time is missing")]
    MtimeMissing,
}

/// Building a submission failed. Nothing was committed.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The source record is invalid.
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    /// The attachment lacks file metadata.
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),
}

impl SubmissionError {
    /// Returns the attachment error, if this is one.
    pub fn attachment(&self) -> Option<&AttachmentError> {
        match self {
            SubmissionError::Attachment(e) => Some(e),
            SubmissionError::Store(_) | SubmissionError::Record(_) => None,
        }
    }
}

/// Converts a store error into the failure fed to the classifier.
pub(crate) fn store_failure(err: &StoreError) -> LocalFailure {
    match err {
        StoreError::Io(io) if io.kind() == std::io::ErrorKind::StorageFull => {
            LocalFailure::InsufficientSpace
        }
        other => LocalFailure::Store(other.to_string()),
    }
}
