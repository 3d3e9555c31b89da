//! Error types for the bibsync store.

use crate::types::LibraryId;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error while reading or writing the snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot encoding or decoding failed.
    #[error("snapshot codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// Library not present in the store.
    #[error("library not found: {0}")]
    LibraryNotFound(LibraryId),

    /// Entity not present in the store.
    #[error("object {key} not found in {library_id}")]
    NotFound {
        /// Library searched.
        library_id: LibraryId,
        /// Key that was not found.
        key: String,
    },

    /// An entity with the same key already exists.
    #[error("object {key} already exists in {library_id}")]
    AlreadyExists {
        /// Library of the conflicting entity.
        library_id: LibraryId,
        /// Conflicting key.
        key: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The transaction body asked for a rollback.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(library_id: LibraryId, key: impl Into<String>) -> Self {
        Self::NotFound {
            library_id,
            key: key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::not_found(LibraryId::Group(7), "ABCD2345");
        assert_eq!(err.to_string(), "object ABCD2345 not found in group 7");

        let err = StoreError::Locked;
        assert!(err.to_string().contains("locked"));
    }
}
