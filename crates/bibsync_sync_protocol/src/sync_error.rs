//! The sync error taxonomy.
//!
//! Every failure observed during a sync run ends up as exactly one of:
//!
//! - [`Fatal`]: aborts the whole run
//! - [`NonFatal`]: scoped to one library (or one object), reported as a
//!   warning while the run continues
//! - [`PreconditionErrorType`]: the server rejected a write because the
//!   client's version was stale; recoverable by re-baselining once
//! - [`SyncActionError`]: local to one submission action
//!
//! All error types use full structural equality.

use crate::object::SyncObject;
use crate::record::{ParsingError, RecordError};
use crate::schema::SchemaError;
use bibsync_store::LibraryId;
use std::fmt;
use thiserror::Error;

/// Scope of an error: the library and, for items, the affected keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorData {
    /// Affected item keys, if known.
    pub item_keys: Option<Vec<String>>,
    /// Affected library, if known.
    pub library_id: Option<LibraryId>,
}

impl ErrorData {
    /// Scope covering a whole library.
    pub fn from_library(library_id: LibraryId) -> Self {
        Self {
            item_keys: None,
            library_id: Some(library_id),
        }
    }

    /// Scope for objects of one type; keys are only kept for items.
    pub fn from_object(object: SyncObject, keys: Vec<String>, library_id: LibraryId) -> Self {
        match object {
            SyncObject::Item => Self {
                item_keys: Some(keys),
                library_id: Some(library_id),
            },
            SyncObject::Collection | SyncObject::Search | SyncObject::Settings | SyncObject::Trash => {
                Self::from_library(library_id)
            }
        }
    }
}

/// Errors that abort the whole sync run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fatal {
    /// No network connectivity.
    #[error("no internet connection")]
    NoInternetConnection,

    /// The API rejected a request outside any library scope.
    #[error("API error: {response}")]
    ApiError {
        /// Response body or status description.
        response: String,
        /// Error scope.
        data: ErrorData,
    },

    /// The local store failed.
    #[error("local database error: {message}")]
    DbError {
        /// Store error description.
        message: String,
    },

    /// Group metadata could not be synced.
    #[error("group sync failed")]
    GroupSyncFailed,

    /// None of the requested libraries could be loaded.
    #[error("no library could be loaded")]
    AllLibrariesFetchFailed,

    /// An upload conflicted with a different remote file.
    #[error("upload conflicts with a remote file")]
    UploadObjectConflict,

    /// Key permissions could not be loaded.
    #[error("permissions could not be loaded")]
    PermissionLoadingFailed,

    /// Write attempted in a group without write permission.
    #[error("missing group permissions")]
    MissingGroupPermissions,

    /// The user cancelled the run.
    #[error("sync cancelled")]
    Cancelled,

    /// A precondition conflict survived re-baselining.
    #[error("precondition conflict could not be resolved")]
    PreconditionErrorCantBeResolved,

    /// A version mismatch survived the retry budget.
    #[error("version conflict could not be resolved")]
    CantResolveConflict,

    /// The service is temporarily unavailable.
    #[error("service unavailable")]
    ServiceUnavailable,
}

/// Errors scoped to one library or object; the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NonFatal {
    /// The library changed remotely during the run.
    #[error("version mismatch in {0}")]
    VersionMismatch(LibraryId),

    /// The API rejected a request within a library.
    #[error("API error: {response}")]
    ApiError {
        /// Response body or status description.
        response: String,
        /// Error scope.
        data: ErrorData,
    },

    /// An unexpected failure.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// A record did not fit the schema.
    #[error("schema error: {0}")]
    Schema(SchemaError),

    /// A record could not be parsed.
    #[error("parsing error: {0}")]
    Parsing(ParsingError),

    /// The library is over its storage quota.
    #[error("storage quota exceeded in {0}")]
    QuotaLimit(LibraryId),

    /// Nothing changed.
    #[error("unchanged")]
    Unchanged,

    /// An attachment file is missing locally.
    #[error("attachment '{title}' ({key}) is missing in {library_id}")]
    AttachmentMissing {
        /// Attachment key.
        key: String,
        /// Attachment library.
        library_id: LibraryId,
        /// Attachment title.
        title: String,
    },

    /// An annotation had to be split before upload.
    #[error("annotation was split: {message}")]
    AnnotationDidSplit {
        /// Description.
        message: String,
        /// Annotation library.
        library_id: LibraryId,
    },

    /// Not enough local disk space.
    #[error("insufficient space")]
    InsufficientSpace,

    /// Files were deleted from WebDAV storage.
    #[error("{count} files deleted from WebDAV for {library}")]
    WebDavDeletion {
        /// Number of deleted files.
        count: usize,
        /// Library name.
        library: String,
    },

    /// Deleting files from WebDAV storage failed.
    #[error("WebDAV deletion failed for {library}: {error}")]
    WebDavDeletionFailed {
        /// Failure description.
        error: String,
        /// Library name.
        library: String,
    },
}

impl NonFatal {
    /// Returns true for [`NonFatal::VersionMismatch`].
    #[must_use]
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, NonFatal::VersionMismatch(_))
    }

    /// Returns the library this error is attributed to, if it carries one.
    #[must_use]
    pub fn library_id(&self) -> Option<LibraryId> {
        match self {
            NonFatal::VersionMismatch(id) | NonFatal::QuotaLimit(id) => Some(*id),
            NonFatal::ApiError { data, .. } => data.library_id,
            NonFatal::AttachmentMissing { library_id, .. }
            | NonFatal::AnnotationDidSplit { library_id, .. } => Some(*library_id),
            NonFatal::Unknown(_)
            | NonFatal::Schema(_)
            | NonFatal::Parsing(_)
            | NonFatal::Unchanged
            | NonFatal::InsufficientSpace
            | NonFatal::WebDavDeletion { .. }
            | NonFatal::WebDavDeletionFailed { .. } => None,
        }
    }
}

impl From<RecordError> for NonFatal {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Parsing(e) => NonFatal::Parsing(e),
            RecordError::Schema(e) => NonFatal::Schema(e),
        }
    }
}

/// A semantic sync error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Aborts the run.
    #[error("fatal: {0}")]
    Fatal(#[from] Fatal),

    /// Reported as a warning.
    #[error("non-fatal: {0}")]
    NonFatal(#[from] NonFatal),
}

impl SyncError {
    /// Returns the fatal error, if this is one.
    #[must_use]
    pub fn fatal(&self) -> Option<&Fatal> {
        match self {
            SyncError::Fatal(e) => Some(e),
            SyncError::NonFatal(_) => None,
        }
    }

    /// Returns the non-fatal error, if this is one.
    #[must_use]
    pub fn non_fatal(&self) -> Option<&NonFatal> {
        match self {
            SyncError::Fatal(_) => None,
            SyncError::NonFatal(e) => Some(e),
        }
    }

    /// Returns true for fatal errors.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal(_))
    }
}

/// The server rejected a write because the assumed version is stale (HTTP 412).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreconditionErrorType {
    /// One object changed remotely.
    #[error("object version conflict")]
    ObjectConflict,

    /// The library changed remotely.
    #[error("library version conflict")]
    LibraryConflict,
}

/// Errors local to one submission action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncActionError {
    /// The attachment's item has not been submitted yet.
    #[error("attachment item has not been submitted")]
    AttachmentItemNotSubmitted,

    /// The server already has this file.
    #[error("attachment already uploaded")]
    AttachmentAlreadyUploaded,

    /// The attachment file is missing locally.
    #[error("attachment '{title}' ({key}) is missing in {library_id}")]
    AttachmentMissing {
        /// Attachment key.
        key: String,
        /// Attachment library.
        library_id: LibraryId,
        /// Attachment title.
        title: String,
    },

    /// Some objects of a multi-object write failed.
    #[error("submission failed: {0}")]
    SubmitUpdateFailures(String),

    /// An annotation needs splitting before it can be submitted.
    #[error("annotation needs splitting: {message}")]
    AnnotationNeededSplitting {
        /// Description.
        message: String,
        /// Annotation library.
        library_id: LibraryId,
    },
}

impl SyncActionError {
    /// Converts the action error into the warning reported for `library_id`.
    #[must_use]
    pub fn to_non_fatal(&self, library_id: LibraryId) -> NonFatal {
        match self {
            SyncActionError::SubmitUpdateFailures(messages) => NonFatal::ApiError {
                response: messages.clone(),
                data: ErrorData::from_library(library_id),
            },
            SyncActionError::AttachmentMissing {
                key,
                library_id,
                title,
            } => NonFatal::AttachmentMissing {
                key: key.clone(),
                library_id: *library_id,
                title: title.clone(),
            },
            SyncActionError::AnnotationNeededSplitting {
                message,
                library_id,
            } => NonFatal::AnnotationDidSplit {
                message: message.clone(),
                library_id: *library_id,
            },
            SyncActionError::AttachmentItemNotSubmitted
            | SyncActionError::AttachmentAlreadyUploaded => NonFatal::Unknown(self.to_string()),
        }
    }
}

/// A non-fatal error attributed to the library it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryWarning {
    /// Library the error happened in.
    pub library_id: LibraryId,
    /// The error.
    pub error: NonFatal,
}

impl fmt::Display for LibraryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.library_id, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_data_keeps_keys_only_for_items() {
        let keys = vec!["AAAA2222".to_string()];
        let items = ErrorData::from_object(SyncObject::Item, keys.clone(), LibraryId::User);
        assert_eq!(items.item_keys, Some(keys.clone()));

        let collections = ErrorData::from_object(SyncObject::Collection, keys, LibraryId::User);
        assert_eq!(collections, ErrorData::from_library(LibraryId::User));
    }

    #[test]
    fn equality_is_structural() {
        assert_ne!(
            NonFatal::VersionMismatch(LibraryId::User),
            NonFatal::VersionMismatch(LibraryId::Group(1))
        );
        let a = Fatal::ApiError {
            response: "a".into(),
            data: ErrorData::default(),
        };
        let b = Fatal::ApiError {
            response: "b".into(),
            data: ErrorData::default(),
        };
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn accessors() {
        let err = SyncError::from(NonFatal::QuotaLimit(LibraryId::Group(3)));
        assert!(!err.is_fatal());
        assert_eq!(err.non_fatal().and_then(NonFatal::library_id), Some(LibraryId::Group(3)));
        assert!(err.fatal().is_none());

        let err = SyncError::from(Fatal::Cancelled);
        assert_eq!(err.fatal(), Some(&Fatal::Cancelled));
        assert!(NonFatal::VersionMismatch(LibraryId::User).is_version_mismatch());
    }

    #[test]
    fn action_errors_become_warnings() {
        let err = SyncActionError::SubmitUpdateFailures("bad field".into());
        assert_eq!(
            err.to_non_fatal(LibraryId::User),
            NonFatal::ApiError {
                response: "bad field".into(),
                data: ErrorData::from_library(LibraryId::User)
            }
        );
        assert!(matches!(
            SyncActionError::AttachmentAlreadyUploaded.to_non_fatal(LibraryId::User),
            NonFatal::Unknown(_)
        ));
    }

    #[test]
    fn display() {
        assert_eq!(Fatal::NoInternetConnection.to_string(), "no internet connection");
        assert_eq!(
            SyncError::from(NonFatal::QuotaLimit(LibraryId::Group(2))).to_string(),
            "non-fatal: storage quota exceeded in group 2"
        );
    }
}
