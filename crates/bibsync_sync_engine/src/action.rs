//! Sync actions and their confirmations.

use crate::submission::Parameters;
use bibsync_store::LibraryId;
use bibsync_sync_protocol::{NonFatal, SyncObject, UploadAuthorization};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One remote interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Writes created or modified objects.
    SubmitUpdate {
        /// Library of the objects.
        library_id: LibraryId,
        /// Object type.
        object: SyncObject,
        /// Write parameters, one entry per object.
        parameters: Vec<Parameters>,
        /// Marker identifiers carried by the write, by object key.
        change_uuids: BTreeMap<String, Vec<Uuid>>,
        /// Version baseline; the library's stored baseline when `None`.
        since_version: Option<u64>,
        /// Whether a successful write also advances the library baseline.
        update_library_version: bool,
    },

    /// Deletes objects.
    SubmitDeletion {
        /// Library of the objects.
        library_id: LibraryId,
        /// Object type.
        object: SyncObject,
        /// Keys to delete.
        keys: Vec<String>,
        /// Version baseline; the library's stored baseline when `None`.
        since_version: Option<u64>,
    },

    /// Requests authorization to upload an attachment file.
    AuthorizeUpload {
        /// Library of the attachment.
        library_id: LibraryId,
        /// Attachment key.
        key: String,
        /// MD5 checksum of the file.
        md5: String,
        /// Modification time in milliseconds.
        mtime: i64,
        /// File name.
        filename: String,
        /// File size in bytes.
        filesize: u64,
    },
}

impl SyncAction {
    /// Library the action operates on.
    pub fn library_id(&self) -> LibraryId {
        match self {
            SyncAction::SubmitUpdate { library_id, .. }
            | SyncAction::SubmitDeletion { library_id, .. }
            | SyncAction::AuthorizeUpload { library_id, .. } => *library_id,
        }
    }

    /// Object type the action operates on.
    pub fn object(&self) -> SyncObject {
        match self {
            SyncAction::SubmitUpdate { object, .. } | SyncAction::SubmitDeletion { object, .. } => {
                *object
            }
            SyncAction::AuthorizeUpload { .. } => SyncObject::Item,
        }
    }

    /// Keys of the objects involved.
    pub fn keys(&self) -> Vec<String> {
        match self {
            SyncAction::SubmitUpdate { parameters, .. } => parameters
                .iter()
                .filter_map(|p| p.get("key").and_then(|k| k.as_str()).map(str::to_string))
                .collect(),
            SyncAction::SubmitDeletion { keys, .. } => keys.clone(),
            SyncAction::AuthorizeUpload { key, .. } => vec![key.clone()],
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::SubmitUpdate { .. } => "submit_update",
            SyncAction::SubmitDeletion { .. } => "submit_deletion",
            SyncAction::AuthorizeUpload { .. } => "authorize_upload",
        }
    }
}

/// What the server accepted. Committing it updates the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Objects were written.
    Updated {
        /// Library of the objects.
        library_id: LibraryId,
        /// Object type.
        object: SyncObject,
        /// Keys accepted or reported unchanged.
        keys: Vec<String>,
        /// Marker identifiers to clear, by object key.
        change_uuids: BTreeMap<String, Vec<Uuid>>,
        /// Version assigned by the server.
        version: u64,
        /// Whether the library baseline advances too.
        update_library_version: bool,
        /// Objects the server rejected, reported as a warning.
        failure: Option<NonFatal>,
    },

    /// Objects were deleted.
    Deleted {
        /// Library of the objects.
        library_id: LibraryId,
        /// Object type.
        object: SyncObject,
        /// Deleted keys.
        keys: Vec<String>,
        /// Library version after the deletion.
        version: u64,
    },

    /// An upload was authorized.
    UploadAuthorized {
        /// Library of the attachment.
        library_id: LibraryId,
        /// Attachment key.
        key: String,
        /// Upload parameters.
        authorization: UploadAuthorization,
    },
}

impl Confirmation {
    /// Library the confirmation belongs to.
    pub fn library_id(&self) -> LibraryId {
        match self {
            Confirmation::Updated { library_id, .. }
            | Confirmation::Deleted { library_id, .. }
            | Confirmation::UploadAuthorized { library_id, .. } => *library_id,
        }
    }

    /// The partial failure carried by a write, if any.
    pub fn warning(&self) -> Option<&NonFatal> {
        match self {
            Confirmation::Updated { failure, .. } => failure.as_ref(),
            Confirmation::Deleted { .. } | Confirmation::UploadAuthorized { .. } => None,
        }
    }

    /// Version reported by the server, if the confirmation carries one.
    pub fn version(&self) -> Option<u64> {
        match self {
            Confirmation::Updated { version, .. } | Confirmation::Deleted { version, .. } => {
                Some(*version)
            }
            Confirmation::UploadAuthorized { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_accessors() {
        let mut params = Parameters::new();
        params.insert("key".into(), json!("AAAA2222"));
        let action = SyncAction::SubmitUpdate {
            library_id: LibraryId::Group(4),
            object: SyncObject::Collection,
            parameters: vec![params],
            change_uuids: BTreeMap::new(),
            since_version: None,
            update_library_version: true,
        };
        assert_eq!(action.library_id(), LibraryId::Group(4));
        assert_eq!(action.object(), SyncObject::Collection);
        assert_eq!(action.keys(), vec!["AAAA2222".to_string()]);
        assert_eq!(action.name(), "submit_update");
    }

    #[test]
    fn confirmation_accessors() {
        let confirmation = Confirmation::Deleted {
            library_id: LibraryId::User,
            object: SyncObject::Item,
            keys: vec!["AAAA2222".into()],
            version: 9,
        };
        assert_eq!(confirmation.version(), Some(9));
        assert!(confirmation.warning().is_none());
    }
}
