//! Executing sync actions against the web API.
//!
//! Every failure is classified with [`classify`]. Version conflicts get one
//! recovery: the library baseline is re-fetched, stored, and the action is
//! resubmitted once against it. A second conflict is fatal.
//!
//! A write the server accepts but answers with a library version older than
//! the one the request was made against is a version mismatch.

use crate::action::{Confirmation, SyncAction};
use crate::config::SyncConfig;
use crate::error::store_failure;
use crate::submission::Parameters;
use crate::transport::{ApiRequest, ApiResponse, SyncTransport};
use bibsync_store::{
    ChangeKind, LibraryId, MarkObjectsAsSynced, RemoveConfirmedDeletions, Store, StoreError,
    UpdateLibraryVersion,
};
use bibsync_sync_protocol::{
    classify, Classified, EndpointFailure, ErrorContext, ErrorData, Fatal, HttpFailure, NonFatal,
    PreconditionErrorType, SyncActionError, SyncError, SyncObject, UploadAuthorization,
    WriteResponse, IF_NONE_MATCH, IF_UNMODIFIED_SINCE_VERSION, WRITE_TOKEN,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a request needs a fresh baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conflict {
    Precondition(PreconditionErrorType),
    VersionMismatch,
}

/// Outcome of one request attempt.
enum Attempt {
    Done,
    Conflict(Conflict),
}

/// Executes sync actions.
pub struct SyncActionExecutor<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<Store>,
}

impl<T: SyncTransport> SyncActionExecutor<T> {
    /// Creates an executor.
    pub fn new(config: SyncConfig, transport: Arc<T>, store: Arc<Store>) -> Self {
        Self {
            config,
            transport,
            store,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Executes an action.
    ///
    /// On success the returned [`Confirmation`] has not been applied to
    /// the store yet; pass it to [`SyncActionExecutor::commit`].
    pub fn execute(&self, action: &SyncAction) -> Result<Confirmation, SyncError> {
        self.execute_action(action)
            .map_err(|c| into_sync_error(c, action.library_id()))
    }

    /// Executes an action, keeping action-level errors unconverted.
    ///
    /// The error is always [`Classified::Sync`] or [`Classified::Action`].
    pub fn execute_action(&self, action: &SyncAction) -> Result<Confirmation, Classified> {
        debug!(
            action = action.name(),
            library = %action.library_id(),
            object = %action.object(),
            "executing action"
        );
        match action {
            SyncAction::SubmitUpdate {
                library_id,
                object,
                parameters,
                change_uuids,
                since_version,
                update_library_version,
            } => self.submit_update(
                *library_id,
                *object,
                parameters,
                change_uuids,
                *since_version,
                *update_library_version,
            ),
            SyncAction::SubmitDeletion {
                library_id,
                object,
                keys,
                since_version,
            } => self.submit_deletion(*library_id, *object, keys, *since_version),
            SyncAction::AuthorizeUpload {
                library_id,
                key,
                md5,
                mtime,
                filename,
                filesize,
            } => self.authorize_upload(*library_id, key, md5, *mtime, filename, *filesize),
        }
    }

    /// Applies a confirmation to the store.
    ///
    /// Returns the number of change markers cleared.
    pub fn commit(&self, confirmation: &Confirmation) -> Result<usize, SyncError> {
        let library_id = confirmation.library_id();
        let result = match confirmation {
            Confirmation::Updated {
                library_id,
                keys,
                change_uuids,
                version,
                update_library_version,
                ..
            } => self.store.perform(|txn| {
                txn.perform(MarkObjectsAsSynced {
                    library_id: *library_id,
                    keys: keys.clone(),
                    change_uuids: change_uuids.clone(),
                    version: *version,
                    update_library_version: *update_library_version,
                })
            }),
            Confirmation::Deleted {
                library_id,
                keys,
                version,
                ..
            } => self.store.perform(|txn| {
                txn.perform(RemoveConfirmedDeletions {
                    library_id: *library_id,
                    keys: keys.clone(),
                    version: *version,
                })
                .map(|()| 0)
            }),
            Confirmation::UploadAuthorized { .. } => Ok(0),
        };

        match result {
            Ok(cleared) => {
                debug!(library = %library_id, version = ?confirmation.version(), cleared, "committed confirmation");
                Ok(cleared)
            }
            Err(e) => {
                warn!(library = %library_id, error = %e, "failed to commit confirmation");
                Err(into_sync_error(self.local_failure(&e, library_id), library_id))
            }
        }
    }

    /// Fetches the library's current version from the server.
    pub fn remote_version(&self, library_id: LibraryId) -> Result<u64, SyncError> {
        self.fetch_version(library_id)
            .map_err(|c| into_sync_error(c, library_id))
    }

    /// Compares the server's library version with the local baseline.
    ///
    /// A differing server version is stored as the new baseline and reported
    /// as [`NonFatal::VersionMismatch`].
    pub fn verify_baseline(&self, library_id: LibraryId) -> Result<u64, SyncError> {
        let check = || -> Result<u64, Classified> {
            let local = self.baseline(library_id)?;
            let remote = self.fetch_version(library_id)?;
            if remote == local {
                return Ok(remote);
            }
            self.save_baseline(library_id, remote)?;
            info!(library = %library_id, local, remote, "library changed remotely");
            Err(NonFatal::VersionMismatch(library_id).into())
        };
        check().map_err(|c| into_sync_error(c, library_id))
    }

    /// Re-fetches the library version and stores it as the new baseline.
    pub fn rebaseline(&self, library_id: LibraryId) -> Result<u64, SyncError> {
        self.store_baseline(library_id)
            .map_err(|c| into_sync_error(c, library_id))
    }

    fn submit_update(
        &self,
        library_id: LibraryId,
        object: SyncObject,
        parameters: &[Parameters],
        change_uuids: &BTreeMap<String, Vec<Uuid>>,
        since_version: Option<u64>,
        update_library_version: bool,
    ) -> Result<Confirmation, Classified> {
        let path = self.object_path(library_id, object);
        let mut pending = parameters.to_vec();
        let mut accepted = Vec::new();
        let mut messages = Vec::new();
        let mut quota_exceeded = false;
        let mut version = 0;

        self.with_recovery(library_id, |rebased| {
            let since = match rebased.or(since_version) {
                Some(v) => v,
                None => self.baseline(library_id)?,
            };
            let context = self.context(library_id).with_object(object, parameter_keys(&pending));
            let body = serde_json::to_vec(&pending)
                .map_err(|e| Classified::from(NonFatal::Unknown(e.to_string())))?;
            let request = ApiRequest::post(path.clone(), body)
                .with_header(IF_UNMODIFIED_SINCE_VERSION, since)
                .with_header(WRITE_TOKEN, write_token());

            let response = self.send(&request, &context)?;
            if !response.is_success() {
                return self.conflict_or_error(&response, &context);
            }

            let write = WriteResponse::parse(&response.body).map_err(|e| {
                Classified::from(NonFatal::Unknown(format!("invalid write response: {e}")))
            })?;
            version = reported_version(library_id, &response, since)?;

            let mut settled: BTreeSet<String> = write.accepted_keys().into_iter().collect();
            settled.extend(write.unchanged_keys());
            accepted.extend(settled.iter().cloned());

            let mut conflicts = 0;
            for failed in write.failed.values() {
                match failed.code {
                    412 => conflicts += 1,
                    413 => {
                        quota_exceeded = true;
                        settled.extend(failed.key.clone());
                    }
                    code => {
                        let key = failed.key.as_deref().unwrap_or("?");
                        warn!(library = %library_id, %key, code, message = %failed.message, "object rejected");
                        messages.push(format!("{key}: {}", failed.message));
                        settled.extend(failed.key.clone());
                    }
                }
            }

            pending.retain(|p| {
                p.get("key")
                    .and_then(|k| k.as_str())
                    .is_some_and(|k| !settled.contains(k))
            });
            if conflicts == 0 || pending.is_empty() {
                return Ok(Attempt::Done);
            }
            let kind = if pending.len() == 1 {
                PreconditionErrorType::ObjectConflict
            } else {
                PreconditionErrorType::LibraryConflict
            };
            Ok(Attempt::Conflict(Conflict::Precondition(kind)))
        })?;

        let failure = if quota_exceeded {
            Some(NonFatal::QuotaLimit(library_id))
        } else if messages.is_empty() {
            None
        } else {
            Some(SyncActionError::SubmitUpdateFailures(messages.join("; ")).to_non_fatal(library_id))
        };

        if accepted.is_empty() {
            if quota_exceeded {
                return Err(NonFatal::QuotaLimit(library_id).into());
            }
            if !messages.is_empty() {
                return Err(Classified::Action(SyncActionError::SubmitUpdateFailures(
                    messages.join("; "),
                )));
            }
        }

        debug!(library = %library_id, %object, version, accepted = accepted.len(), "objects written");
        Ok(Confirmation::Updated {
            library_id,
            object,
            keys: accepted,
            change_uuids: change_uuids.clone(),
            version,
            update_library_version,
            failure,
        })
    }

    fn submit_deletion(
        &self,
        library_id: LibraryId,
        object: SyncObject,
        keys: &[String],
        since_version: Option<u64>,
    ) -> Result<Confirmation, Classified> {
        let path = format!(
            "{}?{}={}",
            self.object_path(library_id, object),
            object.key_parameter(),
            keys.join(",")
        );
        let context = self.context(library_id).with_object(object, keys.to_vec());
        let mut version = 0;

        self.with_recovery(library_id, |rebased| {
            let since = match rebased.or(since_version) {
                Some(v) => v,
                None => self.baseline(library_id)?,
            };
            let request = ApiRequest::delete(path.clone()).with_header(IF_UNMODIFIED_SINCE_VERSION, since);
            let response = self.send(&request, &context)?;
            if !response.is_success() {
                return self.conflict_or_error(&response, &context);
            }
            version = reported_version(library_id, &response, since)?;
            Ok(Attempt::Done)
        })?;

        debug!(library = %library_id, %object, version, count = keys.len(), "objects deleted");
        Ok(Confirmation::Deleted {
            library_id,
            object,
            keys: keys.to_vec(),
            version,
        })
    }

    fn authorize_upload(
        &self,
        library_id: LibraryId,
        key: &str,
        md5: &str,
        mtime: i64,
        filename: &str,
        filesize: u64,
    ) -> Result<Confirmation, Classified> {
        let missing = |title: &str| {
            Classified::Action(SyncActionError::AttachmentMissing {
                key: key.to_string(),
                library_id,
                title: title.to_string(),
            })
        };
        let attachment = self.store.entity(library_id, key).ok_or_else(|| missing(""))?;
        if attachment.has_change(ChangeKind::Created) {
            return Err(Classified::Action(SyncActionError::AttachmentItemNotSubmitted));
        }
        if md5.is_empty() || attachment.field("md5").is_none() {
            return Err(missing(attachment.field("title").unwrap_or_default()));
        }

        let body = format!(
            "md5={}&filename={}&filesize={}&mtime={}",
            md5,
            form_encode(filename),
            filesize,
            mtime
        );
        let request = ApiRequest::post(
            format!("/{}/items/{}/file", library_id.api_prefix(self.config.user_id), key),
            body,
        )
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_header(IF_NONE_MATCH, "*");
        let context = self
            .context(library_id)
            .with_object(SyncObject::Item, vec![key.to_string()]);

        let response = self.send(&request, &context)?;
        if response.status == 412 {
            return Err(Fatal::UploadObjectConflict.into());
        }
        if !response.is_success() {
            return Err(self.http_failure(&response, &context));
        }

        match UploadAuthorization::parse(&response.body) {
            Ok(UploadAuthorization::Exists) => {
                debug!(library = %library_id, %key, "file already on server");
                Err(Classified::Action(SyncActionError::AttachmentAlreadyUploaded))
            }
            Ok(authorization) => Ok(Confirmation::UploadAuthorized {
                library_id,
                key: key.to_string(),
                authorization,
            }),
            Err(e) => Err(NonFatal::Unknown(format!("invalid upload authorization: {e}")).into()),
        }
    }

    /// Runs `attempt` and, on a version conflict, once more against a fresh baseline.
    fn with_recovery<F>(&self, library_id: LibraryId, mut attempt: F) -> Result<(), Classified>
    where
        F: FnMut(Option<u64>) -> Result<Attempt, Classified>,
    {
        let conflict = match settle(attempt(None))? {
            Attempt::Done => return Ok(()),
            Attempt::Conflict(conflict) => conflict,
        };

        info!(library = %library_id, ?conflict, "version conflict, re-baselining");
        let version = self.store_baseline(library_id)?;
        match settle(attempt(Some(version)))? {
            Attempt::Done => Ok(()),
            Attempt::Conflict(Conflict::Precondition(_)) => {
                warn!(library = %library_id, "precondition conflict persists after re-baselining");
                Err(Fatal::PreconditionErrorCantBeResolved.into())
            }
            Attempt::Conflict(Conflict::VersionMismatch) => {
                warn!(library = %library_id, "version mismatch persists after re-baselining");
                Err(Fatal::CantResolveConflict.into())
            }
        }
    }

    fn conflict_or_error(
        &self,
        response: &ApiResponse,
        context: &ErrorContext,
    ) -> Result<Attempt, Classified> {
        match self.http_failure(response, context) {
            Classified::Precondition(kind) => Ok(Attempt::Conflict(Conflict::Precondition(kind))),
            other => Err(other),
        }
    }

    fn store_baseline(&self, library_id: LibraryId) -> Result<u64, Classified> {
        let version = self.fetch_version(library_id)?;
        self.save_baseline(library_id, version)?;
        info!(library = %library_id, version, "stored new baseline");
        Ok(version)
    }

    fn save_baseline(&self, library_id: LibraryId, version: u64) -> Result<(), Classified> {
        self.store
            .perform(|txn| txn.perform(UpdateLibraryVersion { library_id, version }))
            .map_err(|e| self.local_failure(&e, library_id))
    }

    fn fetch_version(&self, library_id: LibraryId) -> Result<u64, Classified> {
        let request = ApiRequest::get(format!(
            "/{}/items/top?format=versions&limit=1",
            library_id.api_prefix(self.config.user_id)
        ));
        let context = self.context(library_id);
        let response = self.send(&request, &context)?;
        if !response.is_success() {
            return Err(self.http_failure(&response, &context));
        }
        response.last_modified_version.ok_or_else(|| {
            NonFatal::Unknown(format!("no library version in response from {}", response.url)).into()
        })
    }

    fn baseline(&self, library_id: LibraryId) -> Result<u64, Classified> {
        self.store
            .library(library_id)
            .map(|library| library.version)
            .ok_or_else(|| self.local_failure(&StoreError::LibraryNotFound(library_id), library_id))
    }

    fn send(&self, request: &ApiRequest, context: &ErrorContext) -> Result<ApiResponse, Classified> {
        self.transport.send(request).map_err(|failure| {
            warn!(path = %request.path, %failure, "request failed without response");
            classify(failure.into(), context)
        })
    }

    fn http_failure(&self, response: &ApiResponse, context: &ErrorContext) -> Classified {
        debug!(status = response.status, url = %response.url, "request rejected");
        let url = if response.url.is_empty() {
            self.config.api_base_url.clone()
        } else {
            response.url.clone()
        };
        classify(
            HttpFailure::new(response.status, url, response.text()).into(),
            context,
        )
    }

    fn local_failure(&self, err: &StoreError, library_id: LibraryId) -> Classified {
        classify(store_failure(err).into(), &self.context(library_id))
    }

    fn context(&self, library_id: LibraryId) -> ErrorContext {
        ErrorContext::library(library_id, self.config.api_base_url.clone())
    }

    fn object_path(&self, library_id: LibraryId, object: SyncObject) -> String {
        format!(
            "/{}/{}",
            library_id.api_prefix(self.config.user_id),
            object.api_path()
        )
    }
}

/// Turns a version mismatch raised by a request attempt into a conflict.
fn settle(result: Result<Attempt, Classified>) -> Result<Attempt, Classified> {
    match result {
        Err(Classified::Sync(SyncError::NonFatal(NonFatal::VersionMismatch(_)))) => {
            Ok(Attempt::Conflict(Conflict::VersionMismatch))
        }
        other => other,
    }
}

/// Library version reported by a successful write made against `since`.
fn reported_version(
    library_id: LibraryId,
    response: &ApiResponse,
    since: u64,
) -> Result<u64, Classified> {
    let version = response.last_modified_version.unwrap_or(since);
    if version < since {
        warn!(library = %library_id, since, version, "server reported an older library version");
        return Err(NonFatal::VersionMismatch(library_id).into());
    }
    Ok(version)
}

/// Converts a classified failure into the error reported for `library_id`.
pub(crate) fn into_sync_error(classified: Classified, library_id: LibraryId) -> SyncError {
    match classified {
        Classified::Sync(err) => err,
        Classified::Action(err) => err.to_non_fatal(library_id).into(),
        Classified::Precondition(_) => Fatal::PreconditionErrorCantBeResolved.into(),
        Classified::Endpoint(EndpointFailure::ApiFailure { status }) => NonFatal::ApiError {
            response: format!("HTTP {status}"),
            data: ErrorData::from_library(library_id),
        }
        .into(),
        Classified::Endpoint(EndpointFailure::WebDavFailure { status }) => NonFatal::ApiError {
            response: format!("WebDAV HTTP {status}"),
            data: ErrorData::from_library(library_id),
        }
        .into(),
    }
}

fn parameter_keys(parameters: &[Parameters]) -> Vec<String> {
    parameters
        .iter()
        .filter_map(|p| p.get("key").and_then(|k| k.as_str()).map(str::to_string))
        .collect()
}

fn write_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Percent-encodes a form value.
fn form_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte));
            }
            b' ' => encoded.push('+'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
