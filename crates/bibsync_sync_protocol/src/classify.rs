//! Failure classification.
//!
//! [`classify`] maps every raw failure observed during a sync run to exactly
//! one semantic outcome. It is pure: no I/O, no logging, no panics.

use crate::messages::ServerErrorBody;
use crate::object::SyncObject;
use crate::record::RecordError;
use crate::sync_error::{
    ErrorData, Fatal, NonFatal, PreconditionErrorType, SyncActionError, SyncError,
};
use bibsync_store::LibraryId;
use std::fmt;

/// A failure that reached the network layer without a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The host could not be reached.
    NoConnection(String),
    /// The request timed out.
    TimedOut,
    /// The connection dropped mid-request.
    Interrupted(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::NoConnection(reason) => write!(f, "no connection: {reason}"),
            TransportFailure::TimedOut => f.write_str("request timed out"),
            TransportFailure::Interrupted(reason) => write!(f, "connection interrupted: {reason}"),
        }
    }
}

impl std::error::Error for TransportFailure {}

/// A response with an unexpected status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// Status code.
    pub status: u16,
    /// Full request URL.
    pub url: String,
    /// Response body as text.
    pub body: String,
}

impl HttpFailure {
    /// Creates an HTTP failure.
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            body: body.into(),
        }
    }
}

/// A failure on the local side of the sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalFailure {
    /// The local store failed.
    Store(String),
    /// Out of disk space.
    InsufficientSpace,
    /// Any other local failure.
    Other(String),
}

/// Which endpoint a size-limit failure came from, when no library is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointFailure {
    /// The web API rejected the request.
    ApiFailure {
        /// Status code.
        status: u16,
    },
    /// The WebDAV server rejected the request.
    WebDavFailure {
        /// Status code.
        status: u16,
    },
}

/// The semantic outcome of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// A run-level or library-level sync error.
    Sync(SyncError),
    /// An error local to one action.
    Action(SyncActionError),
    /// A version precondition failed.
    Precondition(PreconditionErrorType),
    /// An endpoint failure outside any library.
    Endpoint(EndpointFailure),
}

impl Classified {
    /// Returns true if the outcome aborts the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Classified::Sync(SyncError::Fatal(_)))
    }
}

impl From<SyncError> for Classified {
    fn from(err: SyncError) -> Self {
        Classified::Sync(err)
    }
}

impl From<Fatal> for Classified {
    fn from(err: Fatal) -> Self {
        Classified::Sync(SyncError::Fatal(err))
    }
}

impl From<NonFatal> for Classified {
    fn from(err: NonFatal) -> Self {
        Classified::Sync(SyncError::NonFatal(err))
    }
}

/// Any failure the classifier accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Already classified.
    Classified(Classified),
    /// A record could not be parsed or validated.
    Record(RecordError),
    /// No response was received.
    Transport(TransportFailure),
    /// A response with an error status.
    Http(HttpFailure),
    /// A local failure.
    Local(LocalFailure),
}

impl From<Classified> for Failure {
    fn from(c: Classified) -> Self {
        Failure::Classified(c)
    }
}

impl From<RecordError> for Failure {
    fn from(err: RecordError) -> Self {
        Failure::Record(err)
    }
}

impl From<TransportFailure> for Failure {
    fn from(err: TransportFailure) -> Self {
        Failure::Transport(err)
    }
}

impl From<HttpFailure> for Failure {
    fn from(err: HttpFailure) -> Self {
        Failure::Http(err)
    }
}

impl From<LocalFailure> for Failure {
    fn from(err: LocalFailure) -> Self {
        Failure::Local(err)
    }
}

/// What the failing operation was working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Library in scope, if any.
    pub library_id: Option<LibraryId>,
    /// Object type in scope, if any.
    pub object: Option<SyncObject>,
    /// Keys of the objects involved.
    pub keys: Vec<String>,
    /// Base URL of the web API.
    pub api_base_url: String,
}

impl ErrorContext {
    /// Context for an operation outside any library.
    pub fn global(api_base_url: impl Into<String>) -> Self {
        Self {
            library_id: None,
            object: None,
            keys: Vec::new(),
            api_base_url: api_base_url.into(),
        }
    }

    /// Context for an operation on one library.
    pub fn library(library_id: LibraryId, api_base_url: impl Into<String>) -> Self {
        Self {
            library_id: Some(library_id),
            ..Self::global(api_base_url)
        }
    }

    /// Narrows the context to objects of one type.
    #[must_use]
    pub fn with_object(mut self, object: SyncObject, keys: Vec<String>) -> Self {
        self.object = Some(object);
        self.keys = keys;
        self
    }

    fn precondition_type(&self) -> PreconditionErrorType {
        if self.keys.len() == 1 {
            PreconditionErrorType::ObjectConflict
        } else {
            PreconditionErrorType::LibraryConflict
        }
    }

    /// Scope of an API error: keys named by the server win over the context keys.
    fn error_data(&self, body_keys: Vec<String>) -> ErrorData {
        let keys = if body_keys.is_empty() {
            self.keys.clone()
        } else {
            body_keys
        };
        match (self.library_id, self.object) {
            (Some(library_id), Some(object)) => ErrorData::from_object(object, keys, library_id),
            (Some(library_id), None) => ErrorData::from_library(library_id),
            (None, object) => {
                let items = object.is_none_or(|o| o == SyncObject::Item);
                ErrorData {
                    item_keys: (items && !keys.is_empty()).then_some(keys),
                    library_id: None,
                }
            }
        }
    }
}

/// Classifies a failure.
///
/// Classifying an already classified failure returns it unchanged.
#[must_use]
pub fn classify(failure: Failure, context: &ErrorContext) -> Classified {
    match failure {
        Failure::Classified(classified) => classified,
        Failure::Record(err) => NonFatal::from(err).into(),
        Failure::Transport(_) => Fatal::NoInternetConnection.into(),
        Failure::Http(http) => classify_http(http, context),
        Failure::Local(LocalFailure::Store(message)) => Fatal::DbError { message }.into(),
        Failure::Local(LocalFailure::InsufficientSpace) => NonFatal::InsufficientSpace.into(),
        Failure::Local(LocalFailure::Other(description)) => NonFatal::Unknown(description).into(),
    }
}

fn classify_http(http: HttpFailure, context: &ErrorContext) -> Classified {
    match http.status {
        412 => Classified::Precondition(context.precondition_type()),
        413 => match context.library_id {
            Some(library_id) => NonFatal::QuotaLimit(library_id).into(),
            None if http.url.starts_with(&context.api_base_url) => {
                Classified::Endpoint(EndpointFailure::ApiFailure { status: 413 })
            }
            None => Classified::Endpoint(EndpointFailure::WebDavFailure { status: 413 }),
        },
        503 => Fatal::ServiceUnavailable.into(),
        400..=599 => {
            let body = ServerErrorBody::parse(http.body.as_bytes());
            let response = if body.message.is_empty() {
                format!("HTTP {}", http.status)
            } else {
                body.message
            };
            let data = context.error_data(body.keys);
            if context.library_id.is_some() {
                NonFatal::ApiError { response, data }.into()
            } else {
                Fatal::ApiError { response, data }.into()
            }
        }
        status => NonFatal::Unknown(format!("unexpected status {status} from {}", http.url)).into(),
    }
}

/// Returns the precondition type if the failure is a version precondition failure.
#[must_use]
pub fn precondition_error(failure: &Failure) -> Option<PreconditionErrorType> {
    match failure {
        Failure::Classified(Classified::Precondition(kind)) => Some(*kind),
        Failure::Http(HttpFailure { status: 412, .. }) => {
            Some(PreconditionErrorType::LibraryConflict)
        }
        _ => None,
    }
}
