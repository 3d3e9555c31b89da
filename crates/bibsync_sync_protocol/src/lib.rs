//! # bibsync Sync Protocol
//!
//! Sync error taxonomy, failure classification and wire messages for bibsync.
//!
//! This crate provides:
//! - The [`SyncError`] taxonomy (`Fatal` / `NonFatal`), [`SyncActionError`]
//!   and [`PreconditionErrorType`]
//! - The [`classify`] function mapping raw failures to one semantic error
//! - Parsing and schema validation of externally sourced item records
//! - Multi-object write responses, upload authorizations and server error bodies
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod error;
mod messages;
mod object;
mod record;
mod schema;
mod sync_error;

pub use classify::{
    classify, precondition_error, Classified, EndpointFailure, ErrorContext, Failure, HttpFailure,
    LocalFailure, TransportFailure,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    FailedWrite, ServerErrorBody, SuccessfulWrite, UploadAuthorization, WriteResponse,
    IF_MATCH, IF_NONE_MATCH, IF_UNMODIFIED_SINCE_VERSION, LAST_MODIFIED_VERSION,
    WRITE_TOKEN,
};
pub use object::SyncObject;
pub use record::{ItemRecord, ParsingError, RecordError};
pub use schema::{base_field, is_known_item_type, is_valid_field, SchemaError};
pub use sync_error::{
    ErrorData, Fatal, LibraryWarning, NonFatal, PreconditionErrorType, SyncActionError, SyncError,
};
