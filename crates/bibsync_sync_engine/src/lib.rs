//! # bibsync Sync Engine
//!
//! Client-side write sync for bibsync libraries.
//!
//! This crate provides:
//! - Submission building from local edits and external records
//! - Action execution against the web API with one precondition recovery
//! - Run scheduling across libraries with a bounded worker pool
//! - Restart with exponential backoff on remote version changes
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! Local edits record change markers in the store. A run turns pending
//! markers into [`SyncAction`]s, executes them, and commits each
//! [`Confirmation`] back to the store, which clears exactly the markers the
//! server accepted.
//!
//! ## Key Invariants
//!
//! - A failed transaction leaves no writes and no change markers behind
//! - Markers recorded after a submission was built survive its commit
//! - Non-fatal errors never stop other libraries
//! - Results of a cancelled run are never committed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod config;
mod error;
mod executor;
mod http;
mod keys;
mod scheduler;
mod submission;
mod transport;

pub use action::{Confirmation, SyncAction};
pub use config::{RetryConfig, SyncConfig};
pub use error::{AttachmentError, EngineError, EngineResult, SubmissionError};
pub use executor::SyncActionExecutor;
pub use http::{HttpClient, HttpResponse, HttpTransport};
pub use keys::{generate_key, is_valid_key, KEY_LENGTH};
pub use scheduler::{CancelHandle, RunReport, RunState, SyncKind, SyncObserver, SyncScheduler};
pub use submission::{
    update_parameters, AttachmentSubmission, NewAttachment, Parameters, Submission,
    SubmissionBuilder, SubmissionContext,
};
pub use transport::{ApiRequest, ApiResponse, Method, MockTransport, SyncTransport};
