//! # bibsync Testkit
//!
//! Test utilities for bibsync.
//!
//! This crate provides:
//! - Store fixtures with seeded libraries and entities
//! - A stateful fake web API implementing the sync transport
//! - A recording observer for sync runs
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bibsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         store.put_library(user_library(0)).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_api;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake_api::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fake_api::*;
pub use fixtures::*;
pub use generators::*;
