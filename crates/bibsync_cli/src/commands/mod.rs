//! CLI command implementations.

pub mod inspect;
pub mod pending;

use bibsync_store::LibraryId;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// The store could not be opened or read.
    #[error("store error: {0}")]
    Store(#[from] bibsync_store::StoreError),

    /// Output could not be serialized.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// No store exists at the given path.
    #[error("no store found at {0}")]
    NotFound(std::path::PathBuf),

    /// A library argument was not understood.
    #[error("invalid library '{0}', expected 'user' or 'group:<id>'")]
    InvalidLibrary(String),
}

/// Opens the store at `path`, which must exist.
pub fn open_store(path: &std::path::Path) -> Result<bibsync_store::Store, CliError> {
    tracing::debug!(path = %path.display(), "opening store");
    if !path.join("store.cbor").exists() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(bibsync_store::Store::open(path)?)
}

/// Parses a library argument: `user` or `group:<id>`.
pub fn parse_library(value: &str) -> Result<LibraryId, CliError> {
    match value.split_once(':') {
        None if value.eq_ignore_ascii_case("user") => Ok(LibraryId::User),
        Some(("group", id)) => id
            .parse()
            .map(LibraryId::Group)
            .map_err(|_| CliError::InvalidLibrary(value.to_string())),
        _ => Err(CliError::InvalidLibrary(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_library_arguments() {
        assert_eq!(parse_library("user").unwrap(), LibraryId::User);
        assert_eq!(parse_library("group:42").unwrap(), LibraryId::Group(42));
        assert!(parse_library("group:x").is_err());
        assert!(parse_library("team").is_err());
    }
}
