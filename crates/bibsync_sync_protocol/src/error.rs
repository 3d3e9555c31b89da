//! Error types for protocol message handling.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The body is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// The body is valid JSON but has an unexpected shape.
    #[error("invalid message structure: {0}")]
    InvalidStructure(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            ProtocolError::InvalidStructure(err.to_string())
        } else {
            ProtocolError::Json(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_errors_are_split_by_category() {
        let syntax = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ProtocolError::from(syntax), ProtocolError::Json(_)));

        let data = serde_json::from_str::<u64>("\"text\"").unwrap_err();
        assert!(matches!(
            ProtocolError::from(data),
            ProtocolError::InvalidStructure(_)
        ));
    }
}
