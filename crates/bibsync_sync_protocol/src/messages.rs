//! Wire messages exchanged with the web API.
//!
//! Requests carry JSON arrays of object parameters; responses to writes use
//! the multi-object shape where every submitted object is reported under its
//! index in one of `successful`, `unchanged` or `failed`.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Request header carrying the library version a write is based on.
pub const IF_UNMODIFIED_SINCE_VERSION: &str = "If-Unmodified-Since-Version";

/// Response header carrying the library version after a request.
pub const LAST_MODIFIED_VERSION: &str = "Last-Modified-Version";

/// Request header making a write idempotent across retries.
pub const WRITE_TOKEN: &str = "Zotero-Write-Token";

/// Conditional upload header for replacing a known file.
pub const IF_MATCH: &str = "If-Match";

/// Conditional upload header for a file that must not exist yet.
pub const IF_NONE_MATCH: &str = "If-None-Match";

/// An object accepted by a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessfulWrite {
    /// Object key.
    pub key: String,
    /// New object version.
    pub version: u64,
}

/// An object rejected by a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    /// Object key, when the server could identify it.
    #[serde(default)]
    pub key: Option<String>,
    /// HTTP-like status code for this object.
    pub code: u16,
    /// Server message.
    #[serde(default)]
    pub message: String,
}

/// Response to a multi-object write, keyed by submission index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Accepted objects with their new versions.
    #[serde(default)]
    pub successful: BTreeMap<String, SuccessfulWrite>,
    /// Accepted object keys.
    #[serde(default)]
    pub success: BTreeMap<String, String>,
    /// Objects the server already had in this state.
    #[serde(default)]
    pub unchanged: BTreeMap<String, String>,
    /// Rejected objects.
    #[serde(default)]
    pub failed: BTreeMap<String, FailedWrite>,
}

impl WriteResponse {
    /// Parses a response body. An empty body is an empty response.
    pub fn parse(body: &[u8]) -> ProtocolResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Keys the server accepted.
    #[must_use]
    pub fn accepted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .successful
            .values()
            .map(|w| w.key.clone())
            .chain(self.success.values().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Keys the server reported as unchanged.
    #[must_use]
    pub fn unchanged_keys(&self) -> Vec<String> {
        self.unchanged.values().cloned().collect()
    }

    /// Returns true if at least one object failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Body of an API error response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerErrorBody {
    /// Human-readable message.
    pub message: String,
    /// Object keys the error refers to.
    pub keys: Vec<String>,
}

impl ServerErrorBody {
    /// Parses an error body. JSON bodies may name the affected keys; any
    /// other body is taken as plain text.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body).trim().to_string();
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&text) else {
            return Self {
                message: text,
                keys: Vec::new(),
            };
        };

        let message = object
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| text.clone(), str::to_string);
        let mut keys = Vec::new();
        if let Some(key) = object.get("key").and_then(Value::as_str) {
            keys.push(key.to_string());
        }
        if let Some(list) = object.get("keys").and_then(Value::as_array) {
            keys.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        Self { message, keys }
    }
}

/// Server response to a file upload authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAuthorization {
    /// The server already has the file.
    Exists,
    /// Upload the file to `url`, wrapped in `prefix` and `suffix`.
    New {
        /// Upload target.
        url: String,
        /// Content type of the upload body.
        content_type: String,
        /// Bytes sent before the file.
        prefix: String,
        /// Bytes sent after the file.
        suffix: String,
        /// Key used to register the finished upload.
        upload_key: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthorization {
    #[serde(default)]
    exists: Option<u8>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    suffix: String,
    #[serde(default)]
    upload_key: Option<String>,
}

impl UploadAuthorization {
    /// Parses an authorization response body.
    pub fn parse(body: &[u8]) -> ProtocolResult<Self> {
        let raw: RawAuthorization = serde_json::from_slice(body)?;
        if raw.exists == Some(1) {
            return Ok(UploadAuthorization::Exists);
        }
        match (raw.url, raw.upload_key) {
            (Some(url), Some(upload_key)) => Ok(UploadAuthorization::New {
                url,
                content_type: raw.content_type.unwrap_or_default(),
                prefix: raw.prefix,
                suffix: raw.suffix,
                upload_key,
            }),
            _ => Err(ProtocolError::InvalidStructure(
                "authorization has neither 'exists' nor 'url' and 'uploadKey'".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mixed_write_response() {
        let body = br#"{
            "successful": {"0": {"key": "AAAA2222", "version": 12, "data": {}}},
            "success": {"0": "AAAA2222"},
            "unchanged": {"1": "BBBB3333"},
            "failed": {"2": {"key": "CCCC4444", "code": 412, "message": "Item has been modified"}}
        }"#;
        let response = WriteResponse::parse(body).unwrap();
        assert_eq!(response.accepted_keys(), vec!["AAAA2222".to_string()]);
        assert_eq!(response.unchanged_keys(), vec!["BBBB3333".to_string()]);
        assert!(response.has_failures());
        assert_eq!(response.failed["2"].code, 412);
        assert_eq!(response.successful["0"].version, 12);
    }

    #[test]
    fn empty_body_is_empty_response() {
        assert_eq!(WriteResponse::parse(b"").unwrap(), WriteResponse::default());
        assert!(WriteResponse::parse(b"[1").is_err());
    }

    #[test]
    fn error_body_json_and_text() {
        let body = ServerErrorBody::parse(br#"{"message": "Invalid field", "key": "AAAA2222"}"#);
        assert_eq!(body.message, "Invalid field");
        assert_eq!(body.keys, vec!["AAAA2222".to_string()]);

        let body = ServerErrorBody::parse(b"  Library is locked \n");
        assert_eq!(body.message, "Library is locked");
        assert!(body.keys.is_empty());
    }

    #[test]
    fn upload_authorization_variants() {
        assert_eq!(
            UploadAuthorization::parse(br#"{"exists": 1}"#).unwrap(),
            UploadAuthorization::Exists
        );
        let auth = UploadAuthorization::parse(
            br#"{"url": "https://up.example/", "contentType": "multipart/form-data",
                 "prefix": "--a", "suffix": "--b", "uploadKey": "k1"}"#,
        )
        .unwrap();
        assert!(matches!(auth, UploadAuthorization::New { ref upload_key, .. } if upload_key == "k1"));
        assert!(matches!(
            UploadAuthorization::parse(br#"{"prefix": ""}"#),
            Err(ProtocolError::InvalidStructure(_))
        ));
    }
}
