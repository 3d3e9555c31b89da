//! A stateful in-process stand-in for the web API.
//!
//! [`FakeApi`] keeps a version counter and object versions per library and
//! answers the requests the sync engine sends: version probes, multi-object
//! writes, bulk deletions and upload authorizations. Writes and deletions
//! with a stale `If-Unmodified-Since-Version` are rejected with 412, like
//! the real service.

use bibsync_sync_engine::{ApiRequest, ApiResponse, Method, SyncTransport};
use bibsync_sync_protocol::{TransportFailure, IF_UNMODIFIED_SINCE_VERSION};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A canned answer that replaces the next request to a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Respond with this status and body.
    Status(u16, String),
    /// Fail without a response.
    Offline,
}

#[derive(Debug, Default)]
struct LibraryState {
    version: u64,
    objects: BTreeMap<String, u64>,
    scripted: VecDeque<Scripted>,
    rejected: BTreeMap<String, (u16, String)>,
    uploaded: BTreeSet<String>,
}

/// A fake web API.
#[derive(Debug)]
pub struct FakeApi {
    base_url: String,
    libraries: Mutex<BTreeMap<String, LibraryState>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeApi {
    /// Creates an API with no libraries.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            libraries: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Adds a library under its API prefix (e.g. `users/7`).
    pub fn with_library(self, prefix: &str, version: u64) -> Self {
        self.libraries.lock().insert(
            prefix.to_string(),
            LibraryState {
                version,
                ..LibraryState::default()
            },
        );
        self
    }

    /// Current version of a library.
    pub fn library_version(&self, prefix: &str) -> Option<u64> {
        self.libraries.lock().get(prefix).map(|l| l.version)
    }

    /// Sets a library's version, as if another client had written to it.
    pub fn set_version(&self, prefix: &str, version: u64) {
        if let Some(library) = self.libraries.lock().get_mut(prefix) {
            library.version = version;
        }
    }

    /// Version of a stored object.
    pub fn object_version(&self, prefix: &str, key: &str) -> Option<u64> {
        self.libraries
            .lock()
            .get(prefix)
            .and_then(|l| l.objects.get(key).copied())
    }

    /// Queues a canned answer for the next request to a library.
    pub fn script(&self, prefix: &str, scripted: Scripted) {
        if let Some(library) = self.libraries.lock().get_mut(prefix) {
            library.scripted.push_back(scripted);
        }
    }

    /// Rejects the next write of `key` with a per-object failure.
    pub fn reject(&self, prefix: &str, key: &str, code: u16, message: &str) {
        if let Some(library) = self.libraries.lock().get_mut(prefix) {
            library
                .rejected
                .insert(key.to_string(), (code, message.to_string()));
        }
    }

    /// Marks an attachment file as already present on the server.
    pub fn mark_uploaded(&self, prefix: &str, key: &str) {
        if let Some(library) = self.libraries.lock().get_mut(prefix) {
            library.uploaded.insert(key.to_string());
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests other than reads.
    pub fn write_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method != Method::Get)
            .count()
    }

    fn route(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        let (path, query) = request
            .path
            .trim_start_matches('/')
            .split_once('?')
            .unwrap_or((request.path.trim_start_matches('/'), ""));
        let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 3 {
            return Ok(not_found(url));
        }
        let prefix = format!("{}/{}", segments[0], segments[1]);
        let rest = &segments[2..];

        let mut libraries = self.libraries.lock();
        let Some(library) = libraries.get_mut(&prefix) else {
            return Ok(not_found(url));
        };

        match library.scripted.pop_front() {
            Some(Scripted::Offline) => {
                return Err(TransportFailure::NoConnection("fake api offline".into()));
            }
            Some(Scripted::Status(status, body)) => {
                return Ok(ApiResponse::new(status, body)
                    .with_url(url)
                    .with_version(library.version));
            }
            None => {}
        }

        let response = match (request.method, rest) {
            (Method::Get, _) => ApiResponse::new(200, "[]").with_version(library.version),
            (Method::Post, [_, key, "file"]) => authorize(library, key, &self.base_url),
            (Method::Post, [object]) if is_object_path(object) => {
                match check_since(request, library) {
                    Some(conflict) => conflict,
                    None => write(library, &request.body),
                }
            }
            (Method::Delete, [object]) if is_object_path(object) => {
                match check_since(request, library) {
                    Some(conflict) => conflict,
                    None => delete(library, query),
                }
            }
            _ => return Ok(not_found(url)),
        };
        Ok(response.with_url(url))
    }
}

impl SyncTransport for FakeApi {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        self.requests.lock().push(request.clone());
        self.route(request)
    }
}

fn is_object_path(segment: &str) -> bool {
    matches!(segment, "collections" | "searches" | "items")
}

fn not_found(url: String) -> ApiResponse {
    ApiResponse::new(404, "Not found").with_url(url)
}

fn check_since(request: &ApiRequest, library: &LibraryState) -> Option<ApiResponse> {
    let since = request
        .header(IF_UNMODIFIED_SINCE_VERSION)
        .and_then(|v| v.parse::<u64>().ok());
    match since {
        Some(since) if since >= library.version => None,
        Some(_) => Some(
            ApiResponse::new(412, "Library has been modified since specified version")
                .with_version(library.version),
        ),
        None => Some(ApiResponse::new(428, "If-Unmodified-Since-Version not provided")),
    }
}

fn write(library: &mut LibraryState, body: &[u8]) -> ApiResponse {
    let Ok(objects) = serde_json::from_slice::<Vec<Map<String, Value>>>(body) else {
        return ApiResponse::new(400, "Invalid JSON");
    };

    let new_version = library.version + 1;
    let mut successful = Map::new();
    let mut success = Map::new();
    let mut failed = Map::new();
    for (index, object) in objects.iter().enumerate() {
        let index = index.to_string();
        let Some(key) = object.get("key").and_then(Value::as_str) else {
            failed.insert(index, json!({"key": null, "code": 400, "message": "missing key"}));
            continue;
        };
        if let Some((code, message)) = library.rejected.remove(key) {
            failed.insert(index, json!({"key": key, "code": code, "message": message}));
            continue;
        }
        library.objects.insert(key.to_string(), new_version);
        successful.insert(index.clone(), json!({"key": key, "version": new_version}));
        success.insert(index, json!(key));
    }
    if !successful.is_empty() {
        library.version = new_version;
    }

    let body = json!({
        "successful": successful,
        "success": success,
        "unchanged": {},
        "failed": failed,
    });
    ApiResponse::new(200, body.to_string()).with_version(library.version)
}

fn delete(library: &mut LibraryState, query: &str) -> ApiResponse {
    let keys = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| name.ends_with("Key"))
        .flat_map(|(_, value)| value.split(','))
        .filter(|key| !key.is_empty());
    for key in keys {
        library.objects.remove(key);
    }
    library.version += 1;
    ApiResponse::new(204, "").with_version(library.version)
}

fn authorize(library: &LibraryState, key: &str, base_url: &str) -> ApiResponse {
    if library.uploaded.contains(key) {
        return ApiResponse::new(200, r#"{"exists":1}"#);
    }
    let body = json!({
        "url": format!("{base_url}/upload"),
        "contentType": "multipart/form-data; boundary=fake",
        "prefix": "--fake",
        "suffix": "--fake--",
        "uploadKey": format!("upload-{key}"),
    });
    ApiResponse::new(200, body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> FakeApi {
        FakeApi::new("https://api.test.invalid").with_library("users/7", 10)
    }

    fn post(since: u64, body: &str) -> ApiRequest {
        ApiRequest::post("/users/7/items", body.to_string())
            .with_header(IF_UNMODIFIED_SINCE_VERSION, since)
    }

    #[test]
    fn version_probe() {
        let response = api()
            .send(&ApiRequest::get("/users/7/items/top?format=versions&limit=1"))
            .unwrap();
        assert_eq!(response.last_modified_version, Some(10));
    }

    #[test]
    fn write_advances_version() {
        let api = api();
        let response = api.send(&post(10, r#"[{"key":"ITEM2345"}]"#)).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.last_modified_version, Some(11));
        assert_eq!(api.object_version("users/7", "ITEM2345"), Some(11));
    }

    #[test]
    fn stale_write_conflicts() {
        let api = api();
        let response = api.send(&post(9, r#"[{"key":"ITEM2345"}]"#)).unwrap();
        assert_eq!(response.status, 412);
        assert_eq!(api.library_version("users/7"), Some(10));
    }

    #[test]
    fn rejection_is_one_shot() {
        let api = api();
        api.reject("users/7", "ITEM2345", 400, "bad field");
        let first = api.send(&post(10, r#"[{"key":"ITEM2345"}]"#)).unwrap();
        assert!(first.text().contains("bad field"));
        assert_eq!(api.library_version("users/7"), Some(10));

        let second = api.send(&post(10, r#"[{"key":"ITEM2345"}]"#)).unwrap();
        assert!(!second.text().contains("failed\":{\"0\""));
        assert_eq!(api.library_version("users/7"), Some(11));
    }

    #[test]
    fn deletion_removes_objects() {
        let api = api();
        api.send(&post(10, r#"[{"key":"ITEM2345"}]"#)).unwrap();
        let response = api
            .send(
                &ApiRequest::delete("/users/7/items?itemKey=ITEM2345")
                    .with_header(IF_UNMODIFIED_SINCE_VERSION, 11),
            )
            .unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(api.object_version("users/7", "ITEM2345"), None);
        assert_eq!(api.library_version("users/7"), Some(12));
    }

    #[test]
    fn scripted_answers_come_first() {
        let api = api();
        api.script("users/7", Scripted::Offline);
        api.script("users/7", Scripted::Status(503, "down".into()));
        assert!(api.send(&ApiRequest::get("/users/7/items")).is_err());
        assert_eq!(api.send(&ApiRequest::get("/users/7/items")).unwrap().status, 503);
        assert_eq!(api.send(&ApiRequest::get("/users/7/items")).unwrap().status, 200);
    }

    #[test]
    fn unknown_library_is_not_found() {
        let response = api().send(&ApiRequest::get("/groups/1/items")).unwrap();
        assert_eq!(response.status, 404);
    }
}
