//! Transport layer abstraction for sync operations.

use bibsync_sync_protocol::{TransportFailure, LAST_MODIFIED_VERSION};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        })
    }
}

/// A request to the web API, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl ApiRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the web API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Full URL the request was sent to.
    pub url: String,
    /// Value of the `Last-Modified-Version` header.
    pub last_modified_version: Option<u64>,
    /// Response body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url: String::new(),
            last_modified_version: None,
            body: body.into(),
        }
    }

    /// Sets the library version reported by the server.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.last_modified_version = Some(version);
        self
    }

    /// Sets the request URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Parses the version from a raw `Last-Modified-Version` header pair.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if name.eq_ignore_ascii_case(LAST_MODIFIED_VERSION) {
            self.last_modified_version = value.trim().parse().ok();
        }
        self
    }

    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A sync transport handles network communication with the web API.
///
/// Implementations return `Err` only when no response was received; any
/// response, whatever its status, is returned as `Ok`.
pub trait SyncTransport: Send + Sync {
    /// Sends a request.
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        (**self).send(request)
    }
}

/// A mock transport for testing.
///
/// Replays queued results in order and records every request. When the
/// queue is empty, requests fail with [`TransportFailure::NoConnection`].
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<ApiResponse, TransportFailure>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: ApiResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a transport failure.
    pub fn push_failure(&self, failure: TransportFailure) {
        self.responses.lock().push_back(Err(failure));
    }

    /// Returns the requests sent so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of queued results not consumed yet.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFailure::NoConnection("no mock response queued".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_replays_in_order() {
        let transport = MockTransport::new();
        transport.push_response(ApiResponse::new(200, "[]").with_version(7));
        transport.push_failure(TransportFailure::TimedOut);

        let request = ApiRequest::get("/users/1/items");
        let first = transport.send(&request).unwrap();
        assert_eq!(first.last_modified_version, Some(7));
        assert_eq!(transport.send(&request), Err(TransportFailure::TimedOut));
        assert!(matches!(
            transport.send(&request),
            Err(TransportFailure::NoConnection(_))
        ));
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn request_headers() {
        let request = ApiRequest::post("/users/1/items", "[]")
            .with_header("If-Unmodified-Since-Version", 12);
        assert_eq!(request.header("if-unmodified-since-version"), Some("12"));
        assert_eq!(request.method.to_string(), "POST");
    }

    #[test]
    fn response_version_header() {
        let response = ApiResponse::new(204, "").with_header("last-modified-version", " 31 ");
        assert_eq!(response.last_modified_version, Some(31));
        assert!(response.is_success());
        assert!(!ApiResponse::new(412, "").is_success());
    }
}
