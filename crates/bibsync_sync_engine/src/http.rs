//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any HTTP
//! library (or a loopback test server) can carry the requests.

use crate::config::SyncConfig;
use crate::transport::{ApiRequest, ApiResponse, Method, SyncTransport};
use bibsync_sync_protocol::TransportFailure;
use bytes::Bytes;
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// A raw HTTP response as returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a request to an absolute URL.
    ///
    /// Returns `Err` only when no response was received.
    fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportFailure>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the web API (e.g., "https://api.example.org").
    base_url: String,
    /// API key sent with every request.
    api_key: Option<String>,
    /// Request timeout.
    timeout: Duration,
    /// HTTP client implementation.
    client: C,
    /// Last transport failure.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport for the configured API URL and request timeout.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(config.api_base_url.clone(), client).with_timeout(config.timeout)
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Joins the base URL with a request path.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        let url = self.url_for(&request.path);
        let mut headers = request.headers.clone();
        if let Some(key) = &self.api_key {
            headers.push(("Zotero-API-Key".to_string(), key.clone()));
        }
        if !request.body.is_empty() && request.header("Content-Type").is_none() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        debug!(method = %request.method, %url, "sending request");
        let response = self
            .client
            .execute(request.method, &url, &headers, request.body.clone(), self.timeout)
            .map_err(|e| {
                *self.last_error.write() = Some(e.to_string());
                e
            })?;
        *self.last_error.write() = None;

        let mut api_response = ApiResponse::new(response.status, response.body).with_url(url);
        for (name, value) in &response.headers {
            api_response = api_response.with_header(name, value);
        }
        Ok(api_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        seen: Mutex<Vec<(String, Vec<(String, String)>)>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl HttpClient for TestClient {
        fn execute(
            &self,
            _method: Method,
            url: &str,
            headers: &[(String, String)],
            _body: Bytes,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportFailure> {
            self.seen.lock().push((url.to_string(), headers.to_vec()));
            self.timeouts.lock().push(timeout);
            self.response
                .lock()
                .clone()
                .ok_or_else(|| TransportFailure::NoConnection("offline".into()))
        }
    }

    #[test]
    fn joins_base_url() {
        let transport = HttpTransport::new("https://api.example.org/", TestClient::default());
        assert_eq!(transport.base_url(), "https://api.example.org");
        assert_eq!(
            transport.url_for("/users/1/items"),
            "https://api.example.org/users/1/items"
        );
        assert_eq!(
            transport.url_for("https://upload.example.org/x"),
            "https://upload.example.org/x"
        );
    }

    #[test]
    fn send_maps_response() {
        let client = TestClient::default();
        *client.response.lock() = Some(HttpResponse {
            status: 200,
            headers: vec![("Last-Modified-Version".into(), "15".into())],
            body: Bytes::from_static(b"{}"),
        });
        let transport = HttpTransport::new("https://api.example.org", client).with_api_key("k");

        let response = transport
            .send(&ApiRequest::post("/users/1/items", "[]"))
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.url, "https://api.example.org/users/1/items");
        assert_eq!(response.last_modified_version, Some(15));

        let seen = transport.client.seen.lock();
        assert!(seen[0].1.iter().any(|(n, v)| n == "Zotero-API-Key" && v == "k"));
    }

    #[test]
    fn configured_timeout_reaches_client() {
        let config = SyncConfig::new(1, "https://api.example.org/")
            .with_timeout(Duration::from_secs(5));
        let transport = HttpTransport::from_config(&config, TestClient::default());
        assert_eq!(transport.base_url(), "https://api.example.org");

        let _ = transport.send(&ApiRequest::get("/users/1/items"));
        assert_eq!(*transport.client.timeouts.lock(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn transport_failure_is_recorded() {
        let transport = HttpTransport::new("https://api.example.org", TestClient::default());
        let result = transport.send(&ApiRequest::get("/users/1/items"));
        assert!(matches!(result, Err(TransportFailure::NoConnection(_))));
        assert!(transport.last_error().is_some());
    }
}
