//! # HTTP Request
//!
//! The raw request handle shared by middleware, auth hooks and the injector
//! (`"REQUEST"`), and the request body kept apart from it so the handle stays
//! `Sync` while the body is consumed exactly once.

use crate::error::BoxError;
use crate::value::{Map, Value};
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method};
use std::fmt;
use std::net::SocketAddr;

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Immutable view of an inbound request (everything but the body)
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: Option<String>,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Create a request from a method and a URI (`/path?query`)
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method,
            path,
            query_string,
            headers: HeaderMap::new(),
            remote_addr: None,
        }
    }

    /// Create from hyper request parts
    #[must_use]
    pub fn from_parts(parts: Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query_string: parts.uri.query().map(String::from),
            headers: parts.headers,
            remote_addr,
        }
    }

    /// Add a header (invalid names or values are ignored)
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the peer address
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// HTTP method as received
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path (without query string)
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Query parameters as a flat string map (last value wins)
    #[must_use]
    pub fn query_map(&self) -> Map {
        parse_query_string(self.query_string.as_deref())
    }

    /// Request headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Correlation id, if one was assigned
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header(REQUEST_ID_HEADER)
    }

    /// Peer address (absent for in-process requests)
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Peer IP as a string, `"unknown"` when not connected over a socket
    #[must_use]
    pub fn client_ip(&self) -> String {
        self.remote_addr
            .map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
    }
}

/// Parse a query string into a flat map of strings
///
/// Handles URL decoding; for duplicate keys the last value wins.
#[must_use]
pub fn parse_query_string(query: Option<&str>) -> Map {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

/// Request body stream, consumed once by the body parser or handed to a
/// stream-mode handler
pub struct RequestBody(UnsyncBoxBody<Bytes, BoxError>);

impl RequestBody {
    /// Wrap any body
    pub fn new<B>(body: B) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(Into::into).boxed_unsync())
    }

    /// A body with no content
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// A fully buffered body
    #[must_use]
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self::new(Full::new(bytes.into()))
    }

    /// Unwrap the inner body
    #[must_use]
    pub fn into_inner(self) -> UnsyncBoxBody<Bytes, BoxError> {
        self.0
    }

    /// Buffer the whole body
    ///
    /// # Errors
    ///
    /// Returns the underlying stream error.
    pub async fn collect(self) -> std::result::Result<Bytes, BoxError> {
        Ok(self.0.collect().await?.to_bytes())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestBody(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&Value::from("1")));
        assert_eq!(result.get("limit"), Some(&Value::from("10")));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
        assert!(parse_query_string(Some("")).is_empty());
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York"));
        assert_eq!(result.get("name"), Some(&Value::from("John Doe")));
        assert_eq!(result.get("city"), Some(&Value::from("New York")));
    }

    #[test]
    fn test_parse_query_string_last_value_wins() {
        let result = parse_query_string(Some("tag=a&tag=b&flag"));
        assert_eq!(result.get("tag"), Some(&Value::from("b")));
        assert_eq!(result.get("flag"), Some(&Value::from("")));
    }

    #[test]
    fn test_request_new_splits_query() {
        let req = Request::new(Method::GET, "/users?active=1").with_header("X-Request-Id", "abc");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query_string(), Some("active=1"));
        assert_eq!(req.request_id(), Some("abc"));
        assert_eq!(req.client_ip(), "unknown");
    }

    #[tokio::test]
    async fn test_request_body_collect() {
        let body = RequestBody::full("hello");
        assert_eq!(body.collect().await.unwrap(), Bytes::from("hello"));
        assert!(RequestBody::empty().collect().await.unwrap().is_empty());
    }
}
