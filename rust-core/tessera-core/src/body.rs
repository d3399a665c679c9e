//! # Body Acquisition
//!
//! Turns the raw request body into a [`Value`] according to the endpoint's
//! declared [`BodyMode`], or hands the stream through untouched.
//!
//! JSON is parsed with simd-json; forms with `serde_urlencoded`; multipart
//! bodies are buffered and split with `multer`.
//!
//! Failures carry an explicit status: 400 for a missing or mismatched content
//! type, a malformed payload or an aborted read; 413 when the body exceeds the
//! limit; 415 for a `Content-Encoding` other than `identity`.

use crate::error::{BoxError, Error, Result};
use crate::request::{Request, RequestBody};
use crate::value::{Map, Value};
use bytes::Bytes;
use futures_util::stream;
use http_body_util::{BodyExt, Collected, LengthLimitError, Limited};
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// How an endpoint wants its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
    /// `application/json` (or `+json`) parsed into a value
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` parsed into an object of strings
    Urlencoded,
    /// `multipart/form-data` parsed into fields and files
    Multipart,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Raw,
    /// The unread stream
    Stream,
}

impl BodyMode {
    /// Whether values arrive as strings (validated leniently)
    #[must_use]
    pub fn is_form(self) -> bool {
        matches!(self, Self::Urlencoded | Self::Multipart)
    }
}

/// Acquired request body
#[derive(Default)]
pub enum Body {
    /// No body (bodiless method or empty payload)
    #[default]
    Absent,
    /// Parsed body
    Value(Value),
    /// Unread stream (`BodyMode::Stream`)
    Stream(RequestBody),
}

impl Body {
    /// Parsed value, if any
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Take the stream out of a stream-mode body
    #[must_use]
    pub fn into_stream(self) -> Option<RequestBody> {
        match self {
            Self::Stream(body) => Some(body),
            _ => None,
        }
    }

    /// Check for `Absent`
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("Absent"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn expect_type(content_type: Option<&str>, accepts: impl Fn(&str) -> bool, wanted: &str) -> Result<()> {
    match content_type.map(essence) {
        Some(ct) if accepts(&ct) => Ok(()),
        Some(ct) => Err(Error::bad_request(format!(
            "Unsupported Content-Type '{ct}', expected {wanted}"
        ))),
        None => Err(Error::bad_request(format!(
            "Missing Content-Type, expected {wanted}"
        ))),
    }
}

async fn read_limited(body: RequestBody, limit: usize) -> Result<Bytes> {
    // Boxed as `dyn Future + Send` to work around a rustc higher-ranked
    // lifetime inference bug when this future is awaited inside `tokio::spawn`
    let collecting: Pin<Box<dyn Future<Output = std::result::Result<Collected<Bytes>, BoxError>> + Send>> =
        Box::pin(Limited::new(body.into_inner(), limit).collect());
    match collecting.await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(Error::http(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"))
        }
        Err(err) => Err(Error::bad_request("Request body could not be read").with_source(err)),
    }
}

/// Acquire the body of `req` in `mode`, reading at most `limit` bytes
///
/// # Errors
///
/// Returns an [`Error::Http`] with status 400, 413 or 415.
pub async fn acquire(req: &Request, body: RequestBody, mode: BodyMode, limit: usize) -> Result<Body> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(Body::Absent);
    }
    if mode == BodyMode::Stream {
        return Ok(Body::Stream(body));
    }

    if let Some(encoding) = req.header(CONTENT_ENCODING.as_str()) {
        if !encoding.trim().eq_ignore_ascii_case("identity") {
            return Err(Error::http(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Unsupported Content-Encoding '{encoding}'"),
            ));
        }
    }
    let declared = req
        .header(CONTENT_LENGTH.as_str())
        .and_then(|len| len.trim().parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(Error::http(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
    }

    let bytes = read_limited(body, limit).await?;
    let content_type = req.header(CONTENT_TYPE.as_str());
    if bytes.is_empty() && content_type.is_none() {
        return Ok(Body::Absent);
    }
    debug!(mode = ?mode, len = bytes.len(), "Parsing request body");

    let value = match mode {
        BodyMode::Json => {
            expect_type(
                content_type,
                |ct| ct == "application/json" || ct.ends_with("+json"),
                "application/json",
            )?;
            parse_json(&bytes)?
        }
        BodyMode::Urlencoded => {
            expect_type(
                content_type,
                |ct| ct == "application/x-www-form-urlencoded",
                "application/x-www-form-urlencoded",
            )?;
            parse_form(&bytes)?
        }
        BodyMode::Multipart => {
            expect_type(content_type, |ct| ct == "multipart/form-data", "multipart/form-data")?;
            parse_multipart(content_type.unwrap_or_default(), bytes).await?
        }
        BodyMode::Text => Value::String(
            String::from_utf8(bytes.to_vec())
                .map_err(|err| Error::bad_request("Request body is not valid UTF-8").with_source(err))?,
        ),
        BodyMode::Raw | BodyMode::Stream => Value::Bytes(bytes),
    };
    Ok(Body::Value(value))
}

/// Parse JSON bytes using simd-json
///
/// # Errors
///
/// Returns a 400 error if the bytes are not valid JSON.
pub fn parse_json(bytes: &[u8]) -> Result<Value> {
    let mut buffer = bytes.to_vec();
    simd_json::from_slice::<serde_json::Value>(&mut buffer)
        .map(Value::from)
        .map_err(|err| Error::bad_request(format!("Malformed JSON body: {err}")).with_source(err))
}

fn insert_repeated(map: &mut Map, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = std::mem::take(existing);
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Parse an urlencoded form; repeated keys become arrays
///
/// # Errors
///
/// Returns a 400 error for malformed input.
pub fn parse_form(bytes: &[u8]) -> Result<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)
        .map_err(|err| Error::bad_request("Malformed form body").with_source(err))?;
    let mut map = Map::new();
    for (key, value) in pairs {
        insert_repeated(&mut map, key, Value::String(value));
    }
    Ok(Value::Object(map))
}

fn multipart_error(err: multer::Error) -> Error {
    Error::bad_request(format!("Malformed multipart body: {err}")).with_source(err)
}

/// Split a buffered multipart body into fields (strings) and files
/// (`{filename, contentType, data}`); repeated names become arrays
///
/// # Errors
///
/// Returns a 400 error for a missing boundary or malformed parts.
pub async fn parse_multipart(content_type: &str, bytes: Bytes) -> Result<Value> {
    let boundary = multer::parse_boundary(content_type).map_err(multipart_error)?;
    let mut multipart = multer::Multipart::new(
        stream::once(async move { Ok::<_, Infallible>(bytes) }),
        boundary,
    );

    let mut map = Map::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let value = match field.file_name().map(String::from) {
            Some(filename) => {
                let content_type = field
                    .content_type()
                    .map_or_else(|| "application/octet-stream".to_string(), ToString::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                let mut file = Map::new();
                file.insert("filename".to_string(), Value::String(filename));
                file.insert("contentType".to_string(), Value::String(content_type));
                file.insert("data".to_string(), Value::Bytes(data));
                Value::Object(file)
            }
            None => Value::String(field.text().await.map_err(multipart_error)?),
        };
        insert_repeated(&mut map, name, value);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(content_type: Option<&str>) -> Request {
        let req = Request::new(Method::POST, "/upload");
        match content_type {
            Some(ct) => req.with_header("content-type", ct),
            None => req,
        }
    }

    async fn acquire_value(req: &Request, body: &'static str, mode: BodyMode) -> Result<Value> {
        match acquire(req, RequestBody::full(body), mode, 1024).await? {
            Body::Value(value) => Ok(value),
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_body() {
        let req = post(Some("application/json; charset=utf-8"));
        let value = acquire_value(&req, r#"{"name": "Al", "tags": [1, 2]}"#, BodyMode::Json)
            .await
            .unwrap();
        assert_eq!(value, Value::from(json!({"name": "Al", "tags": [1, 2]})));
    }

    #[tokio::test]
    async fn test_json_requires_content_type() {
        let err = acquire_value(&post(Some("text/plain")), "{}", BodyMode::Json)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = acquire_value(&post(None), "{}", BodyMode::Json).await.unwrap_err();
        assert!(err.to_string().contains("Missing Content-Type"));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let err = acquire_value(&post(Some("application/json")), "{nope", BodyMode::Json)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bodiless_methods_are_absent() {
        let req = Request::new(Method::GET, "/").with_header("content-type", "application/json");
        let body = acquire(&req, RequestBody::full("{}"), BodyMode::Json, 1024).await.unwrap();
        assert!(body.is_absent());
    }

    #[tokio::test]
    async fn test_empty_body_without_type_is_absent() {
        let body = acquire(&post(None), RequestBody::empty(), BodyMode::Json, 1024)
            .await
            .unwrap();
        assert!(body.is_absent());
    }

    #[tokio::test]
    async fn test_too_large() {
        let req = post(Some("text/plain"));
        let err = acquire(&req, RequestBody::full(vec![b'a'; 2048]), BodyMode::Text, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let req = post(Some("text/plain")).with_header("content-length", "4096");
        let err = acquire(&req, RequestBody::full("x"), BodyMode::Text, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unsupported_encoding() {
        let req = post(Some("application/json")).with_header("content-encoding", "gzip");
        let err = acquire(&req, RequestBody::full("{}"), BodyMode::Json, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_urlencoded_repeated_keys() {
        let req = post(Some("application/x-www-form-urlencoded"));
        let value = acquire_value(&req, "a=1&b=x+y&a=2", BodyMode::Urlencoded)
            .await
            .unwrap();
        assert_eq!(value, Value::from(json!({"a": ["1", "2"], "b": "x y"})));
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            hello\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            file body\r\n\
            --XYZ--\r\n";
        let req = post(Some("multipart/form-data; boundary=XYZ"));
        let value = acquire_value(&req, body, BodyMode::Multipart).await.unwrap();

        assert_eq!(value.get("title"), Some(&Value::from("hello")));
        let doc = value.get("doc").unwrap();
        assert_eq!(doc.get("filename"), Some(&Value::from("a.txt")));
        assert_eq!(doc.get("contentType"), Some(&Value::from("text/plain")));
        assert_eq!(doc.get("data"), Some(&Value::Bytes(Bytes::from("file body"))));
    }

    #[tokio::test]
    async fn test_multipart_without_boundary() {
        let req = post(Some("multipart/form-data"));
        let err = acquire_value(&req, "--x--", BodyMode::Multipart).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_text_raw_and_stream() {
        let req = post(Some("text/plain"));
        assert_eq!(
            acquire_value(&req, "plain", BodyMode::Text).await.unwrap(),
            Value::from("plain")
        );
        assert_eq!(
            acquire_value(&req, "raw", BodyMode::Raw).await.unwrap(),
            Value::Bytes(Bytes::from("raw"))
        );
        let body = acquire(&req, RequestBody::full("s"), BodyMode::Stream, 1024)
            .await
            .unwrap();
        let stream = body.into_stream().unwrap();
        assert_eq!(stream.collect().await.unwrap(), Bytes::from("s"));
    }
}
