//! # HTTP Response
//!
//! A cloneable handle to the response under construction. Middleware, auth
//! hooks, controllers (through the `"RESPONSE"` token) and the response
//! handler all write to the same state; the server converts it to a hyper
//! response once the pipeline is done.

use crate::error::Result;
use crate::value::Value;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
        }
    }
}

/// Shared, mutable response handle
#[derive(Clone, Default)]
pub struct Response {
    state: Arc<Mutex<ResponseState>>,
}

impl Response {
    /// Create an empty 200 response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    /// Set status code
    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = status;
    }

    /// Get a header value by name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    /// Set or override a header (invalid names or values are ignored)
    pub fn set_header(&self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.lock().headers.insert(n, v);
        }
    }

    /// Snapshot of the headers
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    /// Current body
    #[must_use]
    pub fn body(&self) -> Bytes {
        self.lock().body.clone()
    }

    /// Body decoded as UTF-8 (lossy)
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    /// Write the body and mark the response finished
    pub fn send(&self, body: impl Into<Bytes>) {
        let mut state = self.lock();
        state.body = body.into();
        state.finished = true;
    }

    /// Write a plain-text body
    pub fn text(&self, body: impl Into<String>) {
        self.set_header("content-type", "text/plain; charset=utf-8");
        self.send(body.into());
    }

    /// Write a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the value cannot be serialized.
    pub fn json(&self, value: &Value) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.set_header("content-type", "application/json");
        self.send(body);
        Ok(())
    }

    /// Whether a body has been sent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Convert to hyper Response
    #[must_use]
    pub fn into_hyper(&self) -> hyper::Response<Full<Bytes>> {
        let state = self.lock();
        let mut response = hyper::Response::new(Full::new(state.body.clone()));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers.clone();
        response
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("finished", &state.finished)
            .field("body_len", &state.body.len())
            .finish()
    }
}

/// Final step of every request: receives the handler's result or the single
/// error caught anywhere in the pipeline
pub type ResponseHandler = Arc<dyn Fn(&Response, Result<Value>) + Send + Sync>;

/// Default response handler
///
/// Errors set their status and write their message as plain text. Results
/// are written verbatim: strings as text, bytes raw, `Null` as an empty
/// body, anything else as JSON. A response the handler already finished is
/// left untouched.
pub fn default_response_handler(res: &Response, result: Result<Value>) {
    if res.is_finished() {
        if let Err(err) = result {
            warn!(error = %err, "Error after response was already sent");
        }
        return;
    }

    match result {
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                error!(error = %err, status = status.as_u16(), "Request failed");
            } else {
                warn!(error = %err, status = status.as_u16(), "Request rejected");
            }
            res.set_status(status);
            res.text(err.to_string());
        }
        Ok(Value::Null) => res.send(Bytes::new()),
        Ok(Value::String(text)) => res.text(text),
        Ok(Value::Bytes(bytes)) => {
            if res.header(CONTENT_TYPE.as_str()).is_none() {
                res.set_header(CONTENT_TYPE.as_str(), "application/octet-stream");
            }
            res.send(bytes);
        }
        Ok(value) => {
            if let Err(err) = res.json(&value) {
                default_response_handler(res, Err(err));
            }
        }
    }
}

/// The default handler as a [`ResponseHandler`]
#[must_use]
pub fn default_handler() -> ResponseHandler {
    Arc::new(default_response_handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn test_clones_share_state() {
        let res = Response::new();
        let other = res.clone();
        other.set_status(StatusCode::CREATED);
        other.set_header("x-test", "1");
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.header("X-Test").as_deref(), Some("1"));
    }

    #[test]
    fn test_default_handler_error() {
        let res = Response::new();
        default_response_handler(&res, Err(Error::http(StatusCode::NOT_FOUND, "Not Found")));
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body_text(), "Not Found");
        assert!(res.header("content-type").unwrap().starts_with("text/plain"));
    }

    #[test]
    fn test_default_handler_json() {
        let res = Response::new();
        default_response_handler(&res, Ok(Value::from(json!({"ok": true}))));
        assert_eq!(res.body_text(), r#"{"ok":true}"#);
        assert_eq!(res.header("content-type").as_deref(), Some("application/json"));
    }

    #[test]
    fn test_default_handler_text_and_null() {
        let res = Response::new();
        default_response_handler(&res, Ok(Value::from("hi")));
        assert_eq!(res.body_text(), "hi");

        let res = Response::new();
        default_response_handler(&res, Ok(Value::Null));
        assert!(res.body().is_empty());
        assert!(res.is_finished());
    }

    #[test]
    fn test_default_handler_leaves_finished_response() {
        let res = Response::new();
        res.set_status(StatusCode::ACCEPTED);
        res.send("done");
        default_response_handler(&res, Err(Error::bad_request("late")));
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(res.body_text(), "done");
    }

    #[test]
    fn test_into_hyper() {
        let res = Response::new();
        res.set_status(StatusCode::IM_A_TEAPOT);
        res.text("short and stout");
        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), StatusCode::IM_A_TEAPOT);
        assert!(hyper_res.headers().contains_key("content-type"));
    }
}
