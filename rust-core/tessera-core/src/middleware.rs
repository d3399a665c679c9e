//! # Middleware System
//!
//! Request interception for logging, CORS, rate limiting, etc.
//!
//! Middlewares run in registration order with the raw request and the shared
//! response handle. A middleware that completes the response itself returns
//! [`MiddlewareResult::Handled`], which halts the pipeline without an error;
//! an `Err` goes to the response handler like any other failure.

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use hyper::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

/// Middleware trait for request interception
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspect the request, optionally completing the response
    async fn handle(&self, req: &Request, res: &Response) -> Result<MiddlewareResult>;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// The response is complete; stop processing
    Handled,
}

/// Ordered middleware list
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Add an already shared middleware
    pub fn add_shared(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Run every middleware in order until one handles the request
    ///
    /// # Errors
    ///
    /// Propagates the first middleware error.
    pub async fn run(&self, req: &Request, res: &Response) -> Result<MiddlewareResult> {
        for mw in &self.middlewares {
            if mw.handle(req, res).await? == MiddlewareResult::Handled {
                tracing::debug!(middleware = mw.name(), "Request handled by middleware");
                return Ok(MiddlewareResult::Handled);
            }
        }
        Ok(MiddlewareResult::Continue)
    }

    /// Names of the middlewares, in order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|mw| mw.name()).collect()
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Logging middleware - logs requests in structured JSON format
#[derive(Default)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, req: &Request, _res: &Response) -> Result<MiddlewareResult> {
        let request_id = req.request_id().unwrap_or("-");
        if self.log_headers {
            info!(
                method = %req.method(),
                path = %req.path(),
                request_id = %request_id,
                headers = ?req.headers(),
                "Request received"
            );
        } else {
            info!(
                method = %req.method(),
                path = %req.path(),
                request_id = %request_id,
                "Request received"
            );
        }
        Ok(MiddlewareResult::Continue)
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// CORS middleware - sets the CORS headers and answers preflight requests
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allowed origin
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Set allowed methods
    #[must_use]
    pub fn allow_methods(mut self, methods: impl Into<String>) -> Self {
        self.allow_methods = methods.into();
        self
    }

    /// Set allowed headers
    #[must_use]
    pub fn allow_headers(mut self, headers: impl Into<String>) -> Self {
        self.allow_headers = headers.into();
        self
    }

    /// Get the Access-Control-Allow-Origin header value
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.allow_origin
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn handle(&self, req: &Request, res: &Response) -> Result<MiddlewareResult> {
        res.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        res.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        res.set_header("Access-Control-Allow-Headers", &self.allow_headers);

        if *req.method() == Method::OPTIONS
            && req.header("access-control-request-method").is_some()
        {
            res.set_status(StatusCode::NO_CONTENT);
            res.send(Vec::new());
            return Ok(MiddlewareResult::Handled);
        }
        Ok(MiddlewareResult::Continue)
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

/// Token bucket rate limiting middleware, keyed by client IP
pub struct RateLimitMiddleware {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    /// Bucket count above which refilled buckets are swept
    max_tracked: usize,
    /// Per-key buckets
    state: Mutex<HashMap<String, Bucket>>,
}

/// Default bucket count before a sweep
const MAX_TRACKED_KEYS: usize = 1024;

/// Internal token bucket state
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl Bucket {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn refill(&mut self, now: Instant, capacity: u64, refill_per_sec: u64) {
        let elapsed = now.duration_since(self.last_refill);
        let refill = (elapsed.as_secs_f64() * refill_per_sec as f64) as u64;
        if refill > 0 {
            self.tokens = self.tokens.saturating_add(refill).min(capacity);
            self.last_refill = now;
        }
    }
}

impl RateLimitMiddleware {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            max_tracked: MAX_TRACKED_KEYS,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Sweep full buckets once more than `max` keys are tracked
    #[must_use]
    pub fn max_tracked(mut self, max: usize) -> Self {
        self.max_tracked = max;
        self
    }

    fn allow(&self, key: &str) -> bool {
        let mut map = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        if map.len() >= self.max_tracked && !map.contains_key(key) {
            // A full bucket is the same as a fresh one
            map.retain(|_, bucket| {
                bucket.refill(now, self.capacity, self.refill_per_sec);
                bucket.tokens < self.capacity
            });
        }
        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        bucket.refill(now, self.capacity, self.refill_per_sec);
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, req: &Request, res: &Response) -> Result<MiddlewareResult> {
        if self.allow(&req.client_ip()) {
            return Ok(MiddlewareResult::Continue);
        }
        res.set_status(StatusCode::TOO_MANY_REQUESTS);
        res.text("Rate limit exceeded");
        Ok(MiddlewareResult::Handled)
    }

    fn name(&self) -> &'static str {
        "RateLimitMiddleware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>, MiddlewareResult);

    #[async_trait]
    impl Middleware for Counting {
        async fn handle(&self, _req: &Request, _res: &Response) -> Result<MiddlewareResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(self.1)
        }
    }

    struct Failing;

    #[async_trait]
    impl Middleware for Failing {
        async fn handle(&self, _req: &Request, _res: &Response) -> Result<MiddlewareResult> {
            Err(Error::unauthorized("nope"))
        }
    }

    #[test]
    fn test_middleware_chain_empty() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_middleware_chain_add() {
        let mut chain = MiddlewareChain::new();
        chain.add(LoggingMiddleware::new());
        chain.add(CorsMiddleware::new());

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.names(), ["LoggingMiddleware", "CorsMiddleware"]);
    }

    #[tokio::test]
    async fn test_chain_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::new();
        chain.add(Counting(Arc::clone(&calls), MiddlewareResult::Continue));
        chain.add(Counting(Arc::clone(&calls), MiddlewareResult::Handled));
        chain.add(Counting(Arc::clone(&calls), MiddlewareResult::Continue));

        let req = Request::new(Method::GET, "/");
        let result = chain.run(&req, &Response::new()).await.unwrap();
        assert_eq!(result, MiddlewareResult::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chain_propagates_errors() {
        let mut chain = MiddlewareChain::new();
        chain.add(Failing);
        let req = Request::new(Method::GET, "/");
        let err = chain.run(&req, &Response::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_cors_middleware_default() {
        let mw = CorsMiddleware::new();
        assert_eq!(mw.origin(), "*");
    }

    #[test]
    fn test_cors_middleware_custom_origin() {
        let mw = CorsMiddleware::new().allow_origin("https://example.com");
        assert_eq!(mw.origin(), "https://example.com");
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let mw = CorsMiddleware::new();
        let res = Response::new();
        let req = Request::new(Method::OPTIONS, "/users")
            .with_header("access-control-request-method", "POST");
        assert_eq!(mw.handle(&req, &res).await.unwrap(), MiddlewareResult::Handled);
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.header("access-control-allow-origin").as_deref(), Some("*"));

        let res = Response::new();
        let req = Request::new(Method::GET, "/users");
        assert_eq!(mw.handle(&req, &res).await.unwrap(), MiddlewareResult::Continue);
        assert!(!res.is_finished());
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mw = RateLimitMiddleware::new(2, 0);
        let req = Request::new(Method::GET, "/");
        for _ in 0..2 {
            let res = Response::new();
            assert_eq!(mw.handle(&req, &res).await.unwrap(), MiddlewareResult::Continue);
        }
        let res = Response::new();
        assert_eq!(mw.handle(&req, &res).await.unwrap(), MiddlewareResult::Handled);
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    fn tracked(mw: &RateLimitMiddleware) -> usize {
        mw.state.lock().unwrap().len()
    }

    #[test]
    fn test_rate_limit_sweeps_refilled_buckets() {
        let mw = RateLimitMiddleware::new(1, 1000).max_tracked(2);
        assert!(mw.allow("10.0.0.1"));
        assert!(mw.allow("10.0.0.2"));
        assert_eq!(tracked(&mw), 2);

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(mw.allow("10.0.0.3"));
        assert_eq!(tracked(&mw), 1);
    }

    #[test]
    fn test_rate_limit_keeps_drained_buckets() {
        let mw = RateLimitMiddleware::new(1, 0).max_tracked(2);
        assert!(mw.allow("10.0.0.1"));
        assert!(mw.allow("10.0.0.2"));
        assert!(mw.allow("10.0.0.3"));
        assert_eq!(tracked(&mw), 3);
        assert!(!mw.allow("10.0.0.1"));
    }
}
