//! # Application
//!
//! The dispatch pipeline. One run per request:
//!
//! 1. global middleware
//! 2. route match (404 when nothing matches)
//! 3. endpoint middleware
//! 4. controller construction through the request-scoped injector
//! 5. authentication
//! 6. query validation (lenient)
//! 7. body acquisition
//! 8. body validation
//! 9. handler
//! 10. response emission
//!
//! Every failure in steps 1–9 is caught once and handed to the resolved
//! response handler (the endpoint override, else the application default).

use crate::body::{self, Body};
use crate::config::ServerConfig;
use crate::controller::{Controller, RequestContext};
use crate::cookies;
use crate::error::{Error, Result};
use crate::injector::{Injector, REQUEST, RESPONSE};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareResult};
use crate::request::{Request, RequestBody};
use crate::response::{default_handler, Response, ResponseHandler};
use crate::route::EndpointDescriptor;
use crate::router::{Method, RouteTable};
use crate::validator::{validate_rule, Mode};
use crate::value::Value;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Collects controllers, middleware and providers, then builds the route table
#[must_use]
pub struct ApplicationBuilder {
    endpoints: Vec<EndpointDescriptor>,
    dependencies: Vec<(String, String)>,
    middleware: MiddlewareChain,
    injector: Injector,
    response_handler: ResponseHandler,
    config: ServerConfig,
    errors: Vec<Error>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            dependencies: Vec::new(),
            middleware: MiddlewareChain::new(),
            injector: Injector::new(),
            response_handler: default_handler(),
            config: ServerConfig::default(),
            errors: Vec::new(),
        }
    }
}

impl ApplicationBuilder {
    /// Register a controller and its endpoints
    pub fn controller<C: Send + Sync + 'static>(mut self, controller: Controller<C>) -> Self {
        let prefix = controller.prefix().to_string();
        self.dependencies.extend(
            controller
                .dependencies()
                .iter()
                .map(|token| (prefix.clone(), token.clone())),
        );
        match controller.into_descriptors() {
            Ok(descriptors) => self.endpoints.extend(descriptors),
            Err(err) => self.errors.push(err),
        }
        self
    }

    /// Append a global middleware, run before route matching
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.add(middleware);
        self
    }

    /// Register a shared value under `token`
    pub fn provide<T: Send + Sync + 'static>(mut self, token: impl Into<String>, value: T) -> Self {
        self.injector = self.injector.provide(token, value);
        self
    }

    /// Register a factory under `token`
    pub fn provide_factory<T, F>(mut self, token: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Injector) -> Result<T> + Send + Sync + 'static,
    {
        self.injector = self.injector.provide_factory(token, factory);
        self
    }

    /// Replace the default response handler
    pub fn response_handler(mut self, handler: ResponseHandler) -> Self {
        self.response_handler = handler;
        self
    }

    /// Server configuration (bind address, body limit, ...)
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the application
    ///
    /// # Errors
    ///
    /// Fails on the first invalid route pattern or rule, an undeclared
    /// dependency token, or a duplicate route.
    pub fn build(self) -> Result<Application> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        for (prefix, token) in &self.dependencies {
            let reserved = token == REQUEST || token == RESPONSE;
            if !reserved && !self.injector.contains(token) {
                debug!(controller = %prefix, token = %token, "Unresolvable controller dependency");
                return Err(Error::ProviderNotFound {
                    token: token.clone(),
                });
            }
        }

        let routes = RouteTable::new(self.endpoints)?;
        for endpoint in routes.iter() {
            debug!(methods = ?endpoint.methods, path = %endpoint.path, "Route registered");
        }
        info!(routes = routes.len(), "Application built");

        Ok(Application {
            inner: Arc::new(Inner {
                routes,
                middleware: self.middleware,
                injector: self.injector,
                response_handler: self.response_handler,
                config: self.config,
            }),
        })
    }
}

struct Inner {
    routes: RouteTable,
    middleware: MiddlewareChain,
    injector: Injector,
    response_handler: ResponseHandler,
    config: ServerConfig,
}

/// Built application; cheap to clone and share between connections
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

impl Application {
    /// Start declaring an application
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// Route table in registration order
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Run the pipeline for one request
    pub async fn handle(&self, req: Request, body: RequestBody) -> Response {
        let req = Arc::new(req);
        let res = Response::new();
        let mut responder = Arc::clone(&self.inner.response_handler);

        match self.dispatch(&req, body, &res, &mut responder).await {
            Ok(Some(value)) => responder(&res, Ok(value)),
            Ok(None) => debug!(path = %req.path(), "Response completed by middleware"),
            Err(err) => responder(&res, Err(err)),
        }
        res
    }

    /// Run a request through the pipeline without a socket
    pub async fn test_request(&self, req: Request, body: impl Into<Bytes>) -> Response {
        self.handle(req, RequestBody::full(body)).await
    }

    /// Bind and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound.
    pub async fn serve(&self) -> Result<()> {
        crate::server::serve(self.clone()).await
    }

    /// Steps 1–9; `Ok(None)` when a middleware completed the response
    async fn dispatch(
        &self,
        req: &Arc<Request>,
        body: RequestBody,
        res: &Response,
        responder: &mut ResponseHandler,
    ) -> Result<Option<Value>> {
        let inner = &self.inner;

        if inner.middleware.run(req, res).await? == MiddlewareResult::Handled {
            return Ok(None);
        }

        let not_found = || Error::RouteNotFound {
            method: req.method().to_string(),
            path: req.path().to_string(),
        };
        let method = Method::from_http(req.method()).ok_or_else(not_found)?;
        let matched = inner.routes.find(method, req.path())?;
        let endpoint = matched.endpoint;
        debug!(method = %method, path = %req.path(), route = %endpoint.path, "Route matched");

        if let Some(handler) = &endpoint.response_handler {
            *responder = Arc::clone(handler);
        }

        if endpoint.middleware.run(req, res).await? == MiddlewareResult::Handled {
            return Ok(None);
        }

        let scoped = inner.injector.for_request(Arc::clone(req), res.clone());
        let controller = (endpoint.controller)(&scoped)?;

        let auth = match &endpoint.auth {
            Some(authenticator) => authenticator.authenticate(req, res).await?,
            None => Value::Null,
        };

        let query = validate_query(req, &endpoint)?;

        let body = body::acquire(req, body, endpoint.body_mode, inner.config.max_body_size)
            .await
            .map_err(Error::into_client_error)?;
        let body = validate_body(&endpoint, body)?;

        let ctx = RequestContext {
            method,
            auth,
            query,
            body,
            params: matched.params,
            headers: req.headers().clone(),
            cookies: cookies::from_headers(req.headers()),
        };

        (endpoint.handler)(controller, ctx).await.map(Some)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.inner.routes)
            .field("middleware", &self.inner.middleware.names())
            .field("injector", &self.inner.injector)
            .field("config", &self.inner.config)
            .finish()
    }
}

fn validate_query(req: &Request, endpoint: &EndpointDescriptor) -> Result<Value> {
    let raw = Value::Object(req.query_map());
    match &endpoint.query {
        Some(rule) => Ok(validate_rule(Some(&raw), rule, "query", Mode::Lenient)?.unwrap_or(Value::Null)),
        None => Ok(raw),
    }
}

fn validate_body(endpoint: &EndpointDescriptor, body: Body) -> Result<Body> {
    let Body::Value(value) = body else {
        return Ok(body);
    };
    if let Some(parser) = &endpoint.body_parser {
        return parser(value).map(Body::Value);
    }
    let Some(rule) = &endpoint.body_rule else {
        return Ok(Body::Value(value));
    };
    let mode = Mode::lenient_if(endpoint.body_mode.is_form());
    Ok(validate_rule(Some(&value), rule, "body", mode)?.map_or(Body::Absent, Body::Value))
}
