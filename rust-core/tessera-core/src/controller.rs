//! # Controllers
//!
//! A controller groups endpoints under a path prefix and is constructed per
//! request through the [`Injector`]. Handlers receive the controller instance
//! and the validated [`RequestContext`]:
//!
//! ```ignore
//! struct Users { repo: Arc<UserRepo> }
//!
//! let users = Controller::new("/users", |inj| Ok(Users { repo: inj.get("repo")? }))
//!     .depends_on(["repo"])
//!     .endpoint(Endpoint::get("/{id:int}"), |users, ctx| async move {
//!         users.repo.find(ctx.param(0)).await
//!     });
//! ```

use crate::body::Body;
use crate::cookies::{Cookie, Cookies};
use crate::error::{Error, Result};
use crate::injector::Injector;
use crate::route::{Endpoint, EndpointDescriptor};
use crate::router::Method;
use crate::value::Value;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use hyper::HeaderMap;
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased controller instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Builds the controller instance for one request
pub type ControllerFactory = Arc<dyn Fn(&Injector) -> Result<Instance> + Send + Sync>;

/// Type-erased endpoint handler
pub type Handler = Arc<dyn Fn(Instance, RequestContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Everything a handler learns about the request
#[derive(Debug)]
pub struct RequestContext {
    /// Request method
    pub method: Method,
    /// Result of the endpoint's auth hook (`Null` without one)
    pub auth: Value,
    /// Validated query object
    pub query: Value,
    /// Validated body
    pub body: Body,
    /// Positional path captures
    pub params: Vec<Option<String>>,
    /// Request headers
    pub headers: HeaderMap,
    /// Parsed cookies
    pub cookies: Cookies,
}

impl RequestContext {
    /// Positional path capture
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(Option::as_deref)
    }

    /// Query field
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&Value> {
        self.query.get(name)
    }

    /// Parsed body value, if the body was read
    #[must_use]
    pub fn body_value(&self) -> Option<&Value> {
        self.body.value()
    }

    /// Take the body out of the context (e.g. a stream)
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Header value as text
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Cookie by name
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }
}

/// Declared controller: prefix, factory, dependency tokens and endpoints
#[must_use]
pub struct Controller<C> {
    prefix: String,
    factory: ControllerFactory,
    dependencies: Vec<String>,
    endpoints: Vec<(Endpoint, Handler)>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> Controller<C> {
    /// Declare a controller mounted at `prefix`
    pub fn new<F>(prefix: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Injector) -> Result<C> + Send + Sync + 'static,
    {
        let factory: ControllerFactory = Arc::new(move |injector: &Injector| {
            factory(injector).map(|controller| Arc::new(controller) as Instance)
        });
        Self {
            prefix: prefix.into(),
            factory,
            dependencies: Vec::new(),
            endpoints: Vec::new(),
            _controller: PhantomData,
        }
    }

    /// Declare the injector tokens the factory resolves
    ///
    /// Each token must be registered when the application is built.
    pub fn depends_on<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Attach an endpoint and its handler
    pub fn endpoint<F, Fut, R>(mut self, endpoint: Endpoint, handler: F) -> Self
    where
        F: Fn(Arc<C>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Value> + Send + 'static,
    {
        let handler: Handler = Arc::new(
            move |instance: Instance, ctx: RequestContext| -> BoxFuture<'static, Result<Value>> {
                match instance.downcast::<C>() {
                    Ok(controller) => handler(controller, ctx).map(|r| r.map(Into::into)).boxed(),
                    Err(_) => future::ready(Err(Error::configuration(format!(
                        "controller instance is not a {}",
                        type_name::<C>()
                    ))))
                    .boxed(),
                }
            },
        );
        self.endpoints.push((endpoint, handler));
        self
    }

    /// Mount prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Declared dependency tokens
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Compile every endpoint, in declaration order
    ///
    /// # Errors
    ///
    /// Returns the first invalid route pattern or rule configuration.
    pub fn into_descriptors(self) -> Result<Vec<EndpointDescriptor>> {
        let Self {
            prefix,
            factory,
            endpoints,
            ..
        } = self;
        endpoints
            .into_iter()
            .map(|(endpoint, handler)| {
                endpoint.into_descriptor(&prefix, Arc::clone(&factory), handler)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::response::Response;

    struct Greeter {
        greeting: Arc<String>,
    }

    fn greeter() -> Controller<Greeter> {
        Controller::new("/greet", |inj: &Injector| {
            Ok(Greeter {
                greeting: inj.get("greeting")?,
            })
        })
        .depends_on(["greeting"])
        .endpoint(Endpoint::get("/{name}"), |greeter: Arc<Greeter>, ctx: RequestContext| async move {
            Ok(format!("{}, {}", greeter.greeting, ctx.param(0).unwrap_or("nobody")))
        })
    }

    fn context(params: Vec<Option<String>>) -> RequestContext {
        RequestContext {
            method: Method::Get,
            auth: Value::Null,
            query: Value::Object(crate::value::Map::new()),
            body: Body::Absent,
            params,
            headers: HeaderMap::new(),
            cookies: Cookies::new(),
        }
    }

    #[test]
    fn test_declaration() {
        let controller = greeter();
        assert_eq!(controller.prefix(), "/greet");
        assert_eq!(controller.dependencies(), ["greeting"]);

        let descriptors = controller.into_descriptors().unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].path, "/greet/{name}");
    }

    #[tokio::test]
    async fn test_factory_and_handler() {
        let descriptors = greeter().into_descriptors().unwrap();
        let endpoint = &descriptors[0];

        let injector = Injector::new()
            .provide("greeting", "Hello".to_string())
            .for_request(Arc::new(Request::new(hyper::Method::GET, "/greet/ada")), Response::new());
        let instance = (endpoint.controller)(&injector).unwrap();

        let result = (endpoint.handler)(instance, context(vec![Some("ada".into())]))
            .await
            .unwrap();
        assert_eq!(result, Value::from("Hello, ada"));
    }

    #[test]
    fn test_factory_error_propagates() {
        let descriptors = greeter().into_descriptors().unwrap();
        let err = (descriptors[0].controller)(&Injector::new()).unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound { .. }));
    }

    #[test]
    fn test_wrong_instance_type() {
        let descriptors = greeter().into_descriptors().unwrap();
        let wrong: Instance = Arc::new(5u8);
        let err = tokio_test::block_on((descriptors[0].handler)(wrong, context(Vec::new()))).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_invalid_pattern_fails_compile() {
        let controller = Controller::new("/bad", |_: &Injector| Ok(()))
            .endpoint(Endpoint::get("/{id"), |_: Arc<()>, _: RequestContext| async { Ok(Value::Null) });
        assert!(matches!(
            controller.into_descriptors(),
            Err(Error::InvalidRoutePattern { .. })
        ));
    }

    #[test]
    fn test_context_accessors() {
        let mut ctx = context(vec![None, Some("7".into())]);
        ctx.headers.insert("x-test", hyper::header::HeaderValue::from_static("yes"));
        ctx.body = Body::Value(Value::from("payload"));

        assert_eq!(ctx.param(0), None);
        assert_eq!(ctx.param(1), Some("7"));
        assert_eq!(ctx.param(5), None);
        assert_eq!(ctx.header("x-test"), Some("yes"));
        assert_eq!(ctx.body_value(), Some(&Value::from("payload")));
        assert!(!ctx.take_body().is_absent());
        assert!(ctx.body.is_absent());
    }
}
