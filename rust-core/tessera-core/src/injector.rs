//! # Dependency Injection
//!
//! Explicit token registry used to construct controllers.
//!
//! Providers are registered on the application builder, either as shared
//! values or as factories run on every resolution. Each request resolves
//! against a scoped view that adds two reserved entries:
//!
//! - `"REQUEST"`: the raw [`Request`]
//! - `"RESPONSE"`: the [`Response`] handle
//!
//! ```ignore
//! let injector = Injector::new()
//!     .provide("greeting", String::from("hello"))
//!     .provide_factory("counter", |_| Ok(AtomicUsize::new(0)));
//! let greeting: Arc<String> = injector.get("greeting")?;
//! ```

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reserved token for the raw request
pub const REQUEST: &str = "REQUEST";
/// Reserved token for the response handle
pub const RESPONSE: &str = "RESPONSE";

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Injector) -> Result<Instance> + Send + Sync>;

#[derive(Clone)]
enum Provider {
    Value(Instance),
    Factory(Factory),
}

/// Token → provider registry
///
/// Cloning is cheap: the registered providers are shared.
#[derive(Clone, Default)]
pub struct Injector {
    providers: Arc<HashMap<String, Provider>>,
    scoped: HashMap<String, Instance>,
}

impl Injector {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared value under `token`
    ///
    /// Overwrites any existing provider with the same token.
    #[must_use]
    pub fn provide<T: Send + Sync + 'static>(mut self, token: impl Into<String>, value: T) -> Self {
        Arc::make_mut(&mut self.providers).insert(token.into(), Provider::Value(Arc::new(value)));
        self
    }

    /// Register a factory under `token`, invoked on every resolution
    #[must_use]
    pub fn provide_factory<T, F>(mut self, token: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Self) -> Result<T> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |injector: &Self| {
            factory(injector).map(|value| Arc::new(value) as Instance)
        });
        Arc::make_mut(&mut self.providers).insert(token.into(), Provider::Factory(factory));
        self
    }

    /// Scoped view for one request with `"REQUEST"` and `"RESPONSE"` registered
    #[must_use]
    pub fn for_request(&self, request: Arc<Request>, response: Response) -> Self {
        let mut scoped: HashMap<String, Instance> = HashMap::with_capacity(2);
        scoped.insert(REQUEST.to_string(), request);
        scoped.insert(RESPONSE.to_string(), Arc::new(response));
        Self {
            providers: Arc::clone(&self.providers),
            scoped,
        }
    }

    /// Check if a token can be resolved
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.scoped.contains_key(token) || self.providers.contains_key(token)
    }

    /// Registered tokens, reserved ones included when scoped
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.scoped
            .keys()
            .chain(self.providers.keys())
            .map(String::as_str)
    }

    fn instance(&self, token: &str) -> Result<Option<Instance>> {
        if let Some(instance) = self.scoped.get(token) {
            return Ok(Some(Arc::clone(instance)));
        }
        match self.providers.get(token) {
            None => Ok(None),
            Some(Provider::Value(instance)) => Ok(Some(Arc::clone(instance))),
            Some(Provider::Factory(factory)) => factory(self).map(Some),
        }
    }

    /// Resolve `token` as a `T`
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderNotFound` for an unknown token and a
    /// configuration error when the provider holds another type.
    pub fn get<T: Send + Sync + 'static>(&self, token: &str) -> Result<Arc<T>> {
        self.get_optional(token)?.ok_or_else(|| Error::ProviderNotFound {
            token: token.to_string(),
        })
    }

    /// Resolve `token`, yielding `None` when nothing is registered
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the provider holds another type,
    /// or the factory's own error.
    pub fn get_optional<T: Send + Sync + 'static>(&self, token: &str) -> Result<Option<Arc<T>>> {
        let Some(instance) = self.instance(token)? else {
            return Ok(None);
        };
        instance.downcast::<T>().map(Some).map_err(|_| {
            Error::configuration(format!(
                "provider '{token}' does not hold a {}",
                type_name::<T>()
            ))
        })
    }

    /// Resolve `token`, substituting `default` when nothing is registered
    ///
    /// # Errors
    ///
    /// Same as [`Injector::get_optional`].
    pub fn get_or<T: Send + Sync + 'static>(&self, token: &str, default: T) -> Result<Arc<T>> {
        Ok(self
            .get_optional(token)?
            .unwrap_or_else(|| Arc::new(default)))
    }

    /// The current request (scoped injectors only)
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderNotFound` outside a request scope.
    pub fn request(&self) -> Result<Arc<Request>> {
        self.get(REQUEST)
    }

    /// The current response handle (scoped injectors only)
    ///
    /// # Errors
    ///
    /// Returns `Error::ProviderNotFound` outside a request scope.
    pub fn response(&self) -> Result<Response> {
        self.get::<Response>(RESPONSE).map(|res| res.as_ref().clone())
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = self.tokens().collect();
        tokens.sort_unstable();
        f.debug_struct("Injector").field("tokens", &tokens).finish()
    }
}
