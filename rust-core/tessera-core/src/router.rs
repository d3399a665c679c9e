//! # Route Table
//!
//! Ordered list of compiled endpoints, scanned in registration order.
//!
//! The first endpoint whose pattern fully matches the path and whose method
//! set contains the request method wins; a GET endpoint also answers HEAD.
//! Registering two endpoints with the same method and compiled pattern is a
//! build-time error.

use crate::error::{Error, Result};
use crate::route::EndpointDescriptor;
use std::collections::HashSet;
use std::sync::Arc;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP DELETE
    Delete,
    /// HTTP PATCH
    Patch,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Map a hyper method; `None` for methods no endpoint can declare
    #[must_use]
    pub fn from_http(method: &hyper::Method) -> Option<Self> {
        match *method {
            hyper::Method::GET => Some(Self::Get),
            hyper::Method::POST => Some(Self::Post),
            hyper::Method::PUT => Some(Self::Put),
            hyper::Method::DELETE => Some(Self::Delete),
            hyper::Method::PATCH => Some(Self::Patch),
            hyper::Method::HEAD => Some(Self::Head),
            hyper::Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

/// Matched endpoint with its positional path captures
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The selected endpoint
    pub endpoint: Arc<EndpointDescriptor>,
    /// Captured groups in order; `None` for a group that did not participate
    pub params: Vec<Option<String>>,
}

/// Ordered, immutable set of endpoints
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    endpoints: Vec<Arc<EndpointDescriptor>>,
}

impl RouteTable {
    /// Build the table, preserving registration order
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateRoute` when two endpoints share a method and
    /// compiled pattern.
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Result<Self> {
        let mut seen: HashSet<(Method, String)> = HashSet::new();
        for endpoint in &endpoints {
            for method in &endpoint.methods {
                let key = (*method, endpoint.pattern.as_str().to_string());
                if !seen.insert(key) {
                    return Err(Error::DuplicateRoute {
                        method: *method,
                        pattern: endpoint.pattern.as_str().to_string(),
                    });
                }
            }
        }

        Ok(Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
        })
    }

    /// Find the endpoint for a request
    ///
    /// # Errors
    ///
    /// Returns `Error::RouteNotFound` when no endpoint matches, including a
    /// path that matches only under another method.
    pub fn find(&self, method: Method, path: &str) -> Result<RouteMatch> {
        self.endpoints
            .iter()
            .filter(|endpoint| endpoint.accepts(method))
            .find_map(|endpoint| {
                endpoint.captures(path).map(|params| RouteMatch {
                    endpoint: Arc::clone(endpoint),
                    params,
                })
            })
            .ok_or_else(|| Error::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    /// Endpoints in registration order
    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.iter().map(AsRef::as_ref)
    }

    /// Number of endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerFactory, Handler, Instance, RequestContext};
    use crate::injector::Injector;
    use crate::route::Endpoint;
    use crate::value::Value;
    use futures_util::FutureExt;

    fn descriptor(endpoint: Endpoint, prefix: &str, tag: &'static str) -> EndpointDescriptor {
        let controller: ControllerFactory = Arc::new(|_: &Injector| Ok(Arc::new(()) as Instance));
        let handler: Handler = Arc::new(move |_: Instance, _: RequestContext| {
            async move { Ok(Value::from(tag)) }.boxed()
        });
        endpoint.into_descriptor(prefix, controller, handler).unwrap()
    }

    fn table(endpoints: Vec<EndpointDescriptor>) -> RouteTable {
        RouteTable::new(endpoints).unwrap()
    }

    #[test]
    fn test_basic_routing() {
        let routes = table(vec![
            descriptor(Endpoint::get("/"), "", "root"),
            descriptor(Endpoint::get("/"), "/users", "list"),
            descriptor(Endpoint::post("/"), "/users", "create"),
        ]);
        assert_eq!(routes.len(), 3);

        let m = routes.find(Method::Get, "/").unwrap();
        assert_eq!(m.endpoint.path, "/");
        let m = routes.find(Method::Get, "/users").unwrap();
        assert_eq!(m.endpoint.methods, [Method::Get]);
        let m = routes.find(Method::Post, "/Users/").unwrap();
        assert_eq!(m.endpoint.methods, [Method::Post]);
    }

    #[test]
    fn test_path_parameters() {
        let routes = table(vec![
            descriptor(Endpoint::get("/{id}"), "/users", "one"),
            descriptor(Endpoint::get("/{user_id}/posts/{post_id:int}"), "/users", "post"),
        ]);

        let m = routes.find(Method::Get, "/users/123").unwrap();
        assert_eq!(m.params, [Some("123".to_string())]);

        let m = routes.find(Method::Get, "/users/456/posts/789").unwrap();
        assert_eq!(m.params, [Some("456".to_string()), Some("789".to_string())]);
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let routes = table(vec![descriptor(Endpoint::get("/tags/{name}"), "", "tag")]);
        let m = routes.find(Method::Get, "/tags/caf%C3%A9").unwrap();
        assert_eq!(m.params, [Some("café".to_string())]);
    }

    #[test]
    fn test_first_registered_wins() {
        let routes = table(vec![
            descriptor(Endpoint::get("/{name}"), "/users", "param"),
            descriptor(Endpoint::get("/me"), "/users", "me"),
        ]);
        let m = routes.find(Method::Get, "/users/me").unwrap();
        assert_eq!(m.endpoint.path, "/users/{name}");
    }

    #[test]
    fn test_head_matches_get() {
        let routes = table(vec![descriptor(Endpoint::get("/health"), "", "health")]);
        assert!(routes.find(Method::Head, "/health").is_ok());
        assert!(routes.find(Method::Options, "/health").is_err());
    }

    #[test]
    fn test_method_not_allowed_is_not_found() {
        let routes = table(vec![descriptor(Endpoint::get("/users"), "", "list")]);
        let err = routes.find(Method::Delete, "/users").unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { ref method, .. } if method == "DELETE"));
    }

    #[test]
    fn test_route_not_found() {
        let routes = RouteTable::default();
        assert!(routes.is_empty());
        assert!(routes.find(Method::Get, "/nonexistent").is_err());
    }

    #[test]
    fn test_duplicate_route() {
        let err = RouteTable::new(vec![
            descriptor(Endpoint::get("/users"), "", "a"),
            descriptor(Endpoint::get("/"), "/users", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { method: Method::Get, .. }));

        let ok = RouteTable::new(vec![
            descriptor(Endpoint::get("/users"), "", "a"),
            descriptor(Endpoint::post("/users"), "", "b"),
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_method_from_http() {
        assert_eq!(Method::from_http(&hyper::Method::PATCH), Some(Method::Patch));
        assert_eq!(Method::from_http(&hyper::Method::TRACE), None);
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }
}
