//! # Endpoint Declaration
//!
//! [`Endpoint`] collects everything declared about one route before it is
//! attached to a controller; [`EndpointDescriptor`] is the compiled,
//! immutable record stored in the route table.
//!
//! Paths use `{name}` placeholders, optionally typed:
//!
//! - `{id}` matches one segment
//! - `{id:int}`, `{price:float}`, `{flag:bool}` restrict the segment
//! - `{*rest}` matches the remainder of the path (last segment only)
//!
//! Captures become positional params in declaration order. Matching is
//! case-insensitive, anchored, and tolerates one trailing slash.

use crate::auth::Authenticator;
use crate::body::BodyMode;
use crate::controller::{ControllerFactory, Handler};
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::response::ResponseHandler;
use crate::router::Method;
use crate::rules::{ArrayNested, RuleKind, RuleSlot, Schema, ValidationRule};
use crate::value::Value;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Custom body parser; supersedes schema coercion
pub type BodyParser = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Segment type specifier of a path placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Wildcard,
}

impl ParamType {
    fn from_specifier(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" | "str" | "string" => Some(Self::String),
            "int" | "integer" | "i64" => Some(Self::Int),
            "float" | "f64" | "number" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    fn capture(self) -> &'static str {
        match self {
            Self::String => "([^/]+)",
            Self::Int => r"(-?\d+)",
            Self::Float => r"(-?\d+(?:\.\d+)?)",
            Self::Bool => "(true|false|1|0)",
            Self::Wildcard => "(.*)",
        }
    }
}

/// Parse a `{name}` / `{name:type}` / `{*name}` segment
///
/// `Ok(None)` for a static segment.
fn parse_param_pattern(segment: &str) -> std::result::Result<Option<ParamType>, String> {
    let Some(inner) = segment.strip_prefix('{') else {
        if segment.contains(['{', '}']) {
            return Err(format!("unbalanced braces in segment '{segment}'"));
        }
        return Ok(None);
    };
    let inner = inner
        .strip_suffix('}')
        .ok_or_else(|| format!("unclosed placeholder '{segment}'"))?;

    if let Some(name) = inner.strip_prefix('*') {
        return if name.is_empty() {
            Err("wildcard needs a name".to_string())
        } else {
            Ok(Some(ParamType::Wildcard))
        };
    }

    let (name, specifier) = inner.split_once(':').unwrap_or((inner, ""));
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("invalid parameter name '{name}'"));
    }
    ParamType::from_specifier(specifier)
        .map(Some)
        .ok_or_else(|| format!("unknown parameter type '{specifier}'"))
}

/// Join a controller prefix and an endpoint path into a normalized location
///
/// Collapses repeated slashes and strips the trailing one (`"/"` stays).
#[must_use]
pub fn join_path(prefix: &str, path: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Compile a normalized location into its anchored, case-insensitive regex
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` for malformed placeholders or a
/// wildcard that is not the last segment.
pub fn compile_path(location: &str) -> Result<Regex> {
    let invalid = |reason: String| Error::InvalidRoutePattern {
        pattern: location.to_string(),
        reason,
    };

    let segments: Vec<&str> = location.split('/').filter(|s| !s.is_empty()).collect();
    let mut source = String::new();
    for (index, segment) in segments.iter().enumerate() {
        source.push('/');
        match parse_param_pattern(segment).map_err(invalid)? {
            Some(ParamType::Wildcard) if index + 1 != segments.len() => {
                return Err(invalid("wildcard must be the last segment".to_string()));
            }
            Some(param) => source.push_str(param.capture()),
            None => source.push_str(&regex::escape(segment)),
        }
    }

    let source = if source.is_empty() {
        "(?i)^/$".to_string()
    } else {
        format!("(?i)^(?:{source})/?$")
    };
    Regex::new(&source).map_err(|e| invalid(e.to_string()))
}

/// Reject empty alternative lists anywhere in a rule tree
fn check_rule(rule: &ValidationRule, path: &str) -> Result<()> {
    match &rule.kind {
        RuleKind::Array(array) => match &array.nested {
            Some(ArrayNested::Each(item)) => check_rule(item, &format!("{path}[]")),
            Some(ArrayNested::Positional(items)) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| check_rule(item, &format!("{path}[{i}]"))),
            None => Ok(()),
        },
        RuleKind::Object(object) => {
            if let Some(schema) = &object.schema {
                check_schema(schema, path)?;
            }
            object
                .nested
                .as_deref()
                .map_or(Ok(()), |nested| check_rule(nested, &format!("{path}.*")))
        }
        _ => Ok(()),
    }
}

fn check_schema(schema: &Schema, path: &str) -> Result<()> {
    for (name, slot) in schema.iter() {
        let field = format!("{path}.{name}");
        match slot {
            RuleSlot::Single(rule) => check_rule(rule, &field)?,
            RuleSlot::AnyOf(rules) if rules.is_empty() => {
                return Err(Error::configuration(format!(
                    "field '{field}' declares an empty list of alternative rules"
                )));
            }
            RuleSlot::AnyOf(rules) => {
                for rule in rules {
                    check_rule(rule, &field)?;
                }
            }
        }
    }
    Ok(())
}

/// Route declaration: methods, path, payload rules and per-route hooks
///
/// ```ignore
/// Endpoint::post("/users")
///     .body(Schema::new().field("name", rules::string().min(1)))
///     .middleware(LoggingMiddleware::new())
/// ```
#[must_use]
pub struct Endpoint {
    methods: Vec<Method>,
    path: String,
    query: Option<ValidationRule>,
    body_rule: Option<ValidationRule>,
    body_mode: BodyMode,
    body_parser: Option<BodyParser>,
    auth: Option<Arc<dyn Authenticator>>,
    middleware: MiddlewareChain,
    response_handler: Option<ResponseHandler>,
}

impl Endpoint {
    /// Endpoint answering `method` at `path`
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            methods: vec![method],
            path: path.into(),
            query: None,
            body_rule: None,
            body_mode: BodyMode::default(),
            body_parser: None,
            auth: None,
            middleware: MiddlewareChain::new(),
            response_handler: None,
        }
    }

    /// GET endpoint (also answers HEAD)
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST endpoint
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// PUT endpoint
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// DELETE endpoint
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// PATCH endpoint
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    /// HEAD endpoint
    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::Head, path)
    }

    /// OPTIONS endpoint
    pub fn options(path: impl Into<String>) -> Self {
        Self::new(Method::Options, path)
    }

    /// Answer an additional method at the same path
    pub fn method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Validate the query string against `schema`
    pub fn query(mut self, schema: Schema) -> Self {
        self.query = Some(schema.into_rule());
        self
    }

    /// Validate the body as an object against `schema`
    pub fn body(mut self, schema: Schema) -> Self {
        self.body_rule = Some(schema.into_rule());
        self
    }

    /// Validate the body against an arbitrary rule
    pub fn body_rule(mut self, rule: impl Into<ValidationRule>) -> Self {
        self.body_rule = Some(rule.into());
        self
    }

    /// How the body is acquired (JSON by default)
    pub fn body_mode(mut self, mode: BodyMode) -> Self {
        self.body_mode = mode;
        self
    }

    /// Replace rule-based body coercion with a custom parser
    pub fn body_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.body_parser = Some(Arc::new(parser));
        self
    }

    /// Authenticate requests before validation
    pub fn auth(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.auth = Some(Arc::new(authenticator));
        self
    }

    /// Append a middleware run after route matching
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.add(middleware);
        self
    }

    /// Override the application's response handler for this endpoint
    pub fn response_handler(mut self, handler: ResponseHandler) -> Self {
        self.response_handler = Some(handler);
        self
    }

    /// Compile under a controller prefix
    pub(crate) fn into_descriptor(
        self,
        prefix: &str,
        controller: ControllerFactory,
        handler: Handler,
    ) -> Result<EndpointDescriptor> {
        let path = join_path(prefix, &self.path);
        let pattern = compile_path(&path)?;
        for (label, rule) in [("query", &self.query), ("body", &self.body_rule)] {
            if let Some(rule) = rule {
                check_rule(rule, label)?;
            }
        }

        Ok(EndpointDescriptor {
            methods: self.methods,
            path,
            pattern,
            query: self.query,
            body_rule: self.body_rule,
            body_mode: self.body_mode,
            body_parser: self.body_parser,
            auth: self.auth,
            middleware: self.middleware,
            response_handler: self.response_handler,
            controller,
            handler,
        })
    }
}

/// Compiled route, immutable once the route table is built
pub struct EndpointDescriptor {
    /// Accepted methods
    pub methods: Vec<Method>,
    /// Normalized location (prefix + path)
    pub path: String,
    /// Anchored case-insensitive pattern
    pub pattern: Regex,
    /// Query rule (an object schema)
    pub query: Option<ValidationRule>,
    /// Body rule
    pub body_rule: Option<ValidationRule>,
    /// Body acquisition mode
    pub body_mode: BodyMode,
    /// Custom body parser
    pub body_parser: Option<BodyParser>,
    /// Auth hook
    pub auth: Option<Arc<dyn Authenticator>>,
    /// Endpoint middleware, run after the match
    pub middleware: MiddlewareChain,
    /// Response handler override
    pub response_handler: Option<ResponseHandler>,
    /// Owning controller factory
    pub controller: ControllerFactory,
    /// Type-erased handler
    pub handler: Handler,
}

impl EndpointDescriptor {
    /// Whether the endpoint answers `method` (GET also answers HEAD)
    #[must_use]
    pub fn accepts(&self, method: Method) -> bool {
        self.methods.contains(&method)
            || (method == Method::Head && self.methods.contains(&Method::Get))
    }

    /// Positional captures if `path` matches
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<Vec<Option<String>>> {
        let caps = self.pattern.captures(path)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| {
                    m.map(|m| {
                        urlencoding::decode(m.as_str())
                            .map_or_else(|_| m.as_str().to_string(), |s| s.into_owned())
                    })
                })
                .collect(),
        )
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("methods", &self.methods)
            .field("path", &self.path)
            .field("pattern", &self.pattern.as_str())
            .field("body_mode", &self.body_mode)
            .field("auth", &self.auth.is_some())
            .field("middleware", &self.middleware.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/users", "/"), "/users");
        assert_eq!(join_path("/", "/"), "/");
        assert_eq!(join_path("api//v1/", "items/{id}/"), "/api/v1/items/{id}");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn test_compile_simple() {
        let re = compile_path("/users").unwrap();
        assert!(re.is_match("/users"));
        assert!(re.is_match("/USERS/"));
        assert!(!re.is_match("/users/1"));
        assert!(!re.is_match("/api/users"));
    }

    #[test]
    fn test_compile_root() {
        let re = compile_path("/").unwrap();
        assert!(re.is_match("/"));
        assert!(!re.is_match("/x"));
    }

    #[test]
    fn test_typed_params() {
        let re = compile_path("/orders/{id:int}/status/{active:bool}").unwrap();
        assert!(re.is_match("/orders/42/status/true"));
        assert!(!re.is_match("/orders/abc/status/true"));
        assert!(!re.is_match("/orders/42/status/maybe"));

        let re = compile_path("/products/{price:float}").unwrap();
        assert!(re.is_match("/products/19.99"));
        assert!(re.is_match("/products/20"));
    }

    #[test]
    fn test_wildcard() {
        let re = compile_path("/files/{*path}").unwrap();
        let caps = re.captures("/files/a/b.txt").unwrap();
        assert_eq!(&caps[1], "a/b.txt");
        assert!(compile_path("/files/{*path}/x").is_err());
    }

    #[test]
    fn test_literals_are_escaped() {
        let re = compile_path("/v1.0/items").unwrap();
        assert!(re.is_match("/v1.0/items"));
        assert!(!re.is_match("/v1x0/items"));
    }

    #[test]
    fn test_invalid_patterns() {
        for pattern in ["/users/{id", "/users/{}", "/users/{id:uuid}", "/a{b}"] {
            let err = compile_path(pattern).unwrap_err();
            assert!(matches!(err, Error::InvalidRoutePattern { .. }), "{pattern}");
        }
    }

    #[test]
    fn test_empty_alternatives_rejected() {
        let rule = Schema::new()
            .field("id", RuleSlot::AnyOf(Vec::new()))
            .into_rule();
        let err = check_rule(&rule, "body").unwrap_err();
        assert!(err.to_string().contains("body.id"));

        let nested: ValidationRule = rules::array()
            .each(Schema::new().field("tag", RuleSlot::AnyOf(Vec::new())).into_rule())
            .into();
        assert!(check_rule(&nested, "body").is_err());

        let fine = Schema::new()
            .field("id", RuleSlot::any_of([rules::number(), rules::number()]))
            .into_rule();
        assert!(check_rule(&fine, "query").is_ok());
    }
}
