//! # Tessera Core
//!
//! Core runtime library for the Tessera framework.
//! Maps requests to controller handlers through declared routes, validates and
//! coerces query and body payloads against declarative rules, and serializes
//! the result back to the client.
//!
//! ## Architecture
//!
//! Requests flow through a single dispatch pipeline ([`Application`]):
//! global middleware, route match, endpoint middleware, controller
//! construction, authentication, query and body validation, handler, response
//! handler. Every failure is caught once and handed to the response handler.
//!
//! ## Modules
//!
//! - `value` - Dynamic value domain the validator works on
//! - `rules` - Declarative validation rules and schemas
//! - `validator` - Recursive rule evaluator
//! - `validation` - Structured validation errors
//! - `route` - Endpoint declaration and path compiling
//! - `router` - Ordered route table
//! - `controller` - Controllers, handlers, request context
//! - `injector` - Token-based dependency injection
//! - `body` - Body acquisition (JSON, forms, multipart, text, raw, stream)
//! - `cookies` - Cookie header parsing
//! - `middleware` - Request middleware system
//! - `auth` - Authentication hooks, JWT bearer auth
//! - `request` / `response` - Request handle, shared response, response handlers
//! - `application` - Application builder and dispatch pipeline
//! - `server` - HTTP server built on Hyper
//! - `config` - Server configuration
//! - `logging` - Tracing subscriber setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod application;
pub mod auth;
pub mod body;
pub mod config;
pub mod controller;
pub mod cookies;
pub mod error;
pub mod injector;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod rules;
pub mod server;
pub mod validation;
pub mod validator;
pub mod value;

pub use application::{Application, ApplicationBuilder};
pub use auth::{Authenticator, JwtAuth};
pub use body::{Body, BodyMode};
pub use config::ServerConfig;
pub use controller::{Controller, RequestContext};
pub use cookies::{Cookie, Cookies};
pub use error::{Error, Result};
pub use injector::Injector;
pub use logging::init_tracing;
pub use middleware::{
    CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareResult,
    RateLimitMiddleware,
};
pub use request::{Request, RequestBody};
pub use response::{default_handler, Response, ResponseHandler};
pub use route::Endpoint;
pub use router::{Method, RouteTable};
pub use rules::{RuleSlot, Schema, ValidationRule};
pub use validation::{ValidationCode, ValidationError, ValidationResult};
pub use validator::{validate, Mode};
pub use value::Value;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.1");
    }
}
