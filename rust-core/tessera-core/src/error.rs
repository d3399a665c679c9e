//! # Error Handling
//!
//! Centralized error types for Tessera core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Every error knows the HTTP status it maps to, so the dispatch pipeline can
//! funnel all per-request failures into a single response handler.

use crate::router::Method;
use crate::validation::ValidationError;
use hyper::StatusCode;
use thiserror::Error;

/// Boxed error used as the cause of an [`Error::Http`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Tessera runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// No endpoint matches the request method and path
    #[error("No route found for {method} {path}")]
    RouteNotFound {
        /// Request method as received
        method: String,
        /// The path that wasn't matched
        path: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Two endpoints were registered for the same method and pattern
    #[error("Duplicate route: {method} {pattern}")]
    DuplicateRoute {
        /// The conflicting method
        method: Method,
        /// Compiled pattern source
        pattern: String,
    },

    /// A dependency token could not be resolved
    #[error("No provider registered for token '{token}'")]
    ProviderNotFound {
        /// The requested token
        token: String,
    },

    /// Misconfigured application (bad schema, controller wiring, ...)
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// Query or body payload rejected by the validator
    #[error("Bad Request: {0}")]
    Validation(#[from] ValidationError),

    /// Error carrying an explicit HTTP status (body parsing, auth, handlers)
    #[error("{message}")]
    Http {
        /// Status code sent to the client
        status: StatusCode,
        /// Human-readable message, written as the default response body
        message: String,
        /// Underlying cause
        #[source]
        source: Option<BoxError>,
    },

    /// Unexpected failure inside a handler
    #[error("Internal Server Error: {0}")]
    Internal(#[from] anyhow::Error),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an error with an explicit status code
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a 400 error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    /// Shorthand for a 401 error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(StatusCode::UNAUTHORIZED, message)
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Attach a cause to an [`Error::Http`]; other variants are returned unchanged
    #[must_use]
    pub fn with_source(self, cause: impl Into<BoxError>) -> Self {
        match self {
            Self::Http {
                status, message, ..
            } => Self::Http {
                status,
                message,
                source: Some(cause.into()),
            },
            other => other,
        }
    }

    /// HTTP status this error is reported with
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Http { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error is attributable to the client (4xx)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Keep structured HTTP errors as they are and turn anything else into a 400
    ///
    /// Used for failures raised while acquiring a request body.
    #[must_use]
    pub fn into_client_error(self) -> Self {
        match self {
            err @ (Self::Http { .. } | Self::Validation(_)) => err,
            other => Self::http(StatusCode::BAD_REQUEST, other.to_string()).with_source(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;
    use crate::validation::{ValidationCode, ValidationError};

    #[test]
    fn test_route_not_found_error() {
        let err = Error::RouteNotFound {
            method: "DELETE".to_string(),
            path: "/unknown".to_string(),
        };
        assert!(err.to_string().contains("/unknown"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: Error =
            ValidationError::new("body.name", None, rules::string().into(), ValidationCode::Required)
                .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("body.name"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_http_error_keeps_status_and_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::http(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").with_source(io_err);
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.to_string(), "Payload Too Large");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_into_client_error() {
        let passthrough = Error::http(StatusCode::UNSUPPORTED_MEDIA_TYPE, "gzip").into_client_error();
        assert_eq!(passthrough.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "aborted");
        let wrapped = Error::from(io_err).into_client_error();
        assert_eq!(wrapped.status(), StatusCode::BAD_REQUEST);
    }
}
