//! # Authentication
//!
//! Per-endpoint auth hooks. The value an [`Authenticator`] resolves to is
//! handed to the handler as `auth`; an error aborts the request.

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::value::Value;
use async_trait::async_trait;
use hyper::header::AUTHORIZATION;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::warn;

/// Auth hook invoked with the request and response
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve the caller's identity
    async fn authenticate(&self, req: &Request, res: &Response) -> Result<Value>;
}

/// HS256 bearer-token authenticator; resolves to the token's claims
#[derive(Clone)]
pub struct JwtAuth {
    /// JWT decoding key
    decoding_key: DecodingKey,
    /// JWT validation settings
    validation: Validation,
}

impl JwtAuth {
    /// Create auth config from shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Replace the validation settings (algorithms, audience, leeway, ...)
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Validate a raw token
    ///
    /// # Errors
    ///
    /// Returns a 401 error if the token is invalid or expired.
    pub fn verify(&self, token: &str) -> Result<Value> {
        decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)
            .map(|data| Value::from(data.claims))
            .map_err(|err| {
                warn!("JWT validation failed: {}", err);
                Error::unauthorized("Unauthorized").with_source(err)
            })
    }
}

#[async_trait]
impl Authenticator for JwtAuth {
    async fn authenticate(&self, req: &Request, _res: &Response) -> Result<Value> {
        let token = req
            .header(AUTHORIZATION.as_str())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| Error::unauthorized("Missing or invalid Authorization header"))?;
        self.verify(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Method, StatusCode};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(exp_offset: i64) -> String {
        let claims = json!({"sub": "user-1", "exp": chrono::Utc::now().timestamp() + exp_offset});
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let auth = JwtAuth::new(SECRET);
        let req = Request::new(Method::GET, "/me")
            .with_header("authorization", &format!("Bearer {}", token(3600)));
        let claims = auth.authenticate(&req, &Response::new()).await.unwrap();
        assert_eq!(claims.get("sub"), Some(&Value::from("user-1")));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let auth = JwtAuth::new(SECRET);
        let req = Request::new(Method::GET, "/me");
        let err = auth.authenticate(&req, &Response::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_or_forged_token() {
        let auth = JwtAuth::new(SECRET);
        let req = Request::new(Method::GET, "/me")
            .with_header("authorization", &format!("Bearer {}", token(-3600)));
        assert!(auth.authenticate(&req, &Response::new()).await.is_err());

        let other = JwtAuth::new("another-secret");
        let req = Request::new(Method::GET, "/me")
            .with_header("authorization", &format!("Bearer {}", token(3600)));
        let err = other.authenticate(&req, &Response::new()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
