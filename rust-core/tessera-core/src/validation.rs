//! # Validation Errors
//!
//! The structured failure raised by the validator.
//!
//! A [`ValidationError`] pins down *where* (the dotted/bracketed property
//! path, e.g. `body.items[2].name`), *what* (the offending raw value) and
//! *why* (the rule slot that rejected it plus a machine-readable code).

use crate::rules::RuleSlot;
use crate::value::Value;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required value is missing
    Required,
    /// Value is of the wrong type or cannot be coerced
    InvalidType,
    /// Value is too short
    TooShort,
    /// Value is too long
    TooLong,
    /// Value is below minimum
    TooSmall,
    /// Value is above maximum
    TooLarge,
    /// Value doesn't match pattern
    InvalidFormat,
    /// Value is not in allowed set
    InvalidChoice,
    /// None of the alternative rules accepted the value
    NoMatchingRule,
}

/// A rejected value at a specific property path
#[derive(Debug, Clone, Error)]
pub struct ValidationError {
    /// Property path (e.g. `query.page`, `body.items[2].name`)
    pub path: String,
    /// The raw input that was rejected (`None` when absent)
    pub value: Option<Value>,
    /// The rule (or list of alternatives) that rejected it
    pub rule: RuleSlot,
    /// Machine-readable reason
    pub code: ValidationCode,
}

/// JSON shape of a validation error
#[derive(Serialize)]
struct ErrorBody<'a> {
    path: &'a str,
    code: ValidationCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(
        path: impl Into<String>,
        value: Option<Value>,
        rule: RuleSlot,
        code: ValidationCode,
    ) -> Self {
        Self {
            path: path.into(),
            value,
            rule,
            code,
        }
    }

    /// Human-readable description
    #[must_use]
    pub fn message(&self) -> String {
        let path = &self.path;
        match self.code {
            ValidationCode::Required => format!("{path} is required"),
            ValidationCode::InvalidType => {
                format!("{path} must be a valid {}", self.rule.describe())
            }
            ValidationCode::TooShort => format!("{path} is too short"),
            ValidationCode::TooLong => format!("{path} is too long"),
            ValidationCode::TooSmall => format!("{path} is below the allowed minimum"),
            ValidationCode::TooLarge => format!("{path} is above the allowed maximum"),
            ValidationCode::InvalidFormat => format!("{path} has an invalid format"),
            ValidationCode::InvalidChoice => format!("{path} is not one of the allowed values"),
            ValidationCode::NoMatchingRule => {
                format!("{path} does not match any of: {}", self.rule.describe())
            }
        }
    }

    /// Convert to JSON response body
    #[must_use]
    pub fn to_json(&self) -> String {
        let body = ErrorBody {
            path: &self.path,
            code: self.code,
            message: self.message(),
            value: self.value.as_ref(),
        };
        serde_json::to_string(&body).unwrap_or_else(|_| r#"{"code":"INVALID_TYPE"}"#.to_string())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;

    #[test]
    fn test_required_message() {
        let error = ValidationError::new(
            "body.email",
            None,
            rules::string().into(),
            ValidationCode::Required,
        );
        assert_eq!(error.path, "body.email");
        assert_eq!(error.to_string(), "body.email is required");
    }

    #[test]
    fn test_invalid_type_mentions_rule() {
        let error = ValidationError::new(
            "query.page",
            Some(Value::from("abc")),
            rules::number().into(),
            ValidationCode::InvalidType,
        );
        assert!(error.to_string().contains("number"));
    }

    #[test]
    fn test_to_json() {
        let error = ValidationError::new(
            "body.name",
            Some(Value::from("")),
            rules::string().min(1).into(),
            ValidationCode::TooShort,
        );
        let json = error.to_json();
        assert!(json.contains(r#""path":"body.name""#));
        assert!(json.contains("TOO_SHORT"));
        assert!(json.contains(r#""value":"""#));
    }

    #[test]
    fn test_absent_value_omitted_from_json() {
        let error = ValidationError::new(
            "body.name",
            None,
            rules::string().into(),
            ValidationCode::Required,
        );
        assert!(!error.to_json().contains("value"));
    }
}
