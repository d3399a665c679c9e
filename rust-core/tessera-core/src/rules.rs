//! # Validation Rules
//!
//! Declarative, typed descriptions of how to validate and coerce one value.
//!
//! Rules are built with the free functions of this module and converted into
//! a [`ValidationRule`] (or a [`RuleSlot`]) when a modifier is applied or when
//! they are placed in a [`Schema`]:
//!
//! ```ignore
//! use tessera_core::rules::{self, Schema};
//!
//! let schema = Schema::new()
//!     .field("name", rules::string().min(1).trim())
//!     .field("age", rules::number().integer().optional())
//!     .field("tags", rules::array().each(rules::string()).default_value(Vec::<String>::new()));
//! ```

use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Shared, debuggable closure
pub struct Callback<F: ?Sized>(Arc<F>);

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

impl<F: ?Sized> Deref for Callback<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.0
    }
}

/// Computes a default from the (absent or rejected) input and the rule
pub type DefaultFn = dyn Fn(Option<&Value>, &ValidationRule) -> Value + Send + Sync;
/// Post-coercion transform
pub type ParseFn = dyn Fn(Value) -> Value + Send + Sync;
/// Final string transform
pub type CustomFn = dyn Fn(String) -> String + Send + Sync;
/// Date bound evaluated at validation time
pub type DateFn = dyn Fn() -> DateTime<Utc> + Send + Sync;

/// Value adopted when the input is absent
#[derive(Debug, Clone)]
pub enum DefaultValue {
    /// Fixed value
    Literal(Value),
    /// Computed with `(value, rule)`
    Computed(Callback<DefaultFn>),
}

impl DefaultValue {
    /// Produce the default for `value` under `rule`
    #[must_use]
    pub fn resolve(&self, value: Option<&Value>, rule: &ValidationRule) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Computed(f) => f(value, rule),
        }
    }
}

/// A typed rule plus the `default` / `optional` / `parse` modifiers
#[derive(Debug, Clone)]
pub struct ValidationRule {
    /// Type-specific constraints
    pub kind: RuleKind,
    /// Value used when the input is absent
    pub default: Option<DefaultValue>,
    /// Absent input yields "no value" instead of an error
    pub optional: bool,
    /// Applied to the coerced value (or the adopted default)
    pub parse: Option<Callback<ParseFn>>,
}

impl ValidationRule {
    /// Wrap a rule kind with no modifiers
    #[must_use]
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            default: None,
            optional: false,
            parse: None,
        }
    }

    /// Mark the rule optional
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Use a literal default for absent input
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// Compute the default from `(value, rule)`
    #[must_use]
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Value>, &Self) -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Computed(Callback(Arc::new(f))));
        self
    }

    /// Transform the coerced value
    #[must_use]
    pub fn parse<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.parse = Some(Callback(Arc::new(f)));
        self
    }

    /// Short description used in error messages (`"string"`, `"array"`, ...)
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// The seven rule kinds
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// `true`/`false` with optional truthy/falsy aliases
    Boolean(BooleanRule),
    /// Text with length, membership and pattern constraints
    String(StringRule),
    /// Floating point number
    Number(NumberRule),
    /// 128-bit integer
    BigInt(BigIntRule),
    /// Instant or calendar date
    Date(DateRule),
    /// List of values
    Array(ArrayRule),
    /// String-keyed record
    Object(ObjectRule),
}

impl RuleKind {
    /// Name of the kind
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::Date(_) => "date",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

/// A single rule or an ordered list of alternatives (first success wins)
#[derive(Debug, Clone)]
pub enum RuleSlot {
    /// Exactly one rule
    Single(ValidationRule),
    /// Alternatives tried left to right
    AnyOf(Vec<ValidationRule>),
}

impl RuleSlot {
    /// Build a slot of alternatives
    pub fn any_of<I, R>(rules: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ValidationRule>,
    {
        Self::AnyOf(rules.into_iter().map(Into::into).collect())
    }

    /// `"string"` or `"string | number"`
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Single(rule) => rule.type_name().to_string(),
            Self::AnyOf(rules) => rules
                .iter()
                .map(ValidationRule::type_name)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

impl From<ValidationRule> for RuleSlot {
    fn from(rule: ValidationRule) -> Self {
        Self::Single(rule)
    }
}

impl From<Vec<ValidationRule>> for RuleSlot {
    fn from(rules: Vec<ValidationRule>) -> Self {
        Self::AnyOf(rules)
    }
}

/// Named collection of rule slots, iterated in insertion order
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, RuleSlot)>,
}

impl Schema {
    /// Create an empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field; redeclaring a name replaces the earlier rule in place
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, rule: impl Into<RuleSlot>) -> Self {
        let name = name.into();
        let rule = rule.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = rule,
            None => self.fields.push((name, rule)),
        }
        self
    }

    /// Iterate `(name, slot)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuleSlot)> {
        self.fields.iter().map(|(name, slot)| (name.as_str(), slot))
    }

    /// Look up a field's slot
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RuleSlot> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, slot)| slot)
    }

    /// Number of declared fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Wrap the schema as an `object` rule
    #[must_use]
    pub fn into_rule(self) -> ValidationRule {
        object().schema(self).into()
    }
}

/// Boolean constraints
#[derive(Debug, Clone, Default)]
pub struct BooleanRule {
    /// Extra values accepted as `true`
    pub truthy: Vec<Value>,
    /// Extra values accepted as `false`
    pub falsy: Vec<Value>,
}

impl BooleanRule {
    /// Accept `value` as `true`
    #[must_use]
    pub fn truthy(mut self, value: impl Into<Value>) -> Self {
        self.truthy.push(value.into());
        self
    }

    /// Accept `value` as `false`
    #[must_use]
    pub fn falsy(mut self, value: impl Into<Value>) -> Self {
        self.falsy.push(value.into());
        self
    }
}

/// Substring or regular-expression match
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Input must contain the string
    Contains(String),
    /// Input must fully match the regex
    Regex(Regex),
}

/// How aggressively to strip unwanted characters from strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EscapeLevel {
    /// Leave the string untouched
    #[default]
    None,
    /// Strip control and invisible unicode characters
    Invisible,
    /// Also collapse whitespace runs into one space
    Whitespace,
}

/// String constraints
#[derive(Debug, Clone, Default)]
pub struct StringRule {
    /// Minimum length in characters
    pub min: Option<usize>,
    /// Maximum length in characters
    pub max: Option<usize>,
    /// Exact length in characters
    pub length: Option<usize>,
    /// Allowed values
    pub values: Option<Vec<String>>,
    /// Required pattern
    pub pattern: Option<Pattern>,
    /// Trim surrounding whitespace
    pub trim: bool,
    /// Character stripping level
    pub escape_level: EscapeLevel,
    /// Final transform
    pub custom: Option<Callback<CustomFn>>,
}

impl StringRule {
    /// Minimum length
    #[must_use]
    pub fn min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    /// Maximum length
    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Exact length
    #[must_use]
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Restrict to a set of values
    #[must_use]
    pub fn values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Require a substring
    #[must_use]
    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.pattern = Some(Pattern::Contains(needle.into()));
        self
    }

    /// Require a full match of the regex `source`
    ///
    /// Flags are written inline, e.g. `(?i)[a-z]+`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `source` is not a valid regex.
    pub fn pattern(mut self, source: &str) -> Result<Self> {
        let anchored = Regex::new(&format!(r"\A(?:{source})\z"))
            .map_err(|err| Error::configuration(format!("invalid string pattern '{source}': {err}")))?;
        self.pattern = Some(Pattern::Regex(anchored));
        Ok(self)
    }

    /// Trim surrounding whitespace
    #[must_use]
    pub fn trim(mut self) -> Self {
        self.trim = true;
        self
    }

    /// Strip characters up to `level`
    #[must_use]
    pub fn escape(mut self, level: EscapeLevel) -> Self {
        self.escape_level = level;
        self
    }

    /// Apply `f` last
    #[must_use]
    pub fn custom<F>(mut self, f: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.custom = Some(Callback(Arc::new(f)));
        self
    }
}

/// Rounding applied when `digits` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingMode {
    /// Toward negative infinity
    Floor,
    /// Half away from zero
    #[default]
    Round,
    /// Toward positive infinity
    Ceil,
}

/// Number constraints
#[derive(Debug, Clone, Default)]
pub struct NumberRule {
    /// Reject non-integral results
    pub integer: bool,
    /// Round to this many decimal digits
    pub digits: Option<u32>,
    /// Rounding mode for `digits`
    pub rounding: RoundingMode,
    /// Inclusive lower bound
    pub min: Option<f64>,
    /// Inclusive upper bound
    pub max: Option<f64>,
    /// Allowed values
    pub values: Option<Vec<f64>>,
}

impl NumberRule {
    /// Require an integral result
    #[must_use]
    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }

    /// Round to `digits` decimals
    #[must_use]
    pub fn digits(mut self, digits: u32) -> Self {
        self.digits = Some(digits);
        self
    }

    /// Rounding mode used with `digits`
    #[must_use]
    pub fn rounding(mut self, mode: RoundingMode) -> Self {
        self.rounding = mode;
        self
    }

    /// Inclusive lower bound
    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound
    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Restrict to a set of values
    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = f64>) -> Self {
        self.values = Some(values.into_iter().collect());
        self
    }
}

/// Big integer constraints
#[derive(Debug, Clone, Default)]
pub struct BigIntRule {
    /// Inclusive lower bound
    pub min: Option<i128>,
    /// Inclusive upper bound
    pub max: Option<i128>,
}

impl BigIntRule {
    /// Inclusive lower bound
    #[must_use]
    pub fn min(mut self, min: i128) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound
    #[must_use]
    pub fn max(mut self, max: i128) -> Self {
        self.max = Some(max);
        self
    }
}

/// Date bound: fixed, or evaluated on every validation
#[derive(Debug, Clone)]
pub enum DateBound {
    /// Fixed instant
    Fixed(DateTime<Utc>),
    /// Evaluated at validation time
    Computed(Callback<DateFn>),
}

impl DateBound {
    /// Bound evaluated at validation time (e.g. `Utc::now`)
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self::Computed(Callback(Arc::new(f)))
    }

    /// Current value of the bound
    #[must_use]
    pub fn resolve(&self) -> DateTime<Utc> {
        match self {
            Self::Fixed(d) => *d,
            Self::Computed(f) => f(),
        }
    }
}

impl From<DateTime<Utc>> for DateBound {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Fixed(d)
    }
}

/// Date constraints
#[derive(Debug, Clone, Default)]
pub struct DateRule {
    /// Earliest accepted instant
    pub min: Option<DateBound>,
    /// Latest accepted instant
    pub max: Option<DateBound>,
    /// Return `YYYY-MM-DD` instead of the instant
    pub date_only: bool,
}

impl DateRule {
    /// Earliest accepted instant
    #[must_use]
    pub fn min(mut self, bound: impl Into<DateBound>) -> Self {
        self.min = Some(bound.into());
        self
    }

    /// Latest accepted instant
    #[must_use]
    pub fn max(mut self, bound: impl Into<DateBound>) -> Self {
        self.max = Some(bound.into());
        self
    }

    /// Return the calendar date string
    #[must_use]
    pub fn date_only(mut self) -> Self {
        self.date_only = true;
        self
    }
}

/// Element rules of an array
#[derive(Debug, Clone)]
pub enum ArrayNested {
    /// Every element against one rule; "no value" results are dropped
    Each(Box<ValidationRule>),
    /// One rule per position; lengths must match
    Positional(Vec<ValidationRule>),
}

/// Array constraints
#[derive(Debug, Clone, Default)]
pub struct ArrayRule {
    /// Element rules
    pub nested: Option<ArrayNested>,
    /// Exact final length
    pub length: Option<usize>,
    /// Minimum final length
    pub min: Option<usize>,
    /// Maximum final length
    pub max: Option<usize>,
}

impl ArrayRule {
    /// Validate every element against `rule`
    #[must_use]
    pub fn each(mut self, rule: impl Into<ValidationRule>) -> Self {
        self.nested = Some(ArrayNested::Each(Box::new(rule.into())));
        self
    }

    /// Validate elements positionally
    #[must_use]
    pub fn positional<I, R>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ValidationRule>,
    {
        self.nested = Some(ArrayNested::Positional(
            rules.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Exact final length
    #[must_use]
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Minimum final length
    #[must_use]
    pub fn min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    /// Maximum final length
    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }
}

/// Object constraints
#[derive(Debug, Clone, Default)]
pub struct ObjectRule {
    /// Rule applied to every value (when no schema is given)
    pub nested: Option<Box<ValidationRule>>,
    /// Whitelisted fields
    pub schema: Option<Schema>,
}

impl ObjectRule {
    /// Validate every value against `rule`, preserving keys
    #[must_use]
    pub fn nested(mut self, rule: impl Into<ValidationRule>) -> Self {
        self.nested = Some(Box::new(rule.into()));
        self
    }

    /// Validate declared fields only
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

macro_rules! rule_kind {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for ValidationRule {
            fn from(rule: $ty) -> Self {
                Self::new(RuleKind::$variant(rule))
            }
        }

        impl From<$ty> for RuleSlot {
            fn from(rule: $ty) -> Self {
                Self::Single(rule.into())
            }
        }

        impl $ty {
            /// Convert into a rule marked optional
            #[must_use]
            pub fn optional(self) -> ValidationRule {
                ValidationRule::from(self).optional()
            }

            /// Convert into a rule with a literal default
            #[must_use]
            pub fn default_value(self, value: impl Into<Value>) -> ValidationRule {
                ValidationRule::from(self).default_value(value)
            }

            /// Convert into a rule with a computed default
            #[must_use]
            pub fn default_with<F>(self, f: F) -> ValidationRule
            where
                F: Fn(Option<&Value>, &ValidationRule) -> Value + Send + Sync + 'static,
            {
                ValidationRule::from(self).default_with(f)
            }

            /// Convert into a rule with a post-coercion transform
            #[must_use]
            pub fn parse<F>(self, f: F) -> ValidationRule
            where
                F: Fn(Value) -> Value + Send + Sync + 'static,
            {
                ValidationRule::from(self).parse(f)
            }
        }
    };
}

rule_kind!(BooleanRule, Boolean);
rule_kind!(StringRule, String);
rule_kind!(NumberRule, Number);
rule_kind!(BigIntRule, BigInt);
rule_kind!(DateRule, Date);
rule_kind!(ArrayRule, Array);
rule_kind!(ObjectRule, Object);

/// Boolean rule
#[must_use]
pub fn boolean() -> BooleanRule {
    BooleanRule::default()
}

/// String rule
#[must_use]
pub fn string() -> StringRule {
    StringRule::default()
}

/// Number rule
#[must_use]
pub fn number() -> NumberRule {
    NumberRule::default()
}

/// Big integer rule
#[must_use]
pub fn bigint() -> BigIntRule {
    BigIntRule::default()
}

/// Date rule
#[must_use]
pub fn date() -> DateRule {
    DateRule::default()
}

/// Array rule
#[must_use]
pub fn array() -> ArrayRule {
    ArrayRule::default()
}

/// Object rule
#[must_use]
pub fn object() -> ObjectRule {
    ObjectRule::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_keeps_declaration_order() {
        let schema = Schema::new()
            .field("b", string())
            .field("a", number())
            .field("c", boolean());
        let names: Vec<&str> = schema.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_schema_redeclare_replaces_in_place() {
        let schema = Schema::new()
            .field("a", string())
            .field("b", string())
            .field("a", number());
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("a").map(RuleSlot::describe).as_deref(), Some("number"));
        assert_eq!(schema.iter().next().map(|(name, _)| name), Some("a"));
    }

    #[test]
    fn test_modifiers() {
        let rule = string().min(1).default_value("x");
        assert!(matches!(rule.default, Some(DefaultValue::Literal(_))));
        assert!(!rule.optional);

        let rule = number().optional();
        assert!(rule.optional);
        assert_eq!(rule.type_name(), "number");
    }

    #[test]
    fn test_computed_default_receives_rule() {
        let rule = string().default_with(|_, rule| Value::from(rule.type_name()));
        let default = rule.default.clone().unwrap();
        assert_eq!(default.resolve(None, &rule), Value::from("string"));
    }

    #[test]
    fn test_any_of_describe() {
        let slot = RuleSlot::any_of([ValidationRule::from(number()), string().into()]);
        assert_eq!(slot.describe(), "number | string");
    }

    #[test]
    fn test_escape_levels_are_ordered() {
        assert!(EscapeLevel::None < EscapeLevel::Invisible);
        assert!(EscapeLevel::Invisible < EscapeLevel::Whitespace);
    }
}
