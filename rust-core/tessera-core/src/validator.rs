//! # Validator Engine
//!
//! Recursive evaluator that walks a value against a rule slot and produces a
//! coerced value, "no value" (`Ok(None)`), or a [`ValidationError`].
//!
//! Evaluation of a single rule:
//!
//! 1. Absent input (`None`, `Null`, or an empty string for non-string rules in
//!    [`Mode::Lenient`]) adopts the rule's default, or yields "no value" for
//!    optional rules, or fails as `Required`.
//! 2. Present input equal to the rule's default short-circuits to the default.
//! 3. Otherwise the input is coerced by the routine for the rule's kind, and
//!    the rule's `parse` transform is applied to the result.
//!
//! Each per-kind routine is a pure function of `(input, constraints)`.

use crate::rules::{
    ArrayNested, ArrayRule, BigIntRule, BooleanRule, DateRule, EscapeLevel, NumberRule,
    ObjectRule, Pattern, RoundingMode, RuleKind, RuleSlot, StringRule, ValidationRule,
};
use crate::validation::{ValidationCode, ValidationError, ValidationResult};
use crate::value::{format_number, Map, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// How forgiving the validator is with string-typed transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Values are taken as they are
    #[default]
    Strict,
    /// Query-string/form semantics: `""` is absent for non-string rules and
    /// `"1"`/`"0"` are booleans
    Lenient,
}

impl Mode {
    /// Pick the mode from a flag
    #[must_use]
    pub fn lenient_if(flag: bool) -> Self {
        if flag {
            Self::Lenient
        } else {
            Self::Strict
        }
    }

    fn is_lenient(self) -> bool {
        self == Self::Lenient
    }
}

/// Validate `value` against a rule slot
///
/// For a list of alternatives the first rule that accepts the value wins; if
/// none does, a single `NoMatchingRule` error carrying the whole list and the
/// original input is returned.
///
/// # Errors
///
/// Returns a [`ValidationError`] located at `path` (or deeper) when the value
/// is rejected.
pub fn validate(
    value: Option<&Value>,
    slot: &RuleSlot,
    path: &str,
    mode: Mode,
) -> ValidationResult<Option<Value>> {
    match slot {
        RuleSlot::Single(rule) => validate_rule(value, rule, path, mode),
        RuleSlot::AnyOf(rules) => rules
            .iter()
            .find_map(|rule| validate_rule(value, rule, path, mode).ok())
            .ok_or_else(|| {
                ValidationError::new(
                    path,
                    value.cloned(),
                    slot.clone(),
                    ValidationCode::NoMatchingRule,
                )
            }),
    }
}

/// Validate `value` against a single rule
///
/// # Errors
///
/// Returns a [`ValidationError`] when the value is rejected.
pub fn validate_rule(
    value: Option<&Value>,
    rule: &ValidationRule,
    path: &str,
    mode: Mode,
) -> ValidationResult<Option<Value>> {
    let raw = match value {
        Some(raw) if !is_absent(raw, rule, mode) => raw,
        _ => {
            if let Some(default) = &rule.default {
                return Ok(Some(apply_parse(rule, default.resolve(value, rule))));
            }
            if rule.optional {
                return Ok(None);
            }
            return Err(reject(path, value, rule, ValidationCode::Required));
        }
    };

    if let Some(default) = &rule.default {
        let fallback = default.resolve(Some(raw), rule);
        if fallback.deep_eq(raw) {
            return Ok(Some(apply_parse(rule, fallback)));
        }
    }

    let coerced = match &rule.kind {
        RuleKind::Boolean(kind) => coerce_boolean(raw, kind, mode),
        RuleKind::String(kind) => coerce_string(raw, kind),
        RuleKind::Number(kind) => coerce_number(raw, kind),
        RuleKind::BigInt(kind) => coerce_bigint(raw, kind),
        RuleKind::Date(kind) => coerce_date(raw, kind),
        RuleKind::Array(kind) => return coerce_array(raw, kind, rule, path, mode),
        RuleKind::Object(kind) => return coerce_object(raw, kind, rule, path, mode),
    }
    .map_err(|code| reject(path, Some(raw), rule, code))?;

    Ok(Some(apply_parse(rule, coerced)))
}

fn is_absent(value: &Value, rule: &ValidationRule, mode: Mode) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) if s.is_empty() => {
            mode.is_lenient() && !matches!(rule.kind, RuleKind::String(_))
        }
        _ => false,
    }
}

fn apply_parse(rule: &ValidationRule, value: Value) -> Value {
    match &rule.parse {
        Some(parse) => parse(value),
        None => value,
    }
}

fn reject(
    path: &str,
    value: Option<&Value>,
    rule: &ValidationRule,
    code: ValidationCode,
) -> ValidationError {
    ValidationError::new(path, value.cloned(), RuleSlot::Single(rule.clone()), code)
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn coerce_boolean(raw: &Value, rule: &BooleanRule, mode: Mode) -> Result<Value, ValidationCode> {
    let is = |flag: bool, aliases: &[Value], lenient_alias: &str| {
        raw.as_bool() == Some(flag)
            || aliases.iter().any(|alias| alias.deep_eq(raw))
            || (mode.is_lenient() && raw.as_str() == Some(lenient_alias))
    };
    if is(true, &rule.truthy, "1") {
        Ok(Value::Bool(true))
    } else if is(false, &rule.falsy, "0") {
        Ok(Value::Bool(false))
    } else {
        Err(ValidationCode::InvalidType)
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => Some(*n),
        Value::BigInt(i) => Some(*i as f64),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn round_to(n: f64, digits: u32, mode: RoundingMode) -> f64 {
    let factor = 10f64.powi(i32::try_from(digits.min(15)).unwrap_or(15));
    let scaled = n * factor;
    let rounded = match mode {
        RoundingMode::Floor => scaled.floor(),
        RoundingMode::Round => scaled.round(),
        RoundingMode::Ceil => scaled.ceil(),
    };
    if rounded.is_finite() {
        rounded / factor
    } else {
        n
    }
}

#[allow(clippy::float_cmp)]
fn coerce_number(raw: &Value, rule: &NumberRule) -> Result<Value, ValidationCode> {
    let mut n = to_number(raw).ok_or(ValidationCode::InvalidType)?;
    if let Some(digits) = rule.digits.filter(|d| *d > 0) {
        n = round_to(n, digits, rule.rounding);
    }
    if rule.integer && n.fract() != 0.0 {
        return Err(ValidationCode::InvalidType);
    }
    if rule.min.is_some_and(|min| n < min) {
        return Err(ValidationCode::TooSmall);
    }
    if rule.max.is_some_and(|max| n > max) {
        return Err(ValidationCode::TooLarge);
    }
    if let Some(values) = &rule.values {
        if !values.iter().any(|v| *v == n) {
            return Err(ValidationCode::InvalidChoice);
        }
    }
    Ok(Value::Number(n))
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn coerce_bigint(raw: &Value, rule: &BigIntRule) -> Result<Value, ValidationCode> {
    let n = match raw {
        Value::BigInt(i) => *i,
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e38 => *n as i128,
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| ValidationCode::InvalidType)?,
        _ => return Err(ValidationCode::InvalidType),
    };
    if rule.min.is_some_and(|min| n < min) {
        return Err(ValidationCode::TooSmall);
    }
    if rule.max.is_some_and(|max| n > max) {
        return Err(ValidationCode::TooLarge);
    }
    Ok(Value::BigInt(n))
}

fn coerce_string(raw: &Value, rule: &StringRule) -> Result<Value, ValidationCode> {
    let mut text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(*n),
        Value::BigInt(i) => i.to_string(),
        _ => return Err(ValidationCode::InvalidType),
    };

    let len = text.chars().count();
    if let Some(length) = rule.length {
        if len < length {
            return Err(ValidationCode::TooShort);
        }
        if len > length {
            return Err(ValidationCode::TooLong);
        }
    }
    if rule.min.is_some_and(|min| len < min) {
        return Err(ValidationCode::TooShort);
    }
    if rule.max.is_some_and(|max| len > max) {
        return Err(ValidationCode::TooLong);
    }
    if let Some(values) = &rule.values {
        if !values.iter().any(|v| *v == text) {
            return Err(ValidationCode::InvalidChoice);
        }
    }
    let matches = match &rule.pattern {
        None => true,
        Some(Pattern::Contains(needle)) => text.contains(needle.as_str()),
        Some(Pattern::Regex(re)) => re.is_match(&text),
    };
    if !matches {
        return Err(ValidationCode::InvalidFormat);
    }

    if rule.trim {
        text = text.trim().to_string();
    }
    if rule.escape_level >= EscapeLevel::Invisible {
        text = strip_invisible(&text);
    }
    if rule.escape_level >= EscapeLevel::Whitespace {
        text = collapse_whitespace(&text);
    }
    if let Some(custom) = &rule.custom {
        text = custom(text);
    }
    Ok(Value::String(text))
}

/// Control characters (other than tab/newline/carriage return) and zero-width
/// or bidi formatting characters
fn is_invisible(c: char) -> bool {
    (c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
        || matches!(
            c,
            '\u{00AD}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{2069}'
                | '\u{FEFF}'
        )
}

fn strip_invisible(text: &str) -> String {
    text.chars().filter(|c| !is_invisible(*c)).collect()
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Parse an instant from a string, epoch milliseconds, or a date value
///
/// Naive date-times and bare dates are taken as UTC.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_date(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Date(d) => Some(*d),
        Value::Number(ms) if ms.is_finite() => DateTime::from_timestamp_millis(*ms as i64),
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 6] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn coerce_date(raw: &Value, rule: &DateRule) -> Result<Value, ValidationCode> {
    let date = parse_date(raw).ok_or(ValidationCode::InvalidType)?;
    if rule.min.as_ref().is_some_and(|min| date < min.resolve()) {
        return Err(ValidationCode::TooSmall);
    }
    if rule.max.as_ref().is_some_and(|max| date > max.resolve()) {
        return Err(ValidationCode::TooLarge);
    }
    if rule.date_only {
        Ok(Value::String(date.format("%Y-%m-%d").to_string()))
    } else {
        Ok(Value::Date(date))
    }
}

/// What happens to an element its rule rejects
///
/// An element rule that tolerates failure (`optional` or defaulted) drops the
/// element; any other rule fails the whole array.
fn tolerate_element(element: &ValidationRule, error: ValidationError) -> ValidationResult<Option<Value>> {
    if element.optional || element.default.is_some() {
        return Ok(None);
    }
    Err(error)
}

fn coerce_array(
    raw: &Value,
    kind: &ArrayRule,
    rule: &ValidationRule,
    path: &str,
    mode: Mode,
) -> ValidationResult<Option<Value>> {
    let Value::Array(items) = raw else {
        return Err(reject(path, Some(raw), rule, ValidationCode::InvalidType));
    };

    let output = match &kind.nested {
        None => items.clone(),
        Some(ArrayNested::Each(element)) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{index}]");
                let result = validate_rule(Some(item), element, &item_path, mode)
                    .or_else(|error| tolerate_element(element, error))?;
                out.extend(result);
            }
            out
        }
        Some(ArrayNested::Positional(rules)) => {
            if items.len() < rules.len() {
                return Err(reject(path, Some(raw), rule, ValidationCode::TooShort));
            }
            if items.len() > rules.len() {
                return Err(reject(path, Some(raw), rule, ValidationCode::TooLong));
            }
            items
                .iter()
                .zip(rules)
                .enumerate()
                .map(|(index, (item, element))| {
                    validate_rule(Some(item), element, &format!("{path}[{index}]"), mode)
                        .map(Option::unwrap_or_default)
                })
                .collect::<ValidationResult<Vec<_>>>()?
        }
    };

    let len = output.len();
    let code = if kind.length.is_some_and(|l| len < l) || kind.min.is_some_and(|min| len < min) {
        Some(ValidationCode::TooShort)
    } else if kind.length.is_some_and(|l| len > l) || kind.max.is_some_and(|max| len > max) {
        Some(ValidationCode::TooLong)
    } else {
        None
    };
    if let Some(code) = code {
        return Err(reject(path, Some(raw), rule, code));
    }

    Ok(Some(apply_parse(rule, Value::Array(output))))
}

fn coerce_object(
    raw: &Value,
    kind: &ObjectRule,
    rule: &ValidationRule,
    path: &str,
    mode: Mode,
) -> ValidationResult<Option<Value>> {
    let Value::Object(map) = raw else {
        return Err(reject(path, Some(raw), rule, ValidationCode::InvalidType));
    };

    let output = if let Some(schema) = &kind.schema {
        let mut out = Map::new();
        for (name, slot) in schema.iter() {
            if let Some(value) = validate(map.get(name), slot, &child_path(path, name), mode)? {
                out.insert(name.to_string(), value);
            }
        }
        out
    } else if let Some(nested) = &kind.nested {
        let mut out = Map::new();
        for (key, item) in map {
            if let Some(value) = validate_rule(Some(item), nested, &child_path(path, key), mode)? {
                out.insert(key.clone(), value);
            }
        }
        out
    } else {
        map.clone()
    };

    Ok(Some(apply_parse(rule, Value::Object(output))))
}
