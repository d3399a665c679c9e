//! # Cookie Parsing
//!
//! `Cookie` header → name → value(s), percent-decoded.

use crate::value::Value;
use hyper::header::COOKIE;
use hyper::HeaderMap;
use std::collections::BTreeMap;

/// Value of one cookie name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cookie {
    /// The name occurred once
    Single(String),
    /// The name was repeated; values in header order
    Multiple(Vec<String>),
}

impl Cookie {
    /// First value for the name
    #[must_use]
    pub fn first(&self) -> &str {
        match self {
            Self::Single(value) => value,
            Self::Multiple(values) => values.first().map_or("", String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            Self::Single(first) => *self = Self::Multiple(vec![std::mem::take(first), value]),
            Self::Multiple(values) => values.push(value),
        }
    }
}

impl From<&Cookie> for Value {
    fn from(cookie: &Cookie) -> Self {
        match cookie {
            Cookie::Single(value) => Self::from(value.as_str()),
            Cookie::Multiple(values) => Self::Array(values.iter().map(|v| Self::from(v.as_str())).collect()),
        }
    }
}

/// Cookies of one request
pub type Cookies = BTreeMap<String, Cookie>;

fn decode(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(raw);
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |decoded| decoded.into_owned())
}

/// Parse one `Cookie` header value
#[must_use]
pub fn parse_cookies(header: &str) -> Cookies {
    let mut cookies = Cookies::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = decode(name);
        if name.is_empty() {
            continue;
        }
        let value = decode(value);
        match cookies.get_mut(&name) {
            Some(existing) => existing.push(value),
            None => {
                cookies.insert(name, Cookie::Single(value));
            }
        }
    }
    cookies
}

/// Parse every `Cookie` header of a request
#[must_use]
pub fn from_headers(headers: &HeaderMap) -> Cookies {
    let joined = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    parse_cookies(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_parse_simple() {
        let cookies = parse_cookies("session=abc123; theme=dark");
        assert_eq!(cookies.get("session"), Some(&Cookie::Single("abc123".into())));
        assert_eq!(cookies.get("theme").map(Cookie::first), Some("dark"));
    }

    #[test]
    fn test_repeated_names_become_lists() {
        let cookies = parse_cookies("id=1; id=2;id=3");
        assert_eq!(
            cookies.get("id"),
            Some(&Cookie::Multiple(vec!["1".into(), "2".into(), "3".into()]))
        );
    }

    #[test]
    fn test_percent_decoding_and_quotes() {
        let cookies = parse_cookies(r#"name=John%20Doe; quoted="a%3Db"; bad=%E0%A4%A"#);
        assert_eq!(cookies.get("name").map(Cookie::first), Some("John Doe"));
        assert_eq!(cookies.get("quoted").map(Cookie::first), Some("a=b"));
        assert!(cookies.contains_key("bad"));
    }

    #[test]
    fn test_skips_malformed_pairs() {
        let cookies = parse_cookies("novalue; =x; ok=1");
        assert_eq!(cookies.len(), 1);
    }

    #[test]
    fn test_from_headers_joins_multiple() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("b=2; a=3"));
        let cookies = from_headers(&headers);
        assert_eq!(cookies.get("b").map(Cookie::first), Some("2"));
        assert!(matches!(cookies.get("a"), Some(Cookie::Multiple(values)) if values.len() == 2));
    }

    #[test]
    fn test_into_value() {
        let cookies = parse_cookies("id=1; id=2");
        let value = Value::from(&cookies["id"]);
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }
}
