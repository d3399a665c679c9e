//! # Server Configuration
//!
//! Defaults plus environment overrides for the HTTP server and the
//! dispatch pipeline's body limit.
//!
//! ## Environment Variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `TESSERA_ADDR` | Socket address to bind | `127.0.0.1:8000` |
//! | `TESSERA_MAX_BODY_SIZE` | Request body limit in bytes (decimal or `0x` hex) | `1048576` |
//! | `TESSERA_SHUTDOWN_TIMEOUT_SECS` | Graceful drain timeout | `30` |
//! | `TESSERA_KEEP_ALIVE` | HTTP/1.1 keep-alive (`true`/`false`/`1`/`0`) | `true` |
//!
//! Unparseable values are ignored with a warning.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(address) = parse_var(&lookup, "TESSERA_ADDR", |v| v.parse().ok()) {
            config.address = address;
        }
        if let Some(size) = parse_var(&lookup, "TESSERA_MAX_BODY_SIZE", parse_size) {
            config.max_body_size = size;
        }
        if let Some(secs) = parse_var(&lookup, "TESSERA_SHUTDOWN_TIMEOUT_SECS", |v| v.parse().ok())
        {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(keep_alive) = parse_var(&lookup, "TESSERA_KEEP_ALIVE", parse_flag) {
            config.keep_alive = keep_alive;
        }

        config
    }

    /// Set the bind address
    #[must_use]
    pub fn bind(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the request body limit
    #[must_use]
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

fn parse_var<F, T, P>(lookup: &F, key: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "Ignoring invalid configuration value");
    }
    parsed
}

fn parse_size(value: &str) -> Option<usize> {
    match value.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
