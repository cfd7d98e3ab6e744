//! Server and client configuration.
//!
//! Both structs deserialize from JSON with every field optional (missing
//! fields take the defaults below). Durations are given in milliseconds.
//!
//! | Field                        | Default          |
//! |------------------------------|------------------|
//! | `addr`                       | `127.0.0.1:8080` |
//! | `backlog`                    | `1024`           |
//! | `handler_timeout_ms`         | `30000`          |
//! | `idle_timeout_ms`            | `60000`          |
//! | `drain_timeout_ms`           | `30000`          |
//! | `max_request_bytes`          | 8 MiB            |
//! | `compress_responses`         | `true`           |
//! | `connect_timeout_ms`         | `10000`          |
//! | `read_timeout_ms`            | `30000`          |
//! | `pool_timeout_ms`            | `30000`          |
//! | `max_connections_per_target` | `8`              |
//! | `max_response_bytes`         | 64 MiB           |
//! | `user_agent`                 | `potato/<version>` |

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Listener and connection settings for a [`Server`](crate::server::Server).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub backlog: u32,
    pub handler_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub max_request_bytes: usize,
    /// Gzip response bodies for clients that accept it.
    pub compress_responses: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backlog: 1024,
            handler_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            drain_timeout_ms: 30_000,
            max_request_bytes: 8 * 1024 * 1024,
            compress_responses: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `POTATO_ADDR`, `POTATO_BACKLOG`,
    /// `POTATO_HANDLER_TIMEOUT_MS`, `POTATO_IDLE_TIMEOUT_MS`,
    /// `POTATO_DRAIN_TIMEOUT_MS`, `POTATO_MAX_REQUEST_BYTES` and
    /// `POTATO_COMPRESS_RESPONSES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = lookup("POTATO_ADDR") {
            config.addr = parse_value("POTATO_ADDR", &v)?;
        }
        if let Some(v) = lookup("POTATO_BACKLOG") {
            config.backlog = parse_value("POTATO_BACKLOG", &v)?;
        }
        if let Some(v) = lookup("POTATO_HANDLER_TIMEOUT_MS") {
            config.handler_timeout_ms = parse_value("POTATO_HANDLER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("POTATO_IDLE_TIMEOUT_MS") {
            config.idle_timeout_ms = parse_value("POTATO_IDLE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("POTATO_DRAIN_TIMEOUT_MS") {
            config.drain_timeout_ms = parse_value("POTATO_DRAIN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("POTATO_MAX_REQUEST_BYTES") {
            config.max_request_bytes = parse_value("POTATO_MAX_REQUEST_BYTES", &v)?;
        }
        if let Some(v) = lookup("POTATO_COMPRESS_RESPONSES") {
            config.compress_responses = parse_value("POTATO_COMPRESS_RESPONSES", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::invalid("backlog", "must be at least 1"));
        }
        if self.handler_timeout_ms == 0 {
            return Err(ConfigError::invalid("handler_timeout_ms", "must be positive"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::invalid("idle_timeout_ms", "must be positive"));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::invalid("max_request_bytes", "must be positive"));
        }
        Ok(())
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }

    pub fn with_compress_responses(mut self, enabled: bool) -> Self {
        self.compress_responses = enabled;
        self
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Settings for a client [`Session`](crate::client::Session).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub pool_timeout_ms: u64,
    pub max_connections_per_target: usize,
    pub max_response_bytes: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            pool_timeout_ms: 30_000,
            max_connections_per_target: 8,
            max_response_bytes: 64 * 1024 * 1024,
            user_agent: concat!("potato/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections_per_target == 0 {
            return Err(ConfigError::invalid("max_connections_per_target", "must be at least 1"));
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("timeouts", "must be positive"));
        }
        Ok(())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout_ms = as_millis(timeout);
        self
    }

    pub fn with_max_connections_per_target(mut self, max: usize) -> Self {
        self.max_connections_per_target = max;
        self
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }
}

fn parse_value<T>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(field, format!("{raw:?}: {e}")))
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
