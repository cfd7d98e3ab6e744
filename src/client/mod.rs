//! HTTP/1.1 client with per-target keep-alive pooling.
//!
//! A [`Session`] is cheap to clone; clones share one pool. Requests are never
//! retried automatically. [`ClientError::is_retryable`] tells the caller
//! whether the request can safely be sent again.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), potato::client::ClientError> {
//! let session = potato::client::Session::new();
//! let res = session.get("http://127.0.0.1:8080/users/42").await?;
//! println!("{} {}", res.status(), res.text());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::http::{Headers, Method};
use pool::{Pool, PoolStats, Target};

pub use response::ClientResponse;

/// Errors returned by [`Session`] requests.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("timed out after {timeout:?} connecting to {target}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no response within {0:?}")]
    ReadTimeout(Duration),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("no connection to {target} became available within {waited:?}")]
    PoolExhausted { target: String, waited: Duration },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// `true` when the request never reached the server, so sending it again
    /// cannot repeat a side effect. After a read timeout or I/O error the
    /// request may have been processed; only idempotent requests should be
    /// retried then.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. } | Self::Connect { .. } | Self::PoolExhausted { .. }
        )
    }
}

/// A client with its own connection pool.
#[derive(Debug, Clone)]
pub struct Session {
    config: Arc<ClientConfig>,
    pool: Arc<Pool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            pool: Arc::new(Pool::new(config.max_connections_per_target)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Sends one request and reads the complete response.
    ///
    /// `Host`, `User-Agent`, `Accept-Encoding: gzip` and `Content-Length` are
    /// filled in unless `headers` already carries the first three. Gzip
    /// response bodies are decoded. The connection goes back to the pool only
    /// after a complete keep-alive response.
    ///
    /// # Errors
    ///
    /// See [`ClientError`]. Nothing is retried.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Result<ClientResponse, ClientError> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let target = Target::from_url(&url)?;
        let wire = encode_request(&method, &url, &target, headers, body.into(), &self.config);

        let mut conn = self
            .pool
            .checkout(&target, self.config.pool_timeout(), self.config.connect_timeout())
            .await?;
        debug!(%method, %url, reused = conn.is_reused(), "sending request");

        let read_timeout = self.config.read_timeout();
        let head_request = method == Method::Head;
        let exchange = async {
            let stream = conn.stream_mut();
            stream.write_all(&wire).await?;
            stream.flush().await?;
            response::read_response(stream, head_request, self.config.max_response_bytes).await
        };
        let read = match timeout(read_timeout, exchange).await {
            Ok(Ok(read)) => read,
            Ok(Err(e)) => {
                warn!(%method, %url, error = %e, "request failed");
                return Err(e);
            }
            Err(_) => {
                warn!(%method, %url, timeout = ?read_timeout, "request timed out");
                return Err(ClientError::ReadTimeout(read_timeout));
            }
        };

        if !read.connection_spent && read.response.allows_reuse() {
            conn.release();
        }
        Ok(read.response)
    }

    pub async fn get(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::Get, url, Headers::new(), Bytes::new()).await
    }

    pub async fn head(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::Head, url, Headers::new(), Bytes::new()).await
    }

    pub async fn delete(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::Delete, url, Headers::new(), Bytes::new()).await
    }

    pub async fn options(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(Method::Options, url, Headers::new(), Bytes::new()).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Bytes>) -> Result<ClientResponse, ClientError> {
        self.request(Method::Post, url, Headers::new(), body).await
    }

    pub async fn put(&self, url: &str, body: impl Into<Bytes>) -> Result<ClientResponse, ClientError> {
        self.request(Method::Put, url, Headers::new(), body).await
    }

    pub async fn patch(&self, url: &str, body: impl Into<Bytes>) -> Result<ClientResponse, ClientError> {
        self.request(Method::Patch, url, Headers::new(), body).await
    }

    /// Sends `value` as a JSON body with `Content-Type: application/json`.
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, value: &T) -> Result<ClientResponse, ClientError> {
        self.send_json(Method::Post, url, value).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, url: &str, value: &T) -> Result<ClientResponse, ClientError> {
        self.send_json(Method::Put, url, value).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        value: &T,
    ) -> Result<ClientResponse, ClientError> {
        let body = serde_json::to_vec(value)?;
        let headers: Headers = [("Content-Type", "application/json")].into_iter().collect();
        self.request(method, url, headers, body).await
    }
}

/// One-shot `GET` on a fresh session.
pub async fn get(url: &str) -> Result<ClientResponse, ClientError> {
    Session::new().get(url).await
}

/// One-shot `POST` on a fresh session.
pub async fn post(url: &str, body: impl Into<Bytes>) -> Result<ClientResponse, ClientError> {
    Session::new().post(url, body).await
}

/// One-shot JSON `POST` on a fresh session.
pub async fn post_json<T: Serialize + ?Sized>(url: &str, value: &T) -> Result<ClientResponse, ClientError> {
    Session::new().post_json(url, value).await
}

fn encode_request(
    method: &Method,
    url: &Url,
    target: &Target,
    mut headers: Headers,
    body: Bytes,
    config: &ClientConfig,
) -> BytesMut {
    if !headers.contains("host") {
        headers.insert("Host", target.authority());
    }
    if !headers.contains("user-agent") {
        headers.insert("User-Agent", config.user_agent.as_str());
    }
    if !headers.contains("accept-encoding") {
        headers.insert("Accept-Encoding", "gzip");
    }
    headers.remove("transfer-encoding");
    headers.remove("content-length");
    if !body.is_empty() || matches!(method, Method::Post | Method::Put | Method::Patch) {
        headers.insert("Content-Length", body.len().to_string());
    }

    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };

    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + body.len());
    buf.put(format!("{method} {path} HTTP/1.1\r\n").as_bytes());
    for (name, value) in headers.iter() {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }
    buf.put(&b"\r\n"[..]);
    buf.put(body);
    buf
}
