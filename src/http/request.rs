//! HTTP/1.1 request heads, parsed with the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::body::{BodyError, BodyFraming};
use super::{Headers, Method, Version};

/// Errors that can occur while reading a request off the wire.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error(transparent)]
    Body(#[from] BodyError),
}

/// A parsed HTTP/1.1 request.
///
/// [`Request::parse`] reads only the head; the connection supplies the body
/// once its framing is satisfied (see [`Request::framing`]).
///
/// # Examples
///
/// ```
/// use potato::http::Request;
///
/// let raw = b"GET /users/42?fields=name+email HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, head_len) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/users/42");
/// assert_eq!(request.query_param("fields"), Some("name email"));
/// assert_eq!(head_len, raw.len());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
    headers: Headers,
    query: Option<String>,
    query_params: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers accepted per request.
    const MAX_HEADERS: usize = 64;

    /// Builds a request in memory (HTTP/1.1, no headers, empty body).
    ///
    /// `target` may carry a query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        let query_params = query.as_deref().map(parse_query_string).unwrap_or_default();
        Self {
            method,
            path,
            version: Version::Http11,
            headers: Headers::new(),
            query,
            query_params,
            body: Bytes::new(),
        }
    }

    /// Parses a request head from the start of `buf`.
    ///
    /// Returns the request (with an empty body) and the number of bytes the
    /// head occupied.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the `\r\n\r\n` terminator has not arrived yet.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::MissingField`]: method, target or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let head_len = match raw.parse(buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = Method::from(raw.method.ok_or(RequestError::MissingField { field: "method" })?);
        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw
            .version
            .map(Version::from_minor)
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let mut request = Self::new(method, target);
        request.version = version;
        request.headers = header_map;
        Ok((request, head_len))
    }

    /// Body framing declared by this request's headers.
    pub fn framing(&self) -> Result<BodyFraming, BodyError> {
        BodyFraming::for_request(&self.headers)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string, exactly as sent.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Moves the body out, leaving an empty one in its place.
    pub fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.body)
    }

    /// Whether the client allows the connection to stay open after this request.
    ///
    /// An explicit `Connection: close` or `keep-alive` token decides; otherwise
    /// HTTP/1.1 keeps the connection and HTTP/1.0 closes it.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            false
        } else if self.headers.has_token("connection", "keep-alive") {
            true
        } else {
            self.version.keep_alive_by_default()
        }
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

/// Parses `key=value&key2=value2`, decoding `+` as a space. Later duplicates win.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, head_len) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(head_len, raw.len());
        assert!(req.body().is_empty());
    }

    #[test]
    fn parse_leaves_body_bytes_unconsumed() {
        let raw = b"POST /u HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, head_len) = Request::parse(raw).unwrap();
        assert_eq!(req.framing(), Ok(BodyFraming::Length(5)));
        assert_eq!(&raw[head_len..], b"hello");
        assert!(req.body().is_empty());
    }

    #[test]
    fn query_string_split_and_decoded() {
        let raw = b"GET /search?q=rust+lang&page=2&flag HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2&flag"));
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.query_param("flag"), Some(""));
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let raw = b"\x01\x02 nonsense\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());

        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());

        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());

        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn take_body_leaves_empty() {
        let mut req = Request::new(Method::Post, "/x").with_body("abc");
        assert_eq!(&req.take_body()[..], b"abc");
        assert!(req.body().is_empty());
    }
}
