//! Server-side HTTP/1.1 response builder and serializer.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::compress::{self, GZIP_MIN_BYTES};
use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use potato::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// `200 OK` with a plain-text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok).body(body)
    }

    /// `200 OK` with an HTML body.
    pub fn html(body: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(body)
    }

    /// `200 OK` with `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body_bytes(body))
    }

    /// Appends a response header. Repeated names are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for code that only holds `&mut Response`.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the body from a string. `Content-Length` is written on serialization.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Asks for the connection to be kept (`true`) or closed after this response.
    ///
    /// The connection may still close when the request or server state forbids
    /// keep-alive; a handler can only narrow it.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Gzips the body when `accepts_gzip` is set and the body is large enough
    /// to benefit. Bodies that already carry a `Content-Encoding` are left
    /// alone, as are compressions that would not shrink the body.
    #[must_use]
    pub fn compressed_for(mut self, accepts_gzip: bool) -> Self {
        if !accepts_gzip
            || self.body.len() < GZIP_MIN_BYTES
            || self.status.forbids_body()
            || self.headers.contains("content-encoding")
        {
            return self;
        }
        match compress::gzip(&self.body) {
            Ok(packed) if packed.len() < self.body.len() => {
                self.body = Bytes::from(packed);
                self.headers.insert("Content-Encoding", "gzip");
                self.headers.insert("Vary", "Accept-Encoding");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "gzip failed, sending identity body"),
        }
        self
    }

    /// Serializes status line, headers and body in HTTP/1.1 wire format.
    pub fn into_bytes(self) -> BytesMut {
        self.encode(false)
    }

    /// Serializes the response; `head_only` drops the body but keeps the
    /// `Content-Length` a GET would have reported (RFC 9110 §9.3.2).
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` for a non-empty body without one,
    /// - `Content-Length`, unless the status forbids a body,
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn encode(mut self, head_only: bool) -> BytesMut {
        let forbids_body = self.status.forbids_body();
        if forbids_body {
            self.body = Bytes::new();
        }
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.remove("content-length");
        self.headers
            .set("Connection", if self.keep_alive { "keep-alive" } else { "close" });

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        if !forbids_body {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);

        if !head_only {
            buf.put(self.body);
        }
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let s = to_string(Response::text("Hello").into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn head_only_keeps_length_drops_body() {
        let s = to_string(Response::text("Hello").encode(true));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn no_content_has_no_length_or_body() {
        let s = to_string(Response::new(StatusCode::NoContent).body("ignored").into_bytes());
        assert!(s.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!s.contains("Content-Length"));
        assert!(!s.contains("Content-Type"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn handler_supplied_connection_header_is_replaced() {
        let r = Response::text("x").header("Connection", "keep-alive").keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
        assert!(!s.contains("Connection: keep-alive"));
    }

    #[test]
    fn gzip_only_when_accepted_and_worthwhile() {
        let long = "spud ".repeat(50);
        let res = Response::text(long.clone()).compressed_for(true);
        assert_eq!(res.headers().get("content-encoding"), Some("gzip"));
        assert_eq!(res.headers().get("vary"), Some("Accept-Encoding"));
        assert_eq!(compress::gunzip(res.body_ref(), 1024).unwrap(), long.as_bytes());

        let res = Response::text(long).compressed_for(false);
        assert!(!res.headers().contains("content-encoding"));

        let res = Response::text("tiny").compressed_for(true);
        assert_eq!(&res.body_ref()[..], b"tiny");
    }

    #[test]
    fn json_body() {
        let r = Response::json(&serde_json::json!({ "id": "42" })).unwrap();
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Type: application/json\r\n"));
        assert!(s.ends_with(r#"{"id":"42"}"#));
    }
}
