//! Responses received by the client, and reading them off the wire.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::ClientError;
use crate::http::{BodyFraming, Headers, Version, body::BodyError, compress};

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A complete response: status, headers and the fully read body.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    status: u16,
    version: Version,
    headers: Headers,
    body: Bytes,
}

impl ClientResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The body as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Whether the connection that carried this response can be reused.
    pub(crate) fn allows_reuse(&self) -> bool {
        let headers = &self.headers;
        if headers.has_token("connection", "close") {
            return false;
        }
        self.version.keep_alive_by_default() || headers.has_token("connection", "keep-alive")
    }
}

/// Result of reading one response from a connection.
pub(crate) struct ReadResponse {
    pub(crate) response: ClientResponse,
    /// Body was delimited by EOF or the peer sent extra bytes; either way the
    /// connection is unusable afterwards.
    pub(crate) connection_spent: bool,
}

/// Reads one response from `stream`, following `Content-Length`, chunked
/// framing, or EOF. Interim `1xx` responses are skipped, and a gzip-coded
/// body is decoded (within the same size cap) with `Content-Encoding` and
/// `Content-Length` removed.
pub(crate) async fn read_response<S>(
    stream: &mut S,
    head_request: bool,
    max_body_bytes: usize,
) -> Result<ReadResponse, ClientError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    let (status, version, mut headers) = loop {
        if let Some((status, version, headers, head_len)) = parse_head(&buf)? {
            let _ = buf.split_to(head_len);
            if (100..200).contains(&status) && status != 101 {
                continue;
            }
            break (status, version, headers);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ClientError::ProtocolViolation("response head too large".to_owned()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(ClientError::ProtocolViolation(
                "connection closed before a response arrived".to_owned(),
            ));
        }
    };

    let framing = BodyFraming::for_response(status, head_request, &headers).map_err(body_violation)?;
    let body = loop {
        if let Some(body) = framing.decode(&mut buf, max_body_bytes).map_err(body_violation)? {
            break body;
        }
        if stream.read_buf(&mut buf).await? == 0 {
            if framing == BodyFraming::UntilClose {
                break BodyFraming::take_remaining(&mut buf);
            }
            return Err(ClientError::ProtocolViolation(
                "connection closed before the body was complete".to_owned(),
            ));
        }
    };

    let body = if compress::is_gzip_encoded(&headers) && !body.is_empty() {
        let decoded = compress::gunzip(&body, max_body_bytes)
            .map_err(|e| ClientError::ProtocolViolation(format!("bad gzip body: {e}")))?;
        headers.remove("content-encoding");
        headers.remove("content-length");
        Bytes::from(decoded)
    } else {
        body
    };

    Ok(ReadResponse {
        connection_spent: framing == BodyFraming::UntilClose || !buf.is_empty(),
        response: ClientResponse {
            status,
            version,
            headers,
            body,
        },
    })
}

fn parse_head(buf: &[u8]) -> Result<Option<(u16, Version, Headers, usize)>, ClientError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut raw_headers);
    let head_len = match raw.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ClientError::ProtocolViolation(format!("malformed response head: {e}"))),
    };

    let status = raw
        .code
        .ok_or_else(|| ClientError::ProtocolViolation("missing status code".to_owned()))?;
    let version = raw.version.map(Version::from_minor).unwrap_or(Version::Http11);
    let headers = raw
        .headers
        .iter()
        .filter_map(|h| std::str::from_utf8(h.value).ok().map(|v| (h.name, v)))
        .collect();
    Ok(Some((status, version, headers, head_len)))
}

fn body_violation(err: BodyError) -> ClientError {
    ClientError::ProtocolViolation(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(wire: &[u8], head_request: bool) -> Result<ReadResponse, ClientError> {
        let mut stream = wire;
        read_response(&mut stream, head_request, 1024).await
    }

    #[tokio::test]
    async fn content_length_body() {
        let read = read(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello", false).await.unwrap();
        assert_eq!(read.response.status(), 200);
        assert_eq!(read.response.text(), "hello");
        assert!(read.response.allows_reuse());
        assert!(!read.connection_spent);
    }

    #[tokio::test]
    async fn chunked_body_and_interim_response() {
        let wire = b"HTTP/1.1 100 Continue\r\n\r\n\
                     HTTP/1.1 201 Created\r\nTransfer-Encoding: chunked\r\n\r\n\
                     4\r\n{\"a\"\r\n3\r\n:1}\r\n0\r\n\r\n";
        let read = read(wire, false).await.unwrap();
        assert_eq!(read.response.status(), 201);
        let value: serde_json::Value = read.response.json().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn body_until_close_spends_the_connection() {
        let read = read(b"HTTP/1.0 200 OK\r\n\r\nall of it", false).await.unwrap();
        assert_eq!(read.response.text(), "all of it");
        assert!(read.connection_spent);
        assert!(!read.response.allows_reuse());
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let read = read(b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n", true).await.unwrap();
        assert!(read.response.body().is_empty());
        assert!(!read.connection_spent);
    }

    #[tokio::test]
    async fn gzip_body_is_decoded() {
        let packed = compress::gzip(b"mashed potatoes").unwrap();
        let mut wire = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            packed.len()
        )
        .into_bytes();
        wire.extend_from_slice(&packed);

        let read = read(&wire, false).await.unwrap();
        assert_eq!(read.response.text(), "mashed potatoes");
        assert_eq!(read.response.header("content-encoding"), None);
        assert!(!read.connection_spent);

        let wire = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 4\r\n\r\nnope";
        assert!(matches!(self::read(wire, false).await, Err(ClientError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn protocol_violations() {
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort", false).await,
            Err(ClientError::ProtocolViolation(_))
        ));
        assert!(matches!(
            read(b"garbage\r\n\r\n", false).await,
            Err(ClientError::ProtocolViolation(_))
        ));
        assert!(matches!(read(b"", false).await, Err(ClientError::ProtocolViolation(_))));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n", false).await,
            Err(ClientError::ProtocolViolation(_))
        ));
    }
}
