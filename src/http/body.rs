//! Message body framing for HTTP/1.1 (RFC 9112 §6).
//!
//! A body is delimited by `Transfer-Encoding: chunked`, by `Content-Length`,
//! or (responses only) by the connection closing. [`BodyFraming::decode`]
//! takes a complete body off the front of a read buffer once it has fully
//! arrived, leaving any pipelined bytes behind.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::Headers;
use super::headers::parse_content_length;

/// Errors detected while framing a body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("invalid Content-Length header")]
    InvalidLength,

    #[error("unsupported transfer coding: {0}")]
    UnsupportedCoding(String),

    #[error("malformed chunked encoding")]
    InvalidChunk,

    #[error("body exceeds maximum allowed size of {limit} bytes")]
    TooLarge { limit: usize },
}

/// How the body of one message is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all.
    Empty,
    /// Exactly `n` bytes follow the head.
    Length(usize),
    /// A sequence of chunks terminated by a zero-size chunk.
    Chunked,
    /// Everything until the peer closes (responses only).
    UntilClose,
}

impl BodyFraming {
    /// Framing of a request body. Requests without either header have none.
    pub fn for_request(headers: &Headers) -> Result<Self, BodyError> {
        match Self::from_headers(headers)? {
            Some(framing) => Ok(framing),
            None => Ok(Self::Empty),
        }
    }

    /// Framing of a response body to a request made with `head_request`.
    pub fn for_response(status: u16, head_request: bool, headers: &Headers) -> Result<Self, BodyError> {
        if head_request || (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Self::Empty);
        }
        match Self::from_headers(headers)? {
            Some(framing) => Ok(framing),
            None => Ok(Self::UntilClose),
        }
    }

    fn from_headers(headers: &Headers) -> Result<Option<Self>, BodyError> {
        if headers.contains("transfer-encoding") {
            let last = headers
                .get_all("transfer-encoding")
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .last()
                .unwrap_or_default();
            return if last.eq_ignore_ascii_case("chunked") {
                Ok(Some(Self::Chunked))
            } else {
                Err(BodyError::UnsupportedCoding(last.to_owned()))
            };
        }

        let mut lengths = headers
            .get_all("content-length")
            .map(|v| parse_content_length(v).ok_or(BodyError::InvalidLength));
        let Some(first) = lengths.next() else {
            return Ok(None);
        };
        let first = first?;
        // Repeated Content-Length fields must all agree.
        for other in lengths {
            if other? != first {
                return Err(BodyError::InvalidLength);
            }
        }
        Ok(Some(if first == 0 { Self::Empty } else { Self::Length(first) }))
    }

    /// Removes a complete body from the front of `buf`.
    ///
    /// Returns `Ok(None)` while more bytes are needed. `UntilClose` bodies are
    /// never complete here; the caller finishes them on EOF with
    /// [`take_remaining`](Self::take_remaining).
    pub fn decode(self, buf: &mut BytesMut, limit: usize) -> Result<Option<Bytes>, BodyError> {
        match self {
            Self::Empty => Ok(Some(Bytes::new())),
            Self::Length(n) => {
                if n > limit {
                    return Err(BodyError::TooLarge { limit });
                }
                if buf.len() < n {
                    return Ok(None);
                }
                Ok(Some(buf.split_to(n).freeze()))
            }
            Self::Chunked => decode_chunked(buf, limit),
            Self::UntilClose => {
                if buf.len() > limit {
                    return Err(BodyError::TooLarge { limit });
                }
                Ok(None)
            }
        }
    }

    /// Completes an `UntilClose` body once the peer has closed.
    pub fn take_remaining(buf: &mut BytesMut) -> Bytes {
        buf.split().freeze()
    }
}

/// Scans a chunked body from the start of `buf`; consumes it only when the
/// terminating chunk and trailer section are both present.
///
/// `limit` bounds the framed size (chunk lines and trailers included), so a
/// peer cannot keep the buffer growing with an endless trailer section.
fn decode_chunked(buf: &mut BytesMut, limit: usize) -> Result<Option<Bytes>, BodyError> {
    let mut pos = 0;
    let mut body = BytesMut::new();

    loop {
        let (header_len, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => return incomplete(buf, limit),
            Err(_) => return Err(BodyError::InvalidChunk),
        };
        let size = usize::try_from(size).map_err(|_| BodyError::TooLarge { limit })?;
        pos += header_len;

        if size == 0 {
            break;
        }
        if pos.saturating_add(size) > limit {
            return Err(BodyError::TooLarge { limit });
        }
        if buf.len() < pos + size + 2 {
            return incomplete(buf, limit);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size;
        if &buf[pos..pos + 2] != b"\r\n" {
            return Err(BodyError::InvalidChunk);
        }
        pos += 2;
    }

    // Trailer fields are skipped up to the blank line that ends the body.
    loop {
        if pos > limit {
            return Err(BodyError::TooLarge { limit });
        }
        let Some(eol) = buf[pos..].windows(2).position(|w| w == b"\r\n") else {
            return incomplete(buf, limit);
        };
        pos += eol + 2;
        if eol == 0 {
            break;
        }
    }

    buf.advance(pos);
    Ok(Some(body.freeze()))
}

/// Every buffered byte belongs to the unfinished body, so it must fit `limit`.
fn incomplete(buf: &BytesMut, limit: usize) -> Result<Option<Bytes>, BodyError> {
    if buf.len() > limit {
        return Err(BodyError::TooLarge { limit });
    }
    Ok(None)
}
