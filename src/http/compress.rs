//! `gzip` content coding (RFC 9110 §8.4.1.3).
//!
//! The server compresses response bodies for clients that send
//! `Accept-Encoding: gzip`; the client decodes `Content-Encoding: gzip`
//! bodies with an output cap.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::Headers;

/// Bodies shorter than this are sent as they are.
pub const GZIP_MIN_BYTES: usize = 32;

/// Whether `Accept-Encoding` lists `gzip` (or `*`) with a non-zero weight.
pub fn accepts_gzip(headers: &Headers) -> bool {
    headers
        .get_all("accept-encoding")
        .flat_map(|v| v.split(','))
        .filter_map(|item| {
            let mut parts = item.split(';').map(str::trim);
            let coding = parts.next()?;
            let weight = parts
                .find_map(|p| p.strip_prefix("q=").or_else(|| p.strip_prefix("Q=")))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((coding, weight))
        })
        .any(|(coding, weight)| {
            weight > 0.0
                && (coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") || coding == "*")
        })
}

/// Whether the message body is gzip-coded.
pub fn is_gzip_encoded(headers: &Headers) -> bool {
    headers.has_token("content-encoding", "gzip") || headers.has_token("content-encoding", "x-gzip")
}

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decodes a gzip body, failing once the output would exceed `limit` bytes.
pub fn gunzip(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    GzDecoder::new(data).take(cap).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decoded body exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}
