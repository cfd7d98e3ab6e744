//! Per-connection supervisor: reads requests, dispatches them in order and
//! writes responses until the connection has a reason to close.
//!
//! ```text
//! Accepted ─request─▶ Active ─keep-alive─▶ Idle ─request─▶ Active ...
//!                       │                    │
//!                       │ drain began        │ idle timeout, peer close, drain
//!                       ▼                    ▼
//!                    Draining ───────────▶ Closed
//! ```
//!
//! The supervisor is generic over the byte stream so it can be driven by a
//! `TcpStream` in production and an in-memory duplex pipe in tests.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::config::ServerConfig;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::handler::error_response;
use crate::http::{BodyFraming, Method, Request, StatusCode, body::BodyError, compress, request::RequestError};
use crate::shutdown::ConnectionGuard;

const INITIAL_BUF_SIZE: usize = 4096;
/// How long a draining connection keeps reading bytes the peer already sent.
const DRAIN_LINGER: Duration = Duration::from_millis(50);

/// Lifecycle phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, no request read yet.
    Accepted,
    /// A request is being dispatched or its response written.
    Active,
    /// Between keep-alive requests.
    Idle,
    /// Finishing the in-flight request after shutdown began.
    Draining,
    Closed,
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    /// The request or response opted out of keep-alive.
    NotKeepAlive,
    IdleTimeout,
    /// Closed because shutdown began.
    Drained,
    HandlerTimeout,
    HandlerPanicked,
    BadRequest,
    PayloadTooLarge,
    /// The drain deadline passed with work still in flight.
    Forced,
    Io,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PeerClosed => "peer closed",
            Self::NotKeepAlive => "not keep-alive",
            Self::IdleTimeout => "idle timeout",
            Self::Drained => "drained",
            Self::HandlerTimeout => "handler timeout",
            Self::HandlerPanicked => "handler panicked",
            Self::BadRequest => "bad request",
            Self::PayloadTooLarge => "payload too large",
            Self::Forced => "forced",
            Self::Io => "i/o error",
        };
        f.write_str(s)
    }
}

/// What a finished connection did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub requests_served: u64,
    pub close_reason: CloseReason,
}

/// Owns one accepted connection for its whole life.
pub struct ConnectionSupervisor<S> {
    stream: S,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    guard: ConnectionGuard,
    idle_timeout: Duration,
    max_request_bytes: usize,
    compress: bool,
    buf: BytesMut,
    state: ConnectionState,
    requests_served: u64,
}

impl<S> ConnectionSupervisor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        dispatcher: Dispatcher,
        guard: ConnectionGuard,
        config: &ServerConfig,
    ) -> Self {
        Self {
            stream,
            peer,
            dispatcher,
            guard,
            idle_timeout: config.idle_timeout(),
            max_request_bytes: config.max_request_bytes,
            compress: config.compress_responses,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            state: ConnectionState::Accepted,
            requests_served: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serves requests until the connection closes. Deregisters the
    /// connection from shutdown tracking when it returns.
    pub async fn run(mut self) -> ConnectionSummary {
        let span = info_span!("connection", id = %self.guard.id(), peer = %self.peer);
        async {
            let close_reason = self.serve().await;
            if close_reason != CloseReason::Forced {
                let _ = self.stream.shutdown().await;
            }
            self.transition(ConnectionState::Closed);
            debug!(requests = self.requests_served, reason = %close_reason, "connection closed");
            ConnectionSummary {
                requests_served: self.requests_served,
                close_reason,
            }
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> CloseReason {
        let coordinator = self.guard.coordinator().clone();
        loop {
            let request = match self.read_request().await {
                Ok(request) => request,
                Err(reason) => return reason,
            };
            self.transition(ConnectionState::Active);

            let head = *request.method() == Method::Head;
            let wants_keep_alive = request.is_keep_alive();
            let accepts_gzip = self.compress && compress::accepts_gzip(request.headers());
            let method = request.method().clone();
            let path = request.path().to_owned();
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = coordinator.terminated() => return CloseReason::Forced,
                outcome = self.dispatcher.dispatch(request) => outcome,
            };

            let (response, fatal) = match outcome {
                Ok(response) => (response, None),
                Err(err) => {
                    let fatal = match &err {
                        DispatchError::HandlerTimeout(_) => Some(CloseReason::HandlerTimeout),
                        DispatchError::Panicked(_) => Some(CloseReason::HandlerPanicked),
                        _ => None,
                    };
                    (err.into_response(), fatal)
                }
            };

            let running = coordinator.state().is_running();
            if !running {
                self.transition(ConnectionState::Draining);
            }
            let keep_alive = wants_keep_alive && response.is_keep_alive() && running && fatal.is_none();
            let status = response.status();
            let bytes = response.compressed_for(accepts_gzip).keep_alive(keep_alive).encode(head);

            let written = tokio::select! {
                biased;
                _ = coordinator.terminated() => return CloseReason::Forced,
                written = write_all(&mut self.stream, &bytes) => written,
            };
            if let Err(e) = written {
                warn!(error = %e, "failed to write response");
                return CloseReason::Io;
            }
            self.requests_served += 1;
            info!("{method} {path} - {} ({:.2?})", status.as_u16(), started.elapsed());

            if let Some(reason) = fatal {
                return reason;
            }
            if !running {
                return self.close_for_drain().await;
            }
            if !keep_alive {
                return CloseReason::NotKeepAlive;
            }
            self.transition(ConnectionState::Idle);
        }
    }

    /// Reads until a complete request (head and body) is buffered.
    ///
    /// Bytes after the request stay in the buffer for the next call. The idle
    /// timeout bounds silence from the peer, so it restarts on every read.
    async fn read_request(&mut self) -> Result<Request, CloseReason> {
        let coordinator = self.guard.coordinator().clone();
        let mut deadline = Instant::now() + self.idle_timeout;
        loop {
            if !coordinator.state().is_running() {
                return Err(self.close_for_drain().await);
            }
            if let Some(request) = self.parse_buffered().await? {
                return Ok(request);
            }

            let read = tokio::select! {
                biased;
                _ = coordinator.draining() => continue,
                read = tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.buf)) => read,
            };
            match read {
                Err(_) => {
                    debug!(timeout = ?self.idle_timeout, "idle timeout");
                    return Err(CloseReason::IdleTimeout);
                }
                Ok(Ok(0)) => {
                    if !self.buf.is_empty() {
                        debug!(buffered = self.buf.len(), "peer closed mid-request");
                    }
                    return Err(CloseReason::PeerClosed);
                }
                Ok(Ok(n)) => {
                    trace!(bytes = n, "read");
                    deadline = Instant::now() + self.idle_timeout;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "read failed");
                    return Err(CloseReason::Io);
                }
            }
        }
    }

    /// Tries to take one complete request off the front of the buffer.
    async fn parse_buffered(&mut self) -> Result<Option<Request>, CloseReason> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let (request, head_len) = match Request::parse(&self.buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if self.buf.len() > self.max_request_bytes {
                    warn!(limit = self.max_request_bytes, "request head too large");
                    return Err(self.reject(StatusCode::PayloadTooLarge, CloseReason::PayloadTooLarge).await);
                }
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "malformed request");
                return Err(self.reject(StatusCode::BadRequest, CloseReason::BadRequest).await);
            }
        };

        let framing = match request.framing() {
            Ok(framing) => framing,
            Err(e) => {
                warn!(error = %e, "unusable request framing");
                return Err(self.reject(StatusCode::BadRequest, CloseReason::BadRequest).await);
            }
        };
        if framing == BodyFraming::UntilClose {
            return Err(self.reject(StatusCode::BadRequest, CloseReason::BadRequest).await);
        }

        let limit = self.max_request_bytes.saturating_sub(head_len);
        let mut rest = self.buf.split_off(head_len);
        match framing.decode(&mut rest, limit) {
            Ok(Some(body)) => {
                self.buf = rest;
                Ok(Some(request.with_body(body)))
            }
            Ok(None) => {
                self.buf.unsplit(rest);
                if self.buf.len() > self.max_request_bytes {
                    warn!(limit = self.max_request_bytes, "request too large");
                    return Err(self.reject(StatusCode::PayloadTooLarge, CloseReason::PayloadTooLarge).await);
                }
                Ok(None)
            }
            Err(BodyError::TooLarge { limit }) => {
                warn!(limit, "request body too large");
                Err(self.reject(StatusCode::PayloadTooLarge, CloseReason::PayloadTooLarge).await)
            }
            Err(e) => {
                warn!(error = %e, "malformed request body");
                Err(self.reject(StatusCode::BadRequest, CloseReason::BadRequest).await)
            }
        }
    }

    /// Closes on drain, answering any partly or fully buffered request with
    /// `503` first.
    ///
    /// Bytes the peer sent while the last request was in flight are read
    /// before closing, so they get an answer instead of a reset.
    async fn close_for_drain(&mut self) -> CloseReason {
        self.transition(ConnectionState::Draining);
        let linger = Instant::now() + DRAIN_LINGER;
        while self.buf.len() <= self.max_request_bytes {
            match tokio::time::timeout_at(linger, self.stream.read_buf(&mut self.buf)).await {
                Ok(Ok(n)) if n > 0 => trace!(bytes = n, "read while draining"),
                _ => break,
            }
        }

        if !self.buf.is_empty() {
            debug!(buffered = self.buf.len(), "refusing buffered request during drain");
            let response = error_response(StatusCode::ServiceUnavailable, "connection closing").keep_alive(false);
            let _ = write_all(&mut self.stream, &response.encode(false)).await;
            self.buf.clear();
        }
        CloseReason::Drained
    }

    async fn reject(&mut self, status: StatusCode, reason: CloseReason) -> CloseReason {
        let response = error_response(status, status.canonical_reason()).keep_alive(false);
        if let Err(e) = write_all(&mut self.stream, &response.encode(false)).await {
            debug!(error = %e, "failed to write error response");
        }
        self.buf.clear();
        reason
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "connection state");
            self.state = next;
        }
    }
}

async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::context::Context;
    use crate::http::Response;
    use crate::router::Router;
    use crate::shutdown::ShutdownCoordinator;

    fn router() -> Router {
        let mut router = Router::new();
        router
            .get("/users/:id", |ctx: Context| async move {
                Response::text(format!("user {}", ctx.param("id").unwrap_or_default()))
            })
            .unwrap();
        router
            .post("/echo", |ctx: Context| async move { Response::new(StatusCode::Ok).body_bytes(ctx.body().clone()) })
            .unwrap();
        router
            .get("/slow", |_ctx: Context| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Response::text("late")
            })
            .unwrap();
        router
    }

    fn config() -> ServerConfig {
        ServerConfig::default()
            .with_handler_timeout(Duration::from_millis(100))
            .with_idle_timeout(Duration::from_millis(200))
            .with_max_request_bytes(1024)
    }

    fn start(coordinator: &ShutdownCoordinator, config: ServerConfig) -> (DuplexStream, tokio::task::JoinHandle<ConnectionSummary>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let dispatcher = Dispatcher::new(router().seal(), config.handler_timeout());
        let guard = coordinator.register().unwrap();
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        let supervisor = ConnectionSupervisor::new(server, peer, dispatcher, guard, &config);
        (client, tokio::spawn(supervisor.run()))
    }

    async fn read_all(client: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());

        client
            .write_all(
                b"GET /users/1 HTTP/1.1\r\nHost: x\r\n\r\n\
                  POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello",
            )
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let text = read_all(&mut client).await;
        let first = text.find("user 1").unwrap();
        let second = text.find("hello").unwrap();
        assert!(first < second);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);

        let summary = task.await.unwrap();
        assert_eq!(summary.requests_served, 2);
        assert_eq!(summary.close_reason, CloseReason::PeerClosed);
        assert_eq!(coordinator.active_connections(), 0);
    }

    #[tokio::test]
    async fn http10_closes_after_one_response() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());
        client.write_all(b"GET /users/7 HTTP/1.0\r\n\r\n").await.unwrap();

        let text = read_all(&mut client).await;
        assert!(text.contains("Connection: close"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::NotKeepAlive);
    }

    #[tokio::test]
    async fn chunked_request_body_is_decoded() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());
        client
            .write_all(
                b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
                  3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
            )
            .await
            .unwrap();

        let text = read_all(&mut client).await;
        assert!(text.ends_with("\r\n\r\nabcde"));
        assert_eq!(task.await.unwrap().requests_served, 1);
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, _task) = start(&coordinator, config());
        client
            .write_all(b"HEAD /users/9 HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Content-Length: 6"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn responses_are_gzipped_when_accepted() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, _task) = start(&coordinator, config());
        let body = "potato ".repeat(40);
        client
            .write_all(
                format!(
                    "POST /echo HTTP/1.1\r\nAccept-Encoding: gzip\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let head_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8_lossy(&out[..head_end]);
        assert!(head.contains("Content-Encoding: gzip\r\n"));
        assert!(head.contains(&format!("Content-Length: {}\r\n", out.len() - head_end)));
        assert_eq!(compress::gunzip(&out[head_end..], 4096).unwrap(), body.as_bytes());
    }

    #[tokio::test]
    async fn compression_can_be_disabled() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, _task) = start(&coordinator, config().with_compress_responses(false));
        let body = "potato ".repeat(40);
        client
            .write_all(
                format!(
                    "POST /echo HTTP/1.1\r\nAccept-Encoding: gzip\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let text = read_all(&mut client).await;
        assert!(!text.contains("Content-Encoding"));
        assert!(text.ends_with(&body));
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());
        client.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::BadRequest);
    }

    #[tokio::test]
    async fn oversized_body_gets_413() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());
        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 4096\r\n\r\n")
            .await
            .unwrap();

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::PayloadTooLarge);
    }

    #[tokio::test]
    async fn handler_timeout_closes_the_connection() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());
        // The second request must never be served.
        client
            .write_all(b"GET /slow HTTP/1.1\r\n\r\nGET /users/1 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable"));
        assert!(text.contains("Connection: close"));
        assert!(!text.contains("user 1"));

        let summary = task.await.unwrap();
        assert_eq!(summary.requests_served, 1);
        assert_eq!(summary.close_reason, CloseReason::HandlerTimeout);
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let coordinator = ShutdownCoordinator::new();
        let (_client, task) = start(&coordinator, config());
        let summary = task.await.unwrap();
        assert_eq!(summary.requests_served, 0);
        assert_eq!(summary.close_reason, CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn idle_connection_closes_when_drain_begins() {
        let coordinator = ShutdownCoordinator::new();
        let config = config().with_idle_timeout(Duration::from_secs(30));
        let (mut client, task) = start(&coordinator, config);

        client.write_all(b"GET /users/1 HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("user 1"));

        let report = coordinator.initiate_shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.forced, 0);
        assert_eq!(task.await.unwrap().close_reason, CloseReason::Drained);
    }

    #[tokio::test]
    async fn partial_request_during_drain_gets_503() {
        let coordinator = ShutdownCoordinator::new();
        let config = config().with_idle_timeout(Duration::from_secs(30));
        let (mut client, task) = start(&coordinator, config);

        client.write_all(b"GET /users/1 HTTP/1.1\r\nHo").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = coordinator.initiate_shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.forced, 0);

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable"));
        assert!(text.contains("connection closing"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::Drained);
    }

    #[tokio::test]
    async fn in_flight_request_finishes_with_close_during_drain() {
        let coordinator = ShutdownCoordinator::new();
        let config = config().with_handler_timeout(Duration::from_secs(5));
        let (mut client, task) = start(&coordinator, config);

        client.write_all(b"GET /slow HTTP/1.1\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = coordinator.initiate_shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.forced, 0);

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Connection: close"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::Drained);
    }

    #[tokio::test]
    async fn request_sent_during_drain_gets_503_after_in_flight_response() {
        let coordinator = ShutdownCoordinator::new();
        let config = config().with_handler_timeout(Duration::from_secs(5));
        let (mut client, task) = start(&coordinator, config);

        client.write_all(b"GET /slow HTTP/1.1\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let drain = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.initiate_shutdown(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"GET /users/1 HTTP/1.1\r\n\r\n").await.unwrap();

        let text = read_all(&mut client).await;
        let late = text.find("late").unwrap();
        let closing = text.find("connection closing").unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(late < closing);
        assert!(!text.contains("user 1"));

        assert_eq!(drain.await.unwrap().forced, 0);
        let summary = task.await.unwrap();
        assert_eq!(summary.requests_served, 1);
        assert_eq!(summary.close_reason, CloseReason::Drained);
    }

    #[tokio::test]
    async fn endless_chunked_trailers_get_413() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config().with_idle_timeout(Duration::from_secs(30)));

        let mut raw = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n".to_vec();
        for _ in 0..100 {
            raw.extend_from_slice(b"X-Pad: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        client.write_all(&raw).await.unwrap();

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::PayloadTooLarge);
    }

    #[tokio::test]
    async fn slow_upload_is_not_an_idle_timeout() {
        let coordinator = ShutdownCoordinator::new();
        let (mut client, task) = start(&coordinator, config());

        client
            .write_all(b"POST /echo HTTP/1.1\r\nConnection: close\r\nContent-Length: 8\r\n\r\n")
            .await
            .unwrap();
        // Eight 100 ms gaps add up past the 200 ms idle timeout.
        for byte in b"trickled" {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.write_all(&[*byte]).await.unwrap();
        }

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("trickled"));
        assert_eq!(task.await.unwrap().close_reason, CloseReason::NotKeepAlive);
    }

    #[tokio::test]
    async fn in_flight_request_past_deadline_is_forced() {
        let coordinator = ShutdownCoordinator::new();
        let config = config().with_handler_timeout(Duration::from_secs(5));
        let (mut client, task) = start(&coordinator, config);

        client.write_all(b"GET /slow HTTP/1.1\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let report = coordinator.initiate_shutdown(Duration::from_millis(50)).await;
        assert_eq!(report.forced, 1);

        let summary = task.await.unwrap();
        assert_eq!(summary.close_reason, CloseReason::Forced);
        assert_eq!(summary.requests_served, 0);
        assert!(read_all(&mut client).await.is_empty());
    }
}
