//! Request dispatch: resolve a route, run its handler under a time budget and
//! turn the outcome into a response or a connection-level verdict.
//!
//! Each handler runs as its own Tokio task so that a panic is contained and a
//! timeout can cancel it without touching the connection's other work. The
//! request body travels inside the handler's [`Context`]; the body is
//! released with the task however it ends.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::{HandlerError, error_response};
use crate::http::{Method, Request, Response, StatusCode};
use crate::router::{LookupError, RouteTable};

/// Per-request failures the dispatcher reports to the connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches {path}")]
    NotFound { path: String },

    #[error("method {method} is not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },

    /// The handler ran past its budget and was cancelled.
    #[error("handler did not finish within {0:?}")]
    HandlerTimeout(Duration),

    /// The handler panicked or declared its state unrecoverable.
    #[error("handler failed unrecoverably: {0}")]
    Panicked(String),
}

impl From<LookupError> for DispatchError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound { path } => Self::NotFound { path },
            LookupError::MethodNotAllowed {
                method,
                path,
                allowed,
            } => Self::MethodNotAllowed {
                method,
                path,
                allowed,
            },
        }
    }
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::MethodNotAllowed { .. } => StatusCode::MethodNotAllowed,
            Self::HandlerTimeout(_) => StatusCode::ServiceUnavailable,
            Self::Panicked(_) => StatusCode::InternalServerError,
        }
    }

    /// Whether the connection must be closed rather than reused. A timed-out
    /// or panicked handler leaves its side effects in an unknown state.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::HandlerTimeout(_) | Self::Panicked(_))
    }

    /// The error response to send, if headers have not been written yet.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let closes = self.closes_connection();
        let mut response = error_response(status, status.canonical_reason());
        if let Self::MethodNotAllowed { allowed, .. } = &self {
            response.add_header("Allow", allow_header(allowed));
        }
        response.keep_alive(!closes)
    }
}

/// Resolves requests against an immutable [`RouteTable`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(table: Arc<RouteTable>, handler_timeout: Duration) -> Self {
        Self {
            table,
            handler_timeout,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Dispatches one request to its handler.
    ///
    /// A `HEAD` request with no `HEAD` route is served by the `GET` route (the
    /// connection drops the body), and an `OPTIONS` request with no `OPTIONS`
    /// route answers `204` with an `Allow` header.
    ///
    /// Handler errors come back as `Ok` structured error responses; only
    /// routing misses, timeouts and panics are `Err`.
    pub async fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        let method = request.method().clone();
        let found = match self.table.find(&method, request.path()) {
            Ok(found) => found,
            Err(LookupError::MethodNotAllowed { allowed, .. })
                if method == Method::Head && allowed.contains(&Method::Get) =>
            {
                self.table.find(&Method::Get, request.path())?
            }
            Err(LookupError::MethodNotAllowed { allowed, .. }) if method == Method::Options => {
                return Ok(Response::new(StatusCode::NoContent).header("Allow", allow_header(&allowed)));
            }
            Err(err) => return Err(err.into()),
        };

        let handler = Arc::clone(found.route().handler());
        let pattern = found.route().pattern().as_str().to_owned();
        let ctx = Context::with_params(request, found.into_params());

        let mut task = AbortOnDrop(tokio::spawn(handler(ctx)));
        match tokio::time::timeout(self.handler_timeout, &mut task.0).await {
            Err(_) => {
                warn!(%method, route = %pattern, budget = ?self.handler_timeout, "handler timed out");
                Err(DispatchError::HandlerTimeout(self.handler_timeout))
            }
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(HandlerError::Unrecoverable(reason)))) => {
                warn!(%method, route = %pattern, %reason, "handler reported unrecoverable state");
                Err(DispatchError::Panicked(reason))
            }
            Ok(Ok(Err(err))) => {
                debug!(%method, route = %pattern, error = %err, "handler returned an error");
                Ok(err.into_response())
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "handler task was cancelled".to_owned()
                };
                warn!(%method, route = %pattern, %reason, "handler panicked");
                Err(DispatchError::Panicked(reason))
            }
        }
    }
}

/// Aborts the handler task if dispatch is abandoned (timeout, forced close).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

/// `Allow` value: the given methods plus the implicit `HEAD` and `OPTIONS`.
fn allow_header(allowed: &[Method]) -> String {
    let mut methods = allowed.to_vec();
    if methods.contains(&Method::Get) {
        methods.push(Method::Head);
    }
    methods.push(Method::Options);
    methods.sort();
    methods.dedup();
    methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
}
