//! Handler types: the async functions bound to routes.
//!
//! Any `Fn(Context) -> impl Future` whose output is a [`Response`] or a
//! `Result<Response, E>` (with `E: Into<HandlerError>`) can be registered.
//! Errors a handler returns are turned into a structured JSON error response;
//! they never take the connection down, except
//! [`HandlerError::Unrecoverable`], which the dispatcher treats like a panic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::context::Context;
use crate::http::{Response, StatusCode};

/// Boxed future returned by a type-erased [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, HandlerError>> + Send>>;

/// Type-erased, shareable async handler.
///
/// You never build this directly; [`Router`](crate::router::Router)
/// registration methods accept any [`IntoHandler`].
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync + 'static>;

/// Failures a handler can report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Answer with `status` and `message`.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// The handler's own state can no longer be trusted; the connection is closed.
    #[error("handler entered an unrecoverable state: {0}")]
    Unrecoverable(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::Unrecoverable(message.into())
    }

    /// Status code the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            Self::Json(_) => StatusCode::BadRequest,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NotFound,
            Self::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => StatusCode::Forbidden,
            Self::Io(_) | Self::Unrecoverable(_) => StatusCode::InternalServerError,
        }
    }

    /// Structured error response for this failure.
    pub fn into_response(self) -> Response {
        let status = self.status();
        // Server-side details stay in the logs.
        let message = if status.is_server_error() {
            status.canonical_reason().to_owned()
        } else {
            self.to_string()
        };
        error_response(status, &message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    error: &'a str,
}

/// `{"status": <code>, "error": "<message>"}` with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        error: message,
    };
    match serde_json::to_vec(&body) {
        Ok(json) => Response::new(status)
            .header("Content-Type", "application/json")
            .body_bytes(json),
        Err(_) => Response::new(status).body(message.to_owned()),
    }
}

/// Conversion from a handler's output into the dispatcher's result type.
pub trait IntoResponse {
    fn into_response(self) -> Result<Response, HandlerError>;
}

impl IntoResponse for Response {
    fn into_response(self) -> Result<Response, HandlerError> {
        Ok(self)
    }
}

impl<E> IntoResponse for Result<Response, E>
where
    E: Into<HandlerError>,
{
    fn into_response(self) -> Result<Response, HandlerError> {
        self.map_err(Into::into)
    }
}

/// Conversion trait for async handler functions.
///
/// Blanket-implemented for every `Fn(Context) -> impl Future + Send` closure
/// or function that is `Send + Sync + 'static` and whose output implements
/// [`IntoResponse`].
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: IntoResponse,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Erases the concrete handler type.
pub(crate) fn erase(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx| handler.call(ctx))
}
