//! # potato
//!
//! A small async HTTP/1.1 framework: declarative routing, per-request handler
//! budgets, graceful shutdown and a pooled client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use potato::{Context, Response, Router, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/users/:id", |ctx: Context| async move {
//!         Response::json(&serde_json::json!({ "id": ctx.param("id") }))
//!     })?;
//!
//!     let server = Server::bind(ServerConfig::default(), router).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     let report = server.run_until(potato::shutdown_signal()).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod handler;
pub mod http;
pub mod router;
pub mod server;
pub mod shutdown;

pub use client::{ClientError, ClientResponse, Session};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use context::{Context, PathParams};
pub use dispatch::{DispatchError, Dispatcher};
pub use handler::{HandlerError, IntoHandler, IntoResponse};
pub use http::{Headers, Method, Request, Response, StatusCode, Version};
pub use router::{LookupError, RouteError, RouteTable, Router};
pub use server::{Server, ServerError};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownState, shutdown_signal};
