//! A small JSON API with graceful shutdown.
//!
//! ```text
//! cargo run --example hello_world
//! curl http://127.0.0.1:8080/users/42
//! curl --compressed http://127.0.0.1:8080/openapi.json
//! ```
//!
//! Press Ctrl-C (or send SIGTERM) to drain in-flight requests and exit.

use std::time::Duration;

use potato::{Context, HandlerError, Response, Router, Server, ServerConfig, StatusCode};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut router = Router::new();
    router
        .get("/", |_ctx: Context| async { Response::html("<h1>Hello from potato</h1>") })?
        .get("/users/:id", |ctx: Context| async move {
            let id = ctx.param("id").unwrap_or_default().to_owned();
            Response::json(&User {
                name: format!("user-{id}"),
                id,
            })
        })?
        .post("/users", |ctx: Context| async move {
            let user: User = ctx.json()?;
            Ok::<_, HandlerError>(Response::json(&user)?.header("Location", format!("/users/{}", user.id)))
        })?
        .get("/slow", |ctx: Context| async move {
            let ms = ctx.query("ms").and_then(|v| v.parse().ok()).unwrap_or(1_000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Response::text(format!("slept {ms}ms"))
        })?
        .delete("/users/:id", |_ctx: Context| async { Response::new(StatusCode::NoContent) })?;
    router
        .serve_dir("/static", "./static")?
        .serve_embedded("/about", [("index.html", &b"<p>Served from memory.</p>"[..])])?
        .serve_openapi("/openapi.json", "hello_world", env!("CARGO_PKG_VERSION"))?;

    let config = ServerConfig::from_env()?;
    let server = Server::bind(config, router).await?;
    tracing::info!(address = %server.local_addr(), "try: curl http://{}/users/42", server.local_addr());

    let report = server.run_until(potato::shutdown_signal()).await?;
    tracing::info!(forced = report.forced, "server stopped");
    std::process::exit(report.exit_code());
}
