//! End-to-end behavior of a bound server: routing over the wire, handler
//! timeouts and graceful shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use potato::{Context, Response, Router, Server, ServerConfig, ShutdownCoordinator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn router() -> Router {
    let mut router = Router::new();
    router
        .get("/users/:id", |ctx: Context| async move {
            Response::json(&serde_json::json!({ "id": ctx.param("id") }))
        })
        .unwrap();
    router
        .get("/sleep/:ms", |ctx: Context| async move {
            let ms: u64 = ctx.param("ms").and_then(|v| v.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Response::text("done")
        })
        .unwrap();
    router
}

async fn start(config: ServerConfig) -> (SocketAddr, ShutdownCoordinator, JoinHandle<()>) {
    let config = config.with_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
    let server = Server::bind(config, router()).await.unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(async move { server.run().await.unwrap() });
    (addr, shutdown, task)
}

/// Sends raw bytes and reads until the server closes the connection.
async fn exchange(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn routes_resolve_over_the_wire() {
    let (addr, shutdown, _task) = start(ServerConfig::default()).await;

    let ok = exchange(addr, "GET /users/42 HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(ok.ends_with(r#"{"id":"42"}"#));

    let not_allowed = exchange(addr, "POST /users/42 HTTP/1.1\r\nConnection: close\r\nContent-Length: 0\r\n\r\n").await;
    assert!(not_allowed.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(not_allowed.contains("Allow: GET, HEAD, OPTIONS\r\n"));

    let missing = exchange(addr, "GET /orders/42 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(missing.contains(r#""status":404"#));

    assert!(shutdown.initiate_shutdown(Duration::from_secs(1)).await.is_clean());
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let (addr, shutdown, _task) = start(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut buf = vec![0u8; 4096];
    for id in ["1", "2"] {
        stream
            .write_all(format!("GET /users/{id} HTTP/1.1\r\nHost: t\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("Connection: keep-alive"));
        assert!(text.ends_with(&format!(r#"{{"id":"{id}"}}"#)));
    }
    drop(stream);

    assert!(shutdown.initiate_shutdown(Duration::from_secs(1)).await.is_clean());
}

#[tokio::test]
async fn handler_timeout_closes_connection() {
    let config = ServerConfig::default().with_handler_timeout(Duration::from_millis(100));
    let (addr, shutdown, _task) = start(config).await;

    let text = exchange(addr, "GET /sleep/1000 HTTP/1.1\r\n\r\nGET /users/1 HTTP/1.1\r\n\r\n").await;
    assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert_eq!(text.matches("HTTP/1.1").count(), 1);

    assert!(shutdown.initiate_shutdown(Duration::from_secs(1)).await.is_clean());
}

#[tokio::test]
async fn shutdown_with_no_connections_is_immediate() {
    let (addr, shutdown, task) = start(ServerConfig::default()).await;

    let started = std::time::Instant::now();
    let report = shutdown.initiate_shutdown(Duration::from_secs(30)).await;
    assert_eq!(report.forced, 0);
    assert_eq!(report.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(1));

    task.await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn in_flight_request_drains_cleanly() {
    let (addr, shutdown, _task) = start(ServerConfig::default()).await;

    let client = tokio::spawn(exchange(addr, "GET /sleep/200 HTTP/1.1\r\n\r\n"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = shutdown.initiate_shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.forced, 0);

    let text = client.await.unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("done"));
}

#[tokio::test]
async fn request_arriving_mid_drain_is_answered_with_503() {
    let (addr, shutdown, _task) = start(ServerConfig::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /sleep/300 HTTP/1.1\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let drain = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.initiate_shutdown(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"GET /users/1 HTTP/1.1\r\n\r\n").await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    let done = text.find("done").unwrap();
    let closing = text.find("connection closing").unwrap();
    assert!(done < closing);
    assert!(text.contains("HTTP/1.1 503 Service Unavailable\r\n"));

    assert_eq!(drain.await.unwrap().forced, 0);
}

#[tokio::test]
async fn in_flight_request_past_deadline_is_forced() {
    let (addr, shutdown, _task) = start(ServerConfig::default()).await;

    let client = tokio::spawn(exchange(addr, "GET /sleep/5000 HTTP/1.1\r\n\r\n"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = shutdown.initiate_shutdown(Duration::from_millis(100)).await;
    assert_eq!(report.forced, 1);
    assert_eq!(report.exit_code(), 1);

    assert!(client.await.unwrap().is_empty());
}

#[tokio::test]
async fn run_until_drains_after_signal() {
    let config = ServerConfig::default()
        .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_drain_timeout(Duration::from_secs(2));
    let server = Server::bind(config, router()).await.unwrap();
    let addr = server.local_addr();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    let ok = exchange(addr, "GET /users/5 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200 OK"));

    tx.send(()).unwrap();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit_code(), 0);
}
