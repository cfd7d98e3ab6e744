//! Issues concurrent requests through one pooled session.
//!
//! ```text
//! cargo run --example hello_world &
//! cargo run --example client_session -- http://127.0.0.1:8080
//! ```

use std::time::Duration;

use potato::{ClientConfig, Session};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let base = std::env::args().nth(1).unwrap_or_else(|| "http://127.0.0.1:8080".to_owned());
    let session = Session::with_config(
        ClientConfig::default()
            .with_max_connections_per_target(2)
            .with_pool_timeout(Duration::from_secs(5)),
    );

    let mut tasks = Vec::new();
    for id in 1..=5 {
        let session = session.clone();
        let url = format!("{base}/users/{id}");
        tasks.push(tokio::spawn(async move { session.get(&url).await }));
    }
    for task in tasks {
        match task.await? {
            Ok(res) => println!("{} {}", res.status(), res.text()),
            Err(e) => eprintln!("request failed (retryable: {}): {e}", e.is_retryable()),
        }
    }

    let created = session
        .post_json(&format!("{base}/users"), &serde_json::json!({ "id": "7", "name": "ada" }))
        .await?;
    println!("{} location={:?}", created.status(), created.header("location"));

    let stats = session.pool_stats();
    println!("connections opened: {}, idle: {}", stats.opened, stats.idle);
    Ok(())
}
