//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and hands each to its own
//! [`ConnectionSupervisor`] task. The accept loop stops as soon as shutdown
//! begins and the listener is dropped, so queued connections are refused by
//! the OS.

pub mod connection;

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::router::{RouteTable, Router};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};

pub use connection::{CloseReason, ConnectionState, ConnectionSummary, ConnectionSupervisor};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// The potato HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use potato::{Context, Response, Router, Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_ctx: Context| async { Response::text("Hello!") })?;
///
///     let server = Server::bind(ServerConfig::default(), router).await?;
///     let report = server.run_until(potato::shutdown_signal()).await?;
///     std::process::exit(report.exit_code());
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    dispatcher: Dispatcher,
    shutdown: ShutdownCoordinator,
}

impl Server {
    /// Binds `config.addr` with `config.backlog` and seals `router`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(config: ServerConfig, mut router: Router) -> Result<Self, ServerError> {
        let addr = config.addr;
        let listener = listen(addr, config.backlog).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let table = router.seal();
        info!(routes = table.len(), "route table sealed");

        Ok(Self {
            listener,
            local_addr,
            dispatcher: Dispatcher::new(table, config.handler_timeout()),
            config,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn routes(&self) -> &RouteTable {
        self.dispatcher.table()
    }

    /// Handle for triggering and observing shutdown from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown begins.
    ///
    /// Returns once the listener is closed; connections already accepted keep
    /// running in their own tasks until they drain or are forced closed.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped; this currently always
    /// returns `Ok`.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            local_addr,
            config,
            dispatcher,
            shutdown,
        } = self;
        info!(address = %local_addr, "potato listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                biased;
                _ = shutdown.draining() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let Some(guard) = shutdown.register() else {
                debug!(peer = %peer_addr, "refusing connection during shutdown");
                break;
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
            }
            debug!(peer = %peer_addr, id = %guard.id(), "connection accepted");

            let supervisor = ConnectionSupervisor::new(stream, peer_addr, dispatcher.clone(), guard, &config);
            tokio::spawn(supervisor.run());
        }

        drop(listener);
        info!(address = %local_addr, "listener closed");
        Ok(())
    }

    /// Runs until `signal` resolves, then drains for `drain_timeout`.
    ///
    /// The returned report's [`exit_code`](ShutdownReport::exit_code) is the
    /// status the process should exit with.
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future<Output = ()>,
    {
        let shutdown = self.shutdown_handle();
        let grace = self.config.drain_timeout();
        let accept = tokio::spawn(self.run());

        signal.await;
        info!(?grace, "shutdown requested");
        let report = shutdown.initiate_shutdown(grace).await;

        match accept.await {
            Ok(result) => result?,
            Err(e) => warn!(error = %e, "accept loop task failed"),
        }
        Ok(report)
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
