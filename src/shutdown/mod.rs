//! Graceful shutdown: a process-wide drain state plus a registry of live
//! connections.
//!
//! The state only moves forward:
//!
//! ```text
//! Running ──initiate_shutdown──▶ Draining { deadline } ──drained / deadline──▶ Terminated
//! ```
//!
//! Connections register when accepted and deregister when their
//! [`ConnectionGuard`] drops. Registration is refused once draining begins, so
//! the live count can only fall after that point.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{info, warn};

/// Process-wide shutdown phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    /// No new connections; existing ones finish and close by `deadline`.
    Draining { deadline: Instant },
    /// Remaining connections must close now.
    Terminated,
}

impl ShutdownState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections still open when the drain deadline passed.
    pub forced: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.forced == 0
    }

    /// `0` after a clean drain, `1` if any connection had to be forced closed.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() { 0 } else { 1 }
    }
}

/// Identifier attached to a registered connection's log span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<ShutdownState>,
    active: AtomicUsize,
    drained: Notify,
    forced: AtomicUsize,
    next_id: AtomicU64,
}

impl Inner {
    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Cheaply cloneable handle to the shutdown state and connection registry.
///
/// One coordinator is shared by the accept loop, every connection and
/// whatever triggers shutdown (a signal handler, a test).
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            inner: Arc::new(Inner {
                state,
                active: AtomicUsize::new(0),
                drained: Notify::new(),
                forced: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state.borrow()
    }

    /// Number of registered (live) connections.
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Registers a newly accepted connection.
    ///
    /// Returns `None` once shutdown has begun; the caller must then close the
    /// connection without serving it.
    pub fn register(&self) -> Option<ConnectionGuard> {
        // Count first so a concurrent drain either waits for us or we see it.
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if !self.state().is_running() {
            self.inner.release();
            return None;
        }
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        Some(ConnectionGuard {
            coordinator: self.clone(),
            id,
        })
    }

    /// Stops accepting work and waits for registered connections to finish.
    ///
    /// The first call moves `Running` to `Draining` with a deadline of
    /// `now + grace`, waits until the registry is empty or the deadline
    /// passes, then moves to `Terminated`. Connections still open at that
    /// point are counted in [`ShutdownReport::forced`] and close themselves on
    /// observing `Terminated`. Later or concurrent calls wait for the same
    /// outcome and return the same report.
    ///
    /// The first call's future must be driven to completion; dropping it
    /// early leaves the coordinator in `Draining`.
    pub async fn initiate_shutdown(&self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;
        let first = self.inner.state.send_if_modified(|state| {
            if state.is_running() {
                *state = ShutdownState::Draining { deadline };
                true
            } else {
                false
            }
        });

        if !first {
            self.terminated().await;
            return self.report();
        }

        info!(active = self.active_connections(), ?grace, "draining connections");
        self.wait_drained(deadline).await;

        let forced = self.active_connections();
        self.inner.forced.store(forced, Ordering::SeqCst);
        self.inner.state.send_replace(ShutdownState::Terminated);

        if forced == 0 {
            info!("all connections drained");
        } else {
            warn!(forced, "drain deadline passed, forcing connections closed");
        }
        self.report()
    }

    /// Resolves once shutdown has begun.
    pub async fn draining(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_running()).await;
    }

    /// Resolves once the drain deadline has passed or the drain completed.
    pub async fn terminated(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(ShutdownState::is_terminated).await;
    }

    fn report(&self) -> ShutdownReport {
        ShutdownReport {
            forced: self.inner.forced.load(Ordering::SeqCst),
        }
    }

    async fn wait_drained(&self, deadline: Instant) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            // Arm before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.active_connections() == 0 {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return;
            }
        }
    }
}

/// Registration of one live connection; deregisters on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    coordinator: ShutdownCoordinator,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.coordinator.inner.release();
        tracing::trace!(connection_id = %self.id, "connection deregistered");
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-Unix platforms).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
