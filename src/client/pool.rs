//! Keep-alive connection pool, keyed by `(scheme, host, port)`.
//!
//! Each target has a semaphore with `max_connections_per_target` permits; a
//! checked-out connection holds one permit, so callers above the cap wait for
//! a connection to be released or discarded. Only the idle lists sit behind a
//! mutex, and it is never held across network I/O.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

use super::ClientError;

/// Where a pooled connection leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    scheme: String,
    host: String,
    port: u16,
}

impl Target {
    /// Extracts the target of an `http://` URL.
    pub fn from_url(url: &Url) -> Result<Self, ClientError> {
        match url.scheme() {
            "http" => {}
            other => return Err(ClientError::UnsupportedScheme(other.to_owned())),
        }
        let host = url.host_str().ok_or_else(|| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_owned(),
        })?;
        Ok(Self {
            scheme: url.scheme().to_owned(),
            host: host.to_owned(),
            port: url.port_or_known_default().unwrap_or(80),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the `Host` header; the port is omitted when it is the default.
    pub fn authority(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Counters across every target in a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened since the pool was created.
    pub opened: usize,
    /// Connections currently idle and available for reuse.
    pub idle: usize,
}

#[derive(Debug)]
struct TargetPool {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<TcpStream>>,
}

impl TargetPool {
    fn idle(&self) -> MutexGuard<'_, Vec<TcpStream>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub(crate) struct Pool {
    targets: Mutex<HashMap<Target, Arc<TargetPool>>>,
    max_per_target: usize,
    opened: AtomicUsize,
}

impl Pool {
    pub(crate) fn new(max_per_target: usize) -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            max_per_target: max_per_target.max(1),
            opened: AtomicUsize::new(0),
        }
    }

    /// The per-target pool for `target`, created on first use.
    ///
    /// Targets with nothing idle and nothing checked out are dropped on the
    /// way, so a session talking to many hosts does not accumulate them.
    fn target_pool(&self, target: &Target) -> Arc<TargetPool> {
        let mut targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);
        targets.retain(|key, pool| key == target || Arc::strong_count(pool) > 1 || !pool.idle().is_empty());
        let pool = targets.entry(target.clone()).or_insert_with(|| {
            Arc::new(TargetPool {
                permits: Arc::new(Semaphore::new(self.max_per_target)),
                idle: Mutex::new(Vec::new()),
            })
        });
        Arc::clone(pool)
    }

    /// Number of targets currently tracked.
    pub(crate) fn targets(&self) -> usize {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Checks out a connection to `target`, reusing an idle one when it is
    /// still open and connecting otherwise.
    ///
    /// Waits at most `pool_timeout` for a free slot under the per-target cap.
    pub(crate) async fn checkout(
        &self,
        target: &Target,
        pool_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<PooledConnection, ClientError> {
        let pool = self.target_pool(target);
        let permit = match timeout(pool_timeout, Arc::clone(&pool.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                return Err(ClientError::PoolExhausted {
                    target: target.to_string(),
                    waited: pool_timeout,
                });
            }
        };

        loop {
            let Some(stream) = pool.idle().pop() else { break };
            if still_open(&stream) {
                trace!(%target, "reusing idle connection");
                return Ok(PooledConnection {
                    stream,
                    pool,
                    permit,
                    reused: true,
                });
            }
            debug!(%target, "discarding stale idle connection");
        }

        let stream = connect(target, connect_timeout).await?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        debug!(%target, "opened connection");
        Ok(PooledConnection {
            stream,
            pool,
            permit,
            reused: false,
        })
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            opened: self.opened.load(Ordering::Relaxed),
            idle: targets.values().map(|pool| pool.idle().len()).sum(),
        }
    }
}

/// A connection checked out of the pool.
///
/// Dropping it closes the connection and frees its slot;
/// [`release`](Self::release) returns it to the idle list instead.
#[derive(Debug)]
pub(crate) struct PooledConnection {
    stream: TcpStream,
    pool: Arc<TargetPool>,
    permit: OwnedSemaphorePermit,
    reused: bool,
}

impl PooledConnection {
    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn is_reused(&self) -> bool {
        self.reused
    }

    /// Returns the connection for reuse. The idle push happens before the
    /// permit is released, so a waiter woken by the permit finds it.
    pub(crate) fn release(self) {
        let Self {
            stream, pool, permit, ..
        } = self;
        pool.idle().push(stream);
        drop(permit);
    }
}

async fn connect(target: &Target, connect_timeout: Duration) -> Result<TcpStream, ClientError> {
    let stream = match timeout(connect_timeout, TcpStream::connect((target.host(), target.port()))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ClientError::Connect {
                target: target.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(ClientError::ConnectTimeout {
                target: target.to_string(),
                timeout: connect_timeout,
            });
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        trace!(%target, error = %e, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// An idle connection is reusable only if the peer has neither closed it
/// nor sent unsolicited bytes.
fn still_open(stream: &TcpStream) -> bool {
    let mut peek = [0u8; 1];
    match stream.try_read(&mut peek) {
        Err(e) if e.kind() == ErrorKind::WouldBlock => true,
        Ok(_) | Err(_) => false,
    }
}
