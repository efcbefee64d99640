//! Bounded connection pool for the source warehouse.
//!
//! The pool lazily creates connections up to its maximum size and is the
//! primary backpressure mechanism for concurrent table syncs: when all
//! connections are checked out, `acquire` waits up to a bounded timeout and
//! then fails with [`ErrorKind::PoolExhausted`].

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use snowsync_config::shared::PoolConfig;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::source::SourceConnector;
use crate::sync_error;

struct IdleConnection<T> {
    connection: T,
    parked_at: Instant,
}

struct PoolInner<C: SourceConnector> {
    connector: C,
    permits: Arc<Semaphore>,
    idle: std::sync::Mutex<Vec<IdleConnection<C::Connection>>>,
    acquire_timeout: Duration,
    max_idle: Duration,
}

/// Process-wide pool of live source warehouse connections.
///
/// Constructed once per process and shared by reference; cheap to clone.
pub struct ConnectionPool<C: SourceConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: SourceConnector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: SourceConnector> ConnectionPool<C> {
    /// Creates a pool with explicit limits.
    pub fn new(
        connector: C,
        max_size: usize,
        acquire_timeout: Duration,
        max_idle: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                permits: Arc::new(Semaphore::new(max_size)),
                idle: std::sync::Mutex::new(Vec::with_capacity(max_size)),
                acquire_timeout,
                max_idle,
            }),
        }
    }

    /// Creates a pool from configuration.
    pub fn from_config(connector: C, config: &PoolConfig) -> Self {
        Self::new(
            connector,
            config.max_size,
            Duration::from_secs(config.acquire_timeout_secs),
            Duration::from_secs(config.max_idle_secs),
        )
    }

    /// Borrows a connection from the pool.
    ///
    /// Reuses an idle connection when a fresh one is available, otherwise
    /// opens a new one. Waits up to the configured acquire timeout for a
    /// permit when the pool is at capacity, then fails with
    /// [`ErrorKind::PoolExhausted`]. The returned handle gives the connection
    /// back to the pool on drop unless it was marked broken.
    pub async fn acquire(&self) -> SyncResult<PooledConnection<C>> {
        let permit = match timeout(
            self.inner.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(sync_error!(
                    ErrorKind::InvalidState,
                    "Connection pool is closed"
                ));
            }
            Err(_) => {
                return Err(sync_error!(
                    ErrorKind::PoolExhausted,
                    "Timed out waiting for a source connection",
                    format!(
                        "all connections checked out for more than {:?}",
                        self.inner.acquire_timeout
                    )
                ));
            }
        };

        let reused = self.pop_fresh_idle();

        let connection = match reused {
            Some(connection) => {
                debug!("reusing idle source connection");
                connection
            }
            // Lazy creation: the permit is dropped (capacity released) if the
            // connect fails.
            None => self.inner.connector.connect().await?,
        };

        Ok(PooledConnection {
            connection: Some(connection),
            broken: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Pops idle connections, discarding any that sat idle past the limit.
    fn pop_fresh_idle(&self) -> Option<C::Connection> {
        let mut idle = self.inner.idle.lock().expect("pool lock poisoned");

        while let Some(parked) = idle.pop() {
            if parked.parked_at.elapsed() <= self.inner.max_idle {
                return Some(parked.connection);
            }

            debug!("discarding idle source connection past max-idle");
        }

        None
    }
}

/// RAII handle over a pooled connection.
///
/// Dereferences to the underlying connection. Returned to the pool on drop;
/// call [`PooledConnection::mark_broken`] to discard it instead after an
/// error, so the pool lazily replaces it on the next acquire.
pub struct PooledConnection<C: SourceConnector> {
    connection: Option<C::Connection>,
    broken: bool,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: SourceConnector> PooledConnection<C> {
    /// Flags the connection as broken so it is dropped instead of re-pooled.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: SourceConnector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl<C: SourceConnector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection already taken")
    }
}

impl<C: SourceConnector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("connection already taken")
    }
}

impl<C: SourceConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if self.broken {
            warn!("discarding broken source connection");
            return;
        }

        let mut idle = self.pool.idle.lock().expect("pool lock poisoned");
        idle.push(IdleConnection {
            connection,
            parked_at: Instant::now(),
        });
    }
}
