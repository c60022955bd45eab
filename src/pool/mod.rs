//! Bounded connection pool with validation on borrow.
//!
//! The pool hands out connections produced by a [`Connector`] and enforces:
//!
//! - **max_active**: at most this many connections are checked out at once
//!   (`0` means unbounded). Excess callers either wait for a slot or fail
//!   immediately with [`ConnectionError::Exhausted`], depending on `wait`.
//! - **max_idle**: at most this many released connections are kept for reuse.
//! - **idle_timeout**: idle connections older than this are closed on the next
//!   checkout instead of being reused.
//!
//! Every connection, reused or freshly dialed, passes through
//! [`Connector::validate`] before it is handed out. A connection that fails
//! validation is dropped and the error is returned to the caller; the pool does
//! not retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use work_webui::pool::{Pool, PoolConfig};
//!
//! let pool = Pool::new(connector, PoolConfig::default().with_max_active(3));
//! let mut conn = pool.get().await?;
//! redis::cmd("PING").query_async::<_, String>(&mut *conn).await?;
//! // Dropping `conn` returns it to the idle list.
//! ```

pub mod connector;

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::error::ConnectionError;

pub use connector::{RedisConnector, RedisPool};

/// Produces and validates the physical connections held by a [`Pool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Opens a new physical connection.
    async fn connect(&self) -> Result<Self::Connection, ConnectionError>;

    /// Checks a connection before it is handed to a caller.
    async fn validate(&self, _conn: &mut Self::Connection) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Configuration for a [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once. `0` is unbounded.
    pub max_active: usize,
    /// Maximum number of idle connections retained for reuse.
    pub max_idle: usize,
    /// Idle connections older than this are closed. `Duration::ZERO` disables expiry.
    pub idle_timeout: Duration,
    /// Whether checkout waits for a free slot when the pool is exhausted.
    pub wait: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 64,
            max_idle: 3,
            idle_timeout: Duration::from_secs(240),
            wait: true,
        }
    }
}

impl PoolConfig {
    /// Sets the maximum number of active connections.
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    /// Sets the maximum number of idle connections.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets the idle expiry.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets whether checkout waits when the pool is exhausted.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Point-in-time statistics about a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured active limit (`0` is unbounded).
    pub max_active: usize,
    /// Connections currently checked out.
    pub active: usize,
    /// Connections currently idle.
    pub idle: usize,
    /// Physical connections opened since the pool was created.
    pub dials: u64,
    /// Connections rejected by validation since the pool was created.
    pub validation_failures: u64,
}

struct IdleConn<T> {
    conn: T,
    since: Instant,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn<C::Connection>>>,
    active: AtomicUsize,
    dials: AtomicU64,
    validation_failures: AtomicU64,
    closed: AtomicBool,
}

impl<C: Connector> PoolInner<C> {
    fn idle_list(&self) -> MutexGuard<'_, VecDeque<IdleConn<C::Connection>>> {
        // The idle list stays structurally valid even if a holder panicked.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops the most recently used idle connection, closing expired ones.
    fn pop_idle(&self) -> Option<C::Connection> {
        let mut expired = Vec::new();
        let conn = {
            let mut idle = self.idle_list();
            if !self.config.idle_timeout.is_zero() {
                while idle
                    .back()
                    .is_some_and(|c| c.since.elapsed() > self.config.idle_timeout)
                {
                    expired.extend(idle.pop_back());
                }
            }
            idle.pop_front().map(|c| c.conn)
        };
        if !expired.is_empty() {
            debug!(expired = expired.len(), "Closed expired idle connections");
        }
        conn
    }

    fn put_idle(&self, conn: C::Connection) {
        if self.config.max_idle == 0 {
            return;
        }
        let evicted = {
            let mut idle = self.idle_list();
            // `close` drains under this lock after setting the flag.
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            idle.push_front(IdleConn {
                conn,
                since: Instant::now(),
            });
            if idle.len() > self.config.max_idle {
                idle.pop_back()
            } else {
                None
            }
        };
        drop(evicted);
    }
}

/// A bounded, concurrency-safe pool of connections.
///
/// Cloning a `Pool` is cheap; all clones share the same connections.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Pool<C> {
    /// Creates a pool. No connection is opened until the first checkout.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let permits = if config.max_active == 0 {
            Semaphore::MAX_PERMITS
        } else {
            config.max_active
        };

        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                slots: Arc::new(Semaphore::new(permits)),
                idle: Mutex::new(VecDeque::new()),
                active: AtomicUsize::new(0),
                dials: AtomicU64::new(0),
                validation_failures: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Checks out a connection.
    ///
    /// Reuses the most recently released idle connection when one is
    /// available, otherwise dials a new one. Either way the connection is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Exhausted` if `wait` is off and no slot is free
    /// - `ConnectionError::PoolClosed` if the pool was closed
    /// - any dial, discovery or validation error from the connector
    pub async fn get(&self) -> Result<PooledConnection<C>, ConnectionError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::PoolClosed);
        }

        let permit = self.acquire_slot().await?;

        let mut conn = match inner.pop_idle() {
            Some(conn) => conn,
            None => {
                let conn = inner.connector.connect().await?;
                inner.dials.fetch_add(1, Ordering::SeqCst);
                conn
            }
        };

        if let Err(e) = inner.connector.validate(&mut conn).await {
            inner.validation_failures.fetch_add(1, Ordering::SeqCst);
            warn!(error = %e, "Discarding connection that failed validation");
            return Err(e);
        }

        inner.active.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(inner),
            broken: false,
            _permit: permit,
        })
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ConnectionError> {
        let slots = Arc::clone(&self.inner.slots);
        if self.inner.config.wait {
            slots
                .acquire_owned()
                .await
                .map_err(|_| ConnectionError::PoolClosed)
        } else {
            slots.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::Closed => ConnectionError::PoolClosed,
                TryAcquireError::NoPermits => ConnectionError::Exhausted {
                    max_active: self.inner.config.max_active,
                },
            })
        }
    }

    /// Closes the pool: idle connections are dropped, waiters and later
    /// checkouts fail with `ConnectionError::PoolClosed`. Connections already
    /// checked out are closed when released.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.slots.close();
        let drained: Vec<_> = self.inner.idle_list().drain(..).collect();
        debug!(idle = drained.len(), "Connection pool closed");
    }

    /// Returns whether [`Pool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_active: self.inner.config.max_active,
            active: self.inner.active.load(Ordering::SeqCst),
            idle: self.inner.idle_list().len(),
            dials: self.inner.dials.load(Ordering::SeqCst),
            validation_failures: self.inner.validation_failures.load(Ordering::SeqCst),
        }
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the connector backing this pool.
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying connection. Dropping it returns the
/// connection to the idle list unless it was marked broken.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    broken: bool,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Marks the connection as unusable so it is closed instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(conn) = self.conn.take() {
            if !self.broken {
                self.pool.put_idle(conn);
            }
        }
    }
}
