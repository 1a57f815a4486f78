//! Bounded connection pool.
//!
//! Backends that hold per-operation resources (file handles, database
//! connections) acquire them through a [`ConnectionPool`]. A
//! [`PooledConnection`] is returned to the pool when dropped, so release
//! happens on every exit path including early `?` returns.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

/// Creates and validates pooled connections.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> BackendResult<Self::Connection>;

    /// Called before an idle connection is handed out again. Invalid
    /// connections are dropped and replaced.
    fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

/// Pool limits.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Upper bound on live connections (idle + in use).
    pub max_connections: usize,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    pub in_use: usize,
    pub idle: usize,
    pub created: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub total_requests: u64,
}

struct PoolState<C> {
    idle: Vec<C>,
    in_use: usize,
    closed: bool,
    created: u64,
    failed: u64,
    timeouts: u64,
    total_requests: u64,
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
}

impl<F: ConnectionFactory> Shared<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, conn: Option<F::Connection>) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if let Some(conn) = conn {
            if !state.closed {
                state.idle.push(conn);
            }
        }
        drop(state);
        self.available.notify_one();
    }
}

/// A bounded pool of connections produced by a [`ConnectionFactory`].
///
/// Cloning yields another handle to the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let config = PoolConfig {
            max_connections: config.max_connections.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    in_use: 0,
                    closed: false,
                    created: 0,
                    failed: 0,
                    timeouts: 0,
                    total_requests: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub fn acquire(&self) -> BackendResult<PooledConnection<F>> {
        let shared = &self.shared;
        let started = Instant::now();
        let deadline = started + shared.config.acquire_timeout;
        let mut state = shared.lock();
        state.total_requests += 1;

        loop {
            if state.closed {
                return Err(BackendError::Closed);
            }

            if let Some(mut conn) = state.idle.pop() {
                if shared.factory.is_valid(&mut conn) {
                    state.in_use += 1;
                    return Ok(self.wrap(conn));
                }
                debug!("dropping invalid pooled connection");
                continue;
            }

            if state.in_use < shared.config.max_connections {
                // Reserve the slot, then connect without holding the lock.
                state.in_use += 1;
                drop(state);
                return match shared.factory.connect() {
                    Ok(conn) => {
                        shared.lock().created += 1;
                        Ok(self.wrap(conn))
                    }
                    Err(e) => {
                        shared.lock().failed += 1;
                        shared.give_back(None);
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                state.timeouts += 1;
                let waited = now - started;
                warn!(?waited, max = shared.config.max_connections, "connection pool exhausted");
                return Err(BackendError::PoolTimeout { waited });
            }
            state = shared
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Close the pool. Idle connections are dropped; connections in use are
    /// dropped when released. Later `acquire` calls fail with `Closed`.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);
        self.shared.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            max_connections: self.shared.config.max_connections,
            in_use: state.in_use,
            idle: state.idle.len(),
            created: state.created,
            failed: state.failed,
            timeouts: state.timeouts,
            total_requests: state.total_requests,
        }
    }

    fn wrap(&self, conn: F::Connection) -> PooledConnection<F> {
        PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool on drop.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Return the connection to the pool now.
    pub fn release(self) {}

    /// Drop the connection instead of returning it, freeing its slot.
    pub fn discard(mut self) {
        self.conn.take();
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `None` after `discard`/drop, which consume the wrapper.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        self.shared.give_back(self.conn.take());
    }
}
