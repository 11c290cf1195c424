//! Bounded connection pool.
//!
//! A semaphore caps open connections; idle connections are kept on a
//! plain list up to `max_idle_conns`. [`PooledConnection`] is an RAII
//! guard: dropping it returns the connection (and the slot), so a
//! cancelled request releases its resources the moment its future is
//! dropped. A connection in an unknown state after a timeout is
//! [`PooledConnection::discard`]ed instead of returned.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolSettings;
use crate::error::DriverError;
use crate::exec::driver::{Connection, ConnectionFactory};

/// Error acquiring a pooled connection.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("timed out waiting for a free connection slot")]
    Timeout,

    #[error("pool is closed")]
    Closed,

    #[error("failed to open connection: {0}")]
    Connect(DriverError),
}

struct PoolInner {
    factory: Box<dyn ConnectionFactory>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    permits: Arc<Semaphore>,
    max_idle: usize,
}

/// Semaphore-gated pool over a [`ConnectionFactory`].
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(factory: Box<dyn ConnectionFactory>, settings: &PoolSettings) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(settings.max_open_conns as usize)),
                max_idle: settings.max_idle_conns as usize,
            }),
        }
    }

    /// Acquires a connection, waiting at most `timeout` for a free slot.
    ///
    /// An idle connection is reused when one exists; otherwise a fresh
    /// one is opened while the slot is held.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection, AcquireError> {
        let permit =
            tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
                .await
                .map_err(|_| AcquireError::Timeout)?
                .map_err(|_| AcquireError::Closed)?;

        let reused = lock_idle(&self.inner).pop();
        let conn = match reused {
            Some(conn) => conn,
            // Connect failure drops the permit, freeing the slot.
            None => self
                .inner
                .factory
                .connect()
                .await
                .map_err(AcquireError::Connect)?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Idle connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        lock_idle(&self.inner).len()
    }

    /// Slots currently available without waiting.
    pub fn available_slots(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

fn lock_idle(inner: &PoolInner) -> std::sync::MutexGuard<'_, Vec<Box<dyn Connection>>> {
    inner.idle.lock().unwrap_or_else(|e| e.into_inner())
}

/// RAII guard over a pooled connection.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Drops the connection instead of returning it to the pool. The
    /// slot is still released.
    pub fn discard(mut self) {
        self.conn = None;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("connection taken out of live guard"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("connection taken out of live guard"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = lock_idle(&self.inner);
            if idle.len() < self.inner.max_idle {
                idle.push(conn);
            }
        }
        // The permit drops after this, freeing the slot.
    }
}
