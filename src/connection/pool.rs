use super::Connection;
use super::config::{PoolConfig, TransactionConfig};
use crate::core::{Result, TxError};
use crate::transaction::TransactionManager;
use log::{debug, warn};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Opens new connections for a [`ConnectionPool`]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection + Send;

    fn connect(&self) -> Result<Self::Connection>;
}

impl<F, C> ConnectionFactory for F
where
    F: Fn() -> Result<C> + Send + Sync,
    C: Connection + Send,
{
    type Connection = C;

    fn connect(&self) -> Result<C> {
        self()
    }
}

/// Connection pool
///
/// Gives each concurrent logical operation its own connection, and with
/// [`transaction_manager`](Self::transaction_manager) its own manager.
pub struct ConnectionPool<F: ConnectionFactory> {
    /// Pool configuration
    config: PoolConfig,
    /// Dialect handed to every manager built by the pool
    tx_config: TransactionConfig,
    factory: F,
    /// Available connections
    available: Arc<Mutex<VecDeque<PooledConnection<F::Connection>>>>,
    /// Total number of connections created and not yet discarded
    total_connections: Arc<AtomicUsize>,
}

/// A connection from the pool
struct PooledConnection<C> {
    connection: C,
    created_at: Instant,
    last_used: Instant,
}

impl<C> PooledConnection<C> {
    fn new(connection: C) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used: now,
        }
    }

    fn returned(connection: C, created_at: Instant) -> Self {
        Self {
            connection,
            created_at,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        if let Some(lifetime) = max_lifetime {
            self.created_at.elapsed() > lifetime
        } else {
            false
        }
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        if let Some(timeout) = idle_timeout {
            self.last_used.elapsed() > timeout
        } else {
            false
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a new connection pool, opening `min_connections` up front
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate().map_err(TxError::Config)?;

        let pool = Self {
            config,
            tx_config: TransactionConfig::default(),
            factory,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
        };

        // Pre-create minimum connections
        pool.ensure_min_connections()?;

        Ok(pool)
    }

    /// Use `tx_config` for managers built by this pool
    pub fn with_transaction_config(mut self, tx_config: TransactionConfig) -> Result<Self> {
        tx_config.validate().map_err(TxError::Config)?;
        self.tx_config = tx_config;
        Ok(self)
    }

    /// Get a connection from the pool, waiting up to `connect_timeout`
    pub fn get_connection(&self) -> Result<PoolGuard<F::Connection>> {
        let start = Instant::now();

        loop {
            // Try to get an available connection
            if let Some(pooled) = self.try_get_available()? {
                return Ok(self.guard(pooled.connection, pooled.created_at));
            }

            // Try to create a new connection if under limit
            if let Some(conn) = self.try_create_connection()? {
                return Ok(self.guard(conn, Instant::now()));
            }

            // Check timeout
            if start.elapsed() > self.config.connect_timeout {
                return Err(TxError::Pool(
                    "Connection pool timeout: no connections available".into(),
                ));
            }

            // Wait a bit before retrying
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Check out a connection wrapped in a fresh manager
    pub fn transaction_manager(&self) -> Result<TransactionManager<PoolGuard<F::Connection>>> {
        let guard = self.get_connection()?;
        TransactionManager::with_config(guard, self.tx_config.clone())
    }

    fn guard(&self, connection: F::Connection, created_at: Instant) -> PoolGuard<F::Connection> {
        PoolGuard {
            connection: Some(connection),
            created_at,
            pool: Arc::clone(&self.available),
            total_connections: Arc::clone(&self.total_connections),
            broken: false,
        }
    }

    /// Try to get an available connection from the pool
    fn try_get_available(&self) -> Result<Option<PooledConnection<F::Connection>>> {
        let mut available = self.available.lock()?;

        let mut kept = VecDeque::with_capacity(available.len());
        let mut removed = 0usize;
        while let Some(pooled) = available.pop_front() {
            if pooled.is_expired(self.config.max_lifetime)
                || pooled.is_idle_too_long(self.config.idle_timeout)
                || !pooled.connection.is_active()
            {
                removed += 1;
            } else {
                kept.push_back(pooled);
            }
        }
        *available = kept;

        if removed > 0 {
            debug!("Discarded {} stale pooled connection(s)", removed);
            self.total_connections.fetch_sub(removed, Ordering::SeqCst);
        }

        Ok(available.pop_front())
    }

    /// Try to create a new connection if under limit
    fn try_create_connection(&self) -> Result<Option<F::Connection>> {
        let reserved = self.total_connections.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
            (total < self.config.max_connections).then_some(total + 1)
        });
        if reserved.is_err() {
            return Ok(None);
        }

        match self.factory.connect() {
            Ok(connection) => Ok(Some(connection)),
            Err(err) => {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Ensure minimum number of connections
    fn ensure_min_connections(&self) -> Result<()> {
        let mut available = self.available.lock()?;

        while self.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            let connection = self.factory.connect()?;
            available.push_back(PooledConnection::new(connection));
            self.total_connections.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> Result<PoolStats> {
        let available = self.available.lock()?;
        let total = self.total_connections.load(Ordering::SeqCst);

        Ok(PoolStats {
            total_connections: total,
            available_connections: available.len(),
            active_connections: total.saturating_sub(available.len()),
            max_connections: self.config.max_connections,
        })
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped. Connections that were
/// closed, or that the engine reports as still inside a transaction, are
/// discarded instead.
pub struct PoolGuard<C: Connection> {
    connection: Option<C>,
    created_at: Instant,
    pool: Arc<Mutex<VecDeque<PooledConnection<C>>>>,
    total_connections: Arc<AtomicUsize>,
    broken: bool,
}

impl<C: Connection> PoolGuard<C> {
    fn inner(&self) -> &C {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in Drop"),
        }
    }

    fn inner_mut(&mut self) -> &mut C {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in Drop"),
        }
    }
}

impl<C: Connection> Deref for PoolGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.inner()
    }
}

impl<C: Connection> DerefMut for PoolGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.inner_mut()
    }
}

impl<C: Connection> Connection for PoolGuard<C> {
    type Error = C::Error;

    fn execute(&mut self, sql: &str) -> std::result::Result<(), Self::Error> {
        self.inner_mut().execute(sql)
    }

    fn in_transaction(&self) -> Option<bool> {
        self.inner().in_transaction()
    }

    fn is_active(&self) -> bool {
        self.inner().is_active()
    }

    fn mark_broken(&mut self) {
        self.broken = true;
        self.inner_mut().mark_broken();
    }
}

impl<C: Connection> Drop for PoolGuard<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if self.broken {
            warn!("Pooled connection failed to end its transaction; discarding it");
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if connection.in_transaction() == Some(true) || !connection.is_active() {
            warn!("Pooled connection returned mid-transaction or closed; discarding it");
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        match self.pool.lock() {
            Ok(mut pool) => pool.push_back(PooledConnection::returned(connection, self.created_at)),
            Err(_) => {
                warn!("Pool lock poisoned; discarding returned connection");
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
