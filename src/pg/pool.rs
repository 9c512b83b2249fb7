//! PostgreSQL connection pool.
//!
//! This module provides a connection pool built on top of our custom
//! PostgreSQL connection implementation. A connection comes back to the idle
//! list only when it is usable and outside a transaction; anything else is
//! dropped, which closes the socket and lets the server roll back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::connection::{PgConfig, PgConnection, PgRows};
use super::error::{PgError, PgResult};
use crate::executor::Value;
use crate::sql::translate::check_ordinals;
use crate::sql::Statement;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    /// Database connection URL
    pub url: String,
    /// Connections opened up front
    pub min_connections: u32,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Statement cache capacity per connection
    pub statement_cache_capacity: usize,
    /// How long `acquire` waits for a free or new connection
    pub acquire_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}

impl PgPoolConfig {
    /// Create a new pool configuration.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            min_connections: 1,
            max_connections: 10,
            statement_cache_capacity: 100,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Connection settings for each pooled connection.
    fn connection_config(&self) -> PgResult<PgConfig> {
        let mut config = PgConfig::from_url(&self.url)?;
        config.statement_cache_capacity = self.statement_cache_capacity;
        config.statement_timeout = self.statement_timeout;
        Ok(config)
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// When dropped, the connection is returned to the pool.
pub struct PooledConnection {
    conn: Option<PgConnection>,
    pool: Arc<PgPoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&mut self) -> PgResult<&mut PgConnection> {
        self.conn.as_mut().ok_or(PgError::ConnectionClosed)
    }

    /// Execute one statement with `$n` markers.
    ///
    /// Markers are checked against `params` before anything is sent, so a
    /// gap or an unused parameter fails the same way it does on SQLite.
    /// A bare `?` is sent as written, for the `jsonb` operators.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> PgResult<PgRows> {
        let stmt = Statement::parse(sql)?;
        check_ordinals(stmt.tokens(), params.len())?;
        self.conn()?.query(sql, params).await
    }

    /// Run a multi-statement script with the simple protocol.
    pub async fn execute_batch(&mut self, sql: &str) -> PgResult<()> {
        self.conn()?.execute_batch(sql).await
    }

    pub async fn begin(&mut self) -> PgResult<()> {
        self.conn()?.begin().await
    }

    pub async fn commit(&mut self) -> PgResult<()> {
        self.conn()?.commit().await
    }

    pub async fn rollback(&mut self) -> PgResult<()> {
        self.conn()?.rollback().await
    }

    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(PgConnection::in_transaction)
    }

    /// Check if the connection is healthy.
    pub fn is_healthy(&self) -> bool {
        self.conn.as_ref().is_some_and(PgConnection::is_usable)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.pool.closed.load(Ordering::Acquire) || !conn.is_usable() {
            return;
        }
        if conn.in_transaction() {
            tracing::warn!(
                pid = conn.backend_pid(),
                "Discarding connection released inside a transaction"
            );
            return;
        }
        self.pool.idle_connections.lock().push(conn);
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

struct PgPoolInner {
    config: PgPoolConfig,
    connection_config: PgConfig,
    idle_connections: Mutex<Vec<PgConnection>>,
    /// Limits total connections, idle and checked out
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A PostgreSQL connection pool.
///
/// The pool maintains a set of reusable connections, each with its own
/// prepared statement cache.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PgPoolInner>,
}

impl PgPool {
    /// Create a new connection pool and open `min_connections` up front.
    pub async fn connect(config: PgPoolConfig) -> PgResult<Self> {
        let max = config.max_connections.max(1);
        let inner = Arc::new(PgPoolInner {
            connection_config: config.connection_config()?,
            semaphore: Arc::new(Semaphore::new(max as usize)),
            config,
            idle_connections: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let pool = Self { inner };

        let warm = pool.inner.config.min_connections.min(max);
        for _ in 0..warm {
            let conn = pool.create_connection().await?;
            pool.inner.idle_connections.lock().push(conn);
        }

        tracing::debug!(
            host = %pool.inner.connection_config.host,
            database = %pool.inner.connection_config.database,
            warm,
            max,
            "PostgreSQL pool ready"
        );
        Ok(pool)
    }

    /// Get a connection from the pool, waiting up to `acquire_timeout`.
    pub async fn acquire(&self) -> PgResult<PooledConnection> {
        if self.is_closed() {
            return Err(PgError::Pool("Pool closed".to_string()));
        }

        tokio::time::timeout(self.inner.config.acquire_timeout, self.acquire_inner())
            .await
            .map_err(|_| PgError::Pool("Timed out waiting for a connection".to_string()))?
    }

    async fn acquire_inner(&self) -> PgResult<PooledConnection> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PgError::Pool("Pool closed".to_string()))?;

        let idle = {
            let mut idle = self.inner.idle_connections.lock();
            idle.pop()
        };

        let conn = match idle {
            Some(c) if c.is_usable() => c,
            _ => self.create_connection().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Execute one statement on a pooled connection.
    pub async fn query(&self, sql: &str, params: &[Value]) -> PgResult<PgRows> {
        let mut conn = self.acquire().await?;
        conn.query(sql, params).await
    }

    pub async fn execute_batch(&self, sql: &str) -> PgResult<()> {
        let mut conn = self.acquire().await?;
        conn.execute_batch(sql).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the pool and its idle connections. Checked-out connections are
    /// dropped when they come back.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();

        let connections = {
            let mut idle = self.inner.idle_connections.lock();
            std::mem::take(&mut *idle)
        };

        for mut conn in connections {
            conn.close().await;
        }
    }

    /// Get the current number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.idle_connections.lock().len()
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }

    async fn create_connection(&self) -> PgResult<PgConnection> {
        PgConnection::connect_with_config(self.inner.connection_config.clone()).await
    }
}
