//! SQLite connection pool.
//!
//! An in-memory database lives and dies with its connection, so a
//! `:memory:` pool always holds exactly one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::connection::{SqliteConnection, SqliteRows};
use super::error::{SqliteError, SqliteResult};
use super::types::SqliteValue;
use crate::returning::{self, Plan};
use crate::schema::KeyCache;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct SqlitePoolConfig {
    /// Database path (or `:memory:`)
    pub path: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}

impl SqlitePoolConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
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

    #[inline]
    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Connections the pool will actually open.
    pub fn effective_max_connections(&self) -> u32 {
        if self.is_memory() {
            1
        } else {
            self.max_connections.max(1)
        }
    }
}

/// A pooled connection, returned to the pool on drop.
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    pool: Arc<SqlitePoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn conn(&self) -> SqliteResult<&SqliteConnection> {
        self.conn.as_ref().ok_or(SqliteError::ConnectionClosed)
    }

    /// Translate, route and run one statement with ordinal markers.
    pub async fn run(&self, sql: &str, params: Vec<SqliteValue>) -> SqliteResult<SqliteRows> {
        let plan = returning::plan(sql, params)?;
        self.run_plan(plan).await
    }

    pub async fn run_plan(&self, plan: Plan) -> SqliteResult<SqliteRows> {
        let schema_change = plan.may_change_schema();
        let result = self.conn()?.run(plan, &self.pool.keys).await;
        if schema_change {
            self.pool.keys.clear();
        }
        result
    }

    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let result = self.conn()?.execute_batch(sql).await;
        // Scripts are where schema changes come from.
        self.pool.keys.clear();
        result
    }

    pub async fn begin(&self) -> SqliteResult<()> {
        self.conn()?.begin().await
    }

    pub async fn commit(&self) -> SqliteResult<()> {
        self.conn()?.commit().await
    }

    pub async fn rollback(&self) -> SqliteResult<()> {
        self.conn()?.rollback().await
    }

    pub async fn in_transaction(&self) -> SqliteResult<bool> {
        self.conn()?.in_transaction().await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.is_closed() && !self.pool.closed.load(Ordering::Acquire) {
                self.pool.idle_connections.lock().push(conn);
            }
        }
    }
}

struct SqlitePoolInner {
    config: SqlitePoolConfig,
    idle_connections: Mutex<Vec<SqliteConnection>>,
    semaphore: Arc<Semaphore>,
    keys: KeyCache,
    closed: AtomicBool,
}

/// SQLite connection pool.
#[derive(Clone)]
pub struct SqlitePool {
    inner: Arc<SqlitePoolInner>,
}

impl SqlitePool {
    /// Create a new connection pool and open its first connection.
    pub async fn connect(config: SqlitePoolConfig) -> SqliteResult<Self> {
        let size = config.effective_max_connections();
        let inner = Arc::new(SqlitePoolInner {
            semaphore: Arc::new(Semaphore::new(size as usize)),
            config,
            idle_connections: Mutex::new(Vec::new()),
            keys: KeyCache::new(),
            closed: AtomicBool::new(false),
        });

        let pool = Self { inner };

        let conn = pool.create_connection().await?;
        pool.inner.idle_connections.lock().push(conn);

        tracing::debug!(path = %pool.inner.config.path, size, "SQLite pool ready");
        Ok(pool)
    }

    /// Acquire a connection from the pool.
    ///
    /// A connection handed back with an open transaction is rolled back
    /// before reuse.
    pub async fn acquire(&self) -> SqliteResult<PooledConnection> {
        if self.is_closed() {
            return Err(SqliteError::Pool("Pool closed".to_string()));
        }

        let permit = tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| SqliteError::Pool("Timed out waiting for a connection".to_string()))?
        .map_err(|_| SqliteError::Pool("Pool closed".to_string()))?;

        let conn = {
            let mut idle = self.inner.idle_connections.lock();
            idle.pop()
        };

        let conn = match conn {
            Some(c) if !c.is_closed() => c,
            _ => self.create_connection().await?,
        };

        if conn.in_transaction().await? {
            tracing::warn!("Rolling back transaction left open on released connection");
            conn.rollback().await?;
        }

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Run one statement on a pooled connection.
    pub async fn run(&self, sql: &str, params: Vec<SqliteValue>) -> SqliteResult<SqliteRows> {
        let conn = self.acquire().await?;
        conn.run(sql, params).await
    }

    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let conn = self.acquire().await?;
        conn.execute_batch(sql).await
    }

    pub fn config(&self) -> &SqlitePoolConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &KeyCache {
        &self.inner.keys
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close all connections. Connections still checked out are closed when
    /// they come back.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();

        let connections = {
            let mut idle = self.inner.idle_connections.lock();
            std::mem::take(&mut *idle)
        };

        for conn in connections {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "Error closing SQLite connection");
            }
        }
    }

    async fn create_connection(&self) -> SqliteResult<SqliteConnection> {
        SqliteConnection::open(&self.inner.config.path, self.inner.config.statement_timeout).await
    }
}
