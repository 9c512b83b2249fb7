//! The backend-opaque database facade.
//!
//! A [`Database`] is configured once, initialized once and shut down once.
//! Application code only ever calls [`Database::query`] (or the handle
//! methods); which store answered is a diagnostic detail.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use smallvec::SmallVec;

use crate::codec::{self, StructuredColumns};
use crate::error::{Error, Result};
use crate::executor::{collect_rows, QueryResult, Row, Value};
use crate::pg::{PgPool, PgPoolConfig, PgRows, PooledConnection as PgPooledConnection};
use crate::sqlite::{
    PooledConnection as SqlitePooledConnection, SqlitePool, SqlitePoolConfig, SqliteRows,
    SqliteValue,
};

// ============================================================================
// Configuration
// ============================================================================

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_cache_capacity() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Database configuration, injected once into [`Database`].
///
/// Deserializes from any serde format; every field except `url` has a
/// default. A `statement_timeout_ms` of 0 disables the statement timeout.
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    /// `postgres://`, `postgresql://`, `sqlite:` or `sqlite://`
    pub url: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Prepared statements kept per PostgreSQL connection
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Columns whose text is parsed as JSON on read
    #[serde(default)]
    pub structured_columns: Vec<String>,
}

impl DbConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            statement_cache_capacity: default_statement_cache_capacity(),
            acquire_timeout_ms: default_timeout_ms(),
            statement_timeout_ms: default_timeout_ms(),
            structured_columns: Vec::new(),
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
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// `None` disables the timeout.
    pub fn statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
        self
    }

    pub fn structured_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.structured_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[inline]
    pub fn statement_timeout_duration(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    /// The URL with any password replaced by `***`.
    pub fn masked_url(&self) -> String {
        mask_url(&self.url)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.masked_url())
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("statement_cache_capacity", &self.statement_cache_capacity)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .field("structured_columns", &self.structured_columns)
            .finish()
    }
}

fn mask_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find(|c| c == '/' || c == '?')
        .map_or(url.len(), |i| authority_start + i);
    let authority = &url[authority_start..authority_end];

    let Some(at) = authority.rfind('@') else {
        return url.to_string();
    };
    let Some(colon) = authority[..at].find(':') else {
        return url.to_string();
    };

    format!(
        "{}{}:***{}",
        &url[..authority_start],
        &authority[..colon],
        &url[authority_start + at..]
    )
}

// ============================================================================
// Backend Selection
// ============================================================================

/// The store behind a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    /// Pick the backend from a URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(Error::Config(format!(
                "Unsupported database URL scheme: {}",
                mask_url(url)
            )))
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Postgres => f.write_str("postgres"),
            Backend::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Map a `sqlite:` URL to a file path or `:memory:`.
///
/// `sqlite::memory:` and `sqlite://:memory:` are in-memory;
/// `sqlite:///var/db/app.db` is absolute and `sqlite://app.db` relative.
fn sqlite_path(url: &str) -> Result<String> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .ok_or_else(|| Error::Config(format!("Not a SQLite URL: {}", url)))?;

    let path = match rest.split_once('?') {
        Some((path, options)) => {
            tracing::debug!(options, "Ignoring SQLite URL options");
            path
        }
        None => rest,
    };

    if path.is_empty() {
        return Err(Error::Config("SQLite URL has no database path".to_string()));
    }
    Ok(path.to_string())
}

#[derive(Clone)]
enum PoolInner {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl PoolInner {
    async fn connect(config: &DbConfig) -> Result<Self> {
        match Backend::from_url(&config.url)? {
            Backend::Postgres => {
                let pg_config = PgPoolConfig::new(&config.url)
                    .min_connections(config.min_connections)
                    .max_connections(config.max_connections)
                    .statement_cache_capacity(config.statement_cache_capacity)
                    .acquire_timeout(config.acquire_timeout_duration())
                    .statement_timeout(config.statement_timeout_duration());
                Ok(PoolInner::Postgres(PgPool::connect(pg_config).await?))
            }
            Backend::Sqlite => {
                let sqlite_config = SqlitePoolConfig::new(&sqlite_path(&config.url)?)
                    .max_connections(config.max_connections)
                    .acquire_timeout(config.acquire_timeout_duration())
                    .statement_timeout(config.statement_timeout_duration());
                Ok(PoolInner::Sqlite(SqlitePool::connect(sqlite_config).await?))
            }
        }
    }

    fn backend(&self) -> Backend {
        match self {
            PoolInner::Postgres(_) => Backend::Postgres,
            PoolInner::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// One round trip, so a bad password or path fails `initialize`.
    async fn ping(&self) -> Result<()> {
        match self {
            PoolInner::Postgres(pool) => {
                pool.query("SELECT 1", &[]).await?;
            }
            PoolInner::Sqlite(pool) => {
                pool.run("SELECT 1", Vec::new()).await?;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        match self {
            PoolInner::Postgres(pool) => pool.close().await,
            PoolInner::Sqlite(pool) => pool.close().await,
        }
    }
}

// ============================================================================
// Result Conversion
// ============================================================================

fn pg_result(result: PgRows) -> QueryResult {
    let PgRows {
        columns,
        rows,
        rows_affected,
    } = result;
    let rows = rows
        .into_iter()
        .map(|values| Row::new(Arc::clone(&columns), SmallVec::from_vec(values)))
        .collect();
    QueryResult::new(columns, rows, rows_affected)
}

fn sqlite_result(result: SqliteRows) -> QueryResult {
    let rows = result
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(Value::from));
    collect_rows(result.columns, rows, result.rows_affected)
}

fn sqlite_params(params: &[Value]) -> Vec<SqliteValue> {
    params
        .iter()
        .cloned()
        .map(codec::encode)
        .map(SqliteValue::from)
        .collect()
}

// ============================================================================
// Database
// ============================================================================

enum State {
    NotInitialized,
    Ready(PoolInner),
    Shutdown,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::NotInitialized => "not_initialized",
            State::Ready(_) => "ready",
            State::Shutdown => "shutdown",
        }
    }
}

struct Shared {
    config: DbConfig,
    structured: StructuredColumns,
    state: RwLock<State>,
    /// Serializes `initialize` and `shutdown`
    transition: tokio::sync::Mutex<()>,
}

impl Shared {
    fn pool(&self) -> Result<PoolInner> {
        match &*self.state.read() {
            State::Ready(pool) => Ok(pool.clone()),
            _ => Err(Error::NotInitialized),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match &*self.state.read() {
            State::Ready(_) => Ok(()),
            _ => Err(Error::NotInitialized),
        }
    }

    fn finish(&self, mut result: QueryResult) -> QueryResult {
        if !self.structured.is_empty() {
            let columns = result.columns().to_vec();
            self.structured.decode_rows(&columns, result.rows_mut());
        }
        result
    }
}

/// A process-wide database handle. Cloning is cheap and every clone shares
/// the same pool and lifecycle.
///
/// ```no_run
/// # async fn run() -> dualdb::Result<()> {
/// use dualdb::{Database, DbConfig, Value};
///
/// let db = Database::connect(DbConfig::new("sqlite::memory:")).await?;
/// db.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").await?;
/// let result = db
///     .query(
///         "INSERT INTO users (name) VALUES ($1) RETURNING id, name",
///         &[Value::from("Ada")],
///     )
///     .await?;
/// assert_eq!(result.row_count, 1);
/// db.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Create an uninitialized database. Nothing connects until
    /// [`initialize`](Self::initialize).
    pub fn new(config: DbConfig) -> Self {
        let structured = StructuredColumns::new(&config.structured_columns);
        Self {
            shared: Arc::new(Shared {
                config,
                structured,
                state: RwLock::new(State::NotInitialized),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// `new` followed by `initialize`.
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let db = Self::new(config);
        db.initialize().await?;
        Ok(db)
    }

    /// Connect to the configured backend and check it with one round trip.
    ///
    /// A no-op when already ready. After [`shutdown`](Self::shutdown) the
    /// database stays closed and this fails with `NotInitialized`.
    pub async fn initialize(&self) -> Result<()> {
        let _transition = self.shared.transition.lock().await;

        {
            let state = self.shared.state.read();
            match *state {
                State::Ready(_) => return Ok(()),
                State::Shutdown => return Err(Error::NotInitialized),
                State::NotInitialized => {}
            }
        }

        let config = &self.shared.config;
        let pool = PoolInner::connect(config).await?;
        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(e);
        }

        let backend = pool.backend();
        *self.shared.state.write() = State::Ready(pool);
        tracing::info!(
            %backend,
            url = %config.masked_url(),
            max_connections = config.max_connections,
            "Database ready"
        );
        Ok(())
    }

    /// Release every backend resource. Idempotent and terminal.
    pub async fn shutdown(&self) {
        let _transition = self.shared.transition.lock().await;

        let previous = std::mem::replace(&mut *self.shared.state.write(), State::Shutdown);
        if let State::Ready(pool) = previous {
            pool.close().await;
            tracing::info!(backend = %pool.backend(), "Database shut down");
        }
    }

    /// The backend answering queries, once ready.
    pub fn backend(&self) -> Option<Backend> {
        match &*self.shared.state.read() {
            State::Ready(pool) => Some(pool.backend()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ensure_ready().is_ok()
    }

    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Run one statement with `$n` markers.
    ///
    /// `RETURNING` works on both backends. Structured columns come back as
    /// [`Value::Json`]. A bare `?` is refused on SQLite as `MalformedQuery`;
    /// PostgreSQL receives it unchanged as an operator (`jsonb ? 'key'`).
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let result = match self.shared.pool()? {
            PoolInner::Postgres(pool) => pg_result(pool.query(sql, params).await?),
            PoolInner::Sqlite(pool) => sqlite_result(pool.run(sql, sqlite_params(params)).await?),
        };
        Ok(self.shared.finish(result))
    }

    /// Run one statement and return the number of rows it affected.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params).await?.row_count)
    }

    /// Run a script of several statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        match self.shared.pool()? {
            PoolInner::Postgres(pool) => pool.execute_batch(sql).await?,
            PoolInner::Sqlite(pool) => pool.execute_batch(sql).await?,
        }
        Ok(())
    }

    /// Check out a dedicated connection, for transactions.
    pub async fn acquire(&self) -> Result<ConnectionHandle> {
        let conn = match self.shared.pool()? {
            PoolInner::Postgres(pool) => HandleConn::Postgres(pool.acquire().await?),
            PoolInner::Sqlite(pool) => HandleConn::Sqlite(pool.acquire().await?),
        };
        Ok(ConnectionHandle {
            shared: Arc::clone(&self.shared),
            conn,
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.shared.config)
            .field("state", &self.shared.state.read().name())
            .finish()
    }
}

// ============================================================================
// Connection Handle
// ============================================================================

enum HandleConn {
    Postgres(PgPooledConnection),
    Sqlite(SqlitePooledConnection),
}

/// A connection checked out of the [`Database`] pool.
///
/// Dropping the handle returns the connection. A PostgreSQL connection
/// dropped inside a transaction is discarded; a SQLite one is rolled back
/// before its next use. [`release`](Self::release) rolls back right away.
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    conn: HandleConn,
}

impl ConnectionHandle {
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.shared.ensure_ready()?;
        let result = match &mut self.conn {
            HandleConn::Postgres(conn) => pg_result(conn.query(sql, params).await?),
            HandleConn::Sqlite(conn) => sqlite_result(conn.run(sql, sqlite_params(params)).await?),
        };
        Ok(self.shared.finish(result))
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params).await?.row_count)
    }

    pub async fn in_transaction(&self) -> Result<bool> {
        self.shared.ensure_ready()?;
        match &self.conn {
            HandleConn::Postgres(conn) => Ok(conn.in_transaction()),
            HandleConn::Sqlite(conn) => Ok(conn.in_transaction().await?),
        }
    }

    /// Start a transaction. Nested transactions are rejected.
    pub async fn begin(&mut self) -> Result<()> {
        if self.in_transaction().await? {
            return Err(Error::Rejected {
                code: "25001".to_string(),
                message: "A transaction is already in progress".to_string(),
            });
        }
        match &mut self.conn {
            HandleConn::Postgres(conn) => conn.begin().await?,
            HandleConn::Sqlite(conn) => conn.begin().await?,
        }
        tracing::debug!("Transaction started");
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.require_transaction().await?;
        match &mut self.conn {
            HandleConn::Postgres(conn) => conn.commit().await?,
            HandleConn::Sqlite(conn) => conn.commit().await?,
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.require_transaction().await?;
        self.rollback_open().await
    }

    /// Return the connection to the pool, rolling back any open transaction
    /// first.
    pub async fn release(mut self) -> Result<()> {
        if self.shared.ensure_ready().is_err() {
            return Ok(());
        }
        if self.in_transaction().await? {
            tracing::warn!("Rolling back transaction left open on released handle");
            self.rollback_open().await?;
        }
        Ok(())
    }

    async fn require_transaction(&self) -> Result<()> {
        if self.in_transaction().await? {
            Ok(())
        } else {
            Err(Error::Rejected {
                code: "25P01".to_string(),
                message: "No transaction is in progress".to_string(),
            })
        }
    }

    async fn rollback_open(&mut self) -> Result<()> {
        match &mut self.conn {
            HandleConn::Postgres(conn) => conn.rollback().await?,
            HandleConn::Sqlite(conn) => conn.rollback().await?,
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.conn {
            HandleConn::Postgres(_) => Backend::Postgres,
            HandleConn::Sqlite(_) => Backend::Sqlite,
        };
        f.debug_struct("ConnectionHandle")
            .field("backend", &backend)
            .finish_non_exhaustive()
    }
}
