//! SQLite connection implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::config::DbConfig as SqliteDbConfig;
use rusqlite::{params_from_iter, CachedStatement, InterruptHandle, TransactionBehavior};
use tokio_rusqlite::Connection;

use super::error::{SqliteError, SqliteResult};
use super::types::SqliteValue;
use crate::returning::{Emulation, Plan, Session};
use crate::schema::{KeyCache, RowKey};
use crate::sql::TableName;

/// Result of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteRows {
    /// Column names
    pub columns: Vec<String>,
    /// Row data
    pub rows: Vec<Vec<SqliteValue>>,
    /// Rows written, or rows returned for queries
    pub rows_affected: u64,
}

impl SqliteRows {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }
}

/// A SQLite connection.
///
/// All work happens on the connection's background thread; each call moves
/// an owned closure there and waits for its result.
pub struct SqliteConnection {
    conn: Connection,
    interrupt: InterruptHandle,
    statement_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database.
    ///
    /// Supports:
    /// - `:memory:` for in-memory database
    /// - File path for disk-based database
    ///
    /// File databases run in WAL mode. Foreign keys are enforced everywhere.
    pub async fn open(path: &str, statement_timeout: Option<Duration>) -> SqliteResult<Self> {
        let is_memory = path == ":memory:";
        let conn = if is_memory {
            Connection::open_in_memory().await?
        } else {
            Connection::open(path).await?
        };

        let interrupt = conn
            .call(move |c| {
                if !is_memory {
                    c.execute_batch(
                        "PRAGMA busy_timeout=5000;
                         PRAGMA journal_mode=WAL;
                         PRAGMA synchronous=NORMAL;
                         PRAGMA cache_size=-64000;", // 64MB cache
                    )?;
                }
                c.execute_batch("PRAGMA foreign_keys=ON;")?;
                // An unknown "identifier" must be an error, not a string.
                c.set_db_config(SqliteDbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
                c.set_db_config(SqliteDbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
                Ok(c.get_interrupt_handle())
            })
            .await?;

        Ok(Self {
            conn,
            interrupt,
            statement_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Run `f` on the connection thread, interrupting it past the deadline.
    async fn call<F, R>(&self, f: F) -> SqliteResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> SqliteResult<R> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_closed() {
            return Err(SqliteError::ConnectionClosed);
        }

        // The inner result travels back untouched so SQLite errors keep
        // their extended codes.
        let call = self.conn.call(move |conn| Ok(f(conn)));

        let result = match self.statement_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    self.interrupt.interrupt();
                    tracing::warn!(timeout = ?limit, "Interrupted SQLite statement");
                    return Err(SqliteError::Timeout(limit));
                }
            },
            None => call.await,
        };

        match result {
            Ok(inner) => inner,
            Err(e) => {
                let err = SqliteError::from(e);
                if matches!(err, SqliteError::ConnectionClosed) {
                    self.closed.store(true, Ordering::Release);
                }
                Err(err)
            }
        }
    }

    /// Run a planned statement.
    ///
    /// Emulated statements run inside an immediate transaction, or a
    /// savepoint when the caller already holds one, and leave nothing behind
    /// on failure.
    pub async fn run(&self, plan: Plan, keys: &KeyCache) -> SqliteResult<SqliteRows> {
        match plan {
            Plan::Direct { sql, params, .. } => {
                self.call(move |conn| run_direct(conn, &sql, &params)).await
            }
            Plan::Emulated(emulation) => {
                let keys = keys.clone();
                self.call(move |conn| emulate(conn, &emulation, &keys)).await
            }
        }
    }

    /// Execute a script of `;`-separated statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        self.call(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    pub async fn begin(&self) -> SqliteResult<()> {
        self.execute_batch("BEGIN").await
    }

    pub async fn commit(&self) -> SqliteResult<()> {
        self.execute_batch("COMMIT").await
    }

    pub async fn rollback(&self) -> SqliteResult<()> {
        self.execute_batch("ROLLBACK").await
    }

    /// Whether a transaction is open on this connection.
    pub async fn in_transaction(&self) -> SqliteResult<bool> {
        self.call(|conn| Ok(!conn.is_autocommit())).await
    }

    /// Close the connection.
    pub async fn close(self) -> SqliteResult<()> {
        self.conn.close().await?;
        Ok(())
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn run_direct(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqliteValue],
) -> SqliteResult<SqliteRows> {
    let mut stmt = conn.prepare_cached(sql)?;
    if stmt.column_count() == 0 {
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        return Ok(SqliteRows {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: changed as u64,
        });
    }
    collect_rows(&mut stmt, params)
}

fn collect_rows(
    stmt: &mut CachedStatement<'_>,
    params: &[SqliteValue],
) -> SqliteResult<SqliteRows> {
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut data = Vec::new();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(SqliteValue::from_value_ref(row.get_ref(i)?));
        }
        data.push(values);
    }

    Ok(SqliteRows {
        rows_affected: data.len() as u64,
        columns,
        rows: data,
    })
}

fn emulate(
    conn: &mut rusqlite::Connection,
    emulation: &Emulation,
    keys: &KeyCache,
) -> SqliteResult<SqliteRows> {
    tracing::debug!(table = %emulation.table().raw, "Emulating RETURNING");

    // Dropping the transaction or savepoint on error rolls it back.
    if conn.is_autocommit() {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = emulation.run(&mut ScopedSession { conn: &tx, keys })?;
        tx.commit()?;
        Ok(rows)
    } else {
        let sp = conn.savepoint()?;
        let rows = emulation.run(&mut ScopedSession { conn: &sp, keys })?;
        sp.commit()?;
        Ok(rows)
    }
}

/// The emulator's view of a connection inside a write scope.
struct ScopedSession<'c> {
    conn: &'c rusqlite::Connection,
    keys: &'c KeyCache,
}

impl Session for ScopedSession<'_> {
    fn execute(&mut self, sql: &str, params: &[SqliteValue]) -> SqliteResult<u64> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))? as u64)
    }

    fn query(&mut self, sql: &str, params: &[SqliteValue]) -> SqliteResult<SqliteRows> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        collect_rows(&mut stmt, params)
    }

    fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn row_key(&mut self, table: &TableName) -> SqliteResult<RowKey> {
        self.keys.row_key(self.conn, table)
    }
}
