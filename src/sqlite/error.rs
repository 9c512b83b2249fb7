//! SQLite error types.

use std::io;
use std::time::Duration;

use crate::sql::SqlError;

pub type SqliteResult<T> = Result<T, SqliteError>;

/// SQLite-specific errors.
#[derive(Debug)]
pub enum SqliteError {
    /// I/O error
    Io(io::Error),
    /// Error reported by SQLite itself
    Sqlite(rusqlite::Error),
    /// The background connection thread is gone
    ConnectionClosed,
    /// Pool closed or exhausted
    Pool(String),
    /// The statement text was rejected before reaching SQLite
    Sql(SqlError),
    /// A RETURNING emulation step could not be carried out
    Emulation(String),
    /// The statement names a table that does not exist
    NoSuchTable(String),
    /// The statement ran past its deadline and was interrupted
    Timeout(Duration),
}

impl SqliteError {
    /// Extended result code and its symbolic name, if SQLite produced one.
    pub fn code(&self) -> Option<(i32, &'static str)> {
        match self {
            SqliteError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                Some((e.extended_code, extended_code_name(e.extended_code)))
            }
            _ => None,
        }
    }

    /// Constraint failures (unique, foreign key, not null, check, primary key).
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            SqliteError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    /// Failures of the store rather than of the statement.
    pub fn is_unavailable(&self) -> bool {
        use rusqlite::ErrorCode::*;
        match self {
            SqliteError::Io(_)
            | SqliteError::ConnectionClosed
            | SqliteError::Pool(_)
            | SqliteError::Timeout(_) => true,
            SqliteError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                DatabaseBusy
                    | DatabaseLocked
                    | CannotOpen
                    | SystemIoFailure
                    | DiskFull
                    | DatabaseCorrupt
                    | NotADatabase
                    | OutOfMemory
                    | FileLockingProtocolFailed
                    | ReadOnly
            ),
            _ => false,
        }
    }

    /// Errors caused by the statement text or its parameters.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            SqliteError::Emulation(_)
                | SqliteError::Sql(_)
                | SqliteError::Sqlite(rusqlite::Error::InvalidParameterCount(..))
                | SqliteError::Sqlite(rusqlite::Error::MultipleStatement)
        )
    }
}

impl std::fmt::Display for SqliteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqliteError::Io(e) => write!(f, "I/O error: {}", e),
            SqliteError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            SqliteError::ConnectionClosed => write!(f, "Connection closed"),
            SqliteError::Pool(e) => write!(f, "Pool error: {}", e),
            SqliteError::Sql(e) => write!(f, "{}", e),
            SqliteError::Emulation(e) => write!(f, "Cannot emulate RETURNING: {}", e),
            SqliteError::NoSuchTable(t) => write!(f, "no such table: {}", t),
            SqliteError::Timeout(d) => write!(f, "Statement timed out after {:?}", d),
        }
    }
}

impl std::error::Error for SqliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SqliteError::Io(e) => Some(e),
            SqliteError::Sqlite(e) => Some(e),
            SqliteError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SqliteError {
    fn from(e: io::Error) -> Self {
        SqliteError::Io(e)
    }
}

impl From<SqlError> for SqliteError {
    fn from(e: SqlError) -> Self {
        SqliteError::Sql(e)
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(e: rusqlite::Error) -> Self {
        SqliteError::Sqlite(e)
    }
}

impl From<tokio_rusqlite::Error> for SqliteError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => SqliteError::Sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed => SqliteError::ConnectionClosed,
            other => SqliteError::Pool(other.to_string()),
        }
    }
}

/// Symbolic name of an extended result code, as SQLite spells it.
pub fn extended_code_name(code: i32) -> &'static str {
    match code {
        275 => "SQLITE_CONSTRAINT_CHECK",
        531 => "SQLITE_CONSTRAINT_COMMITHOOK",
        787 => "SQLITE_CONSTRAINT_FOREIGNKEY",
        1043 => "SQLITE_CONSTRAINT_FUNCTION",
        1299 => "SQLITE_CONSTRAINT_NOTNULL",
        1555 => "SQLITE_CONSTRAINT_PRIMARYKEY",
        1811 => "SQLITE_CONSTRAINT_TRIGGER",
        2067 => "SQLITE_CONSTRAINT_UNIQUE",
        2323 => "SQLITE_CONSTRAINT_VTAB",
        2579 => "SQLITE_CONSTRAINT_ROWID",
        // Primary code in the low byte
        _ => match code & 0xff {
            5 => "SQLITE_BUSY",
            6 => "SQLITE_LOCKED",
            8 => "SQLITE_READONLY",
            10 => "SQLITE_IOERR",
            13 => "SQLITE_FULL",
            14 => "SQLITE_CANTOPEN",
            19 => "SQLITE_CONSTRAINT",
            20 => "SQLITE_MISMATCH",
            25 => "SQLITE_RANGE",
            _ => "SQLITE_ERROR",
        },
    }
}
