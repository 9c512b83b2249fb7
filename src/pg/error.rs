//! Error types for the PostgreSQL protocol implementation.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::sql::SqlError;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Debug)]
pub enum PgError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (unexpected message, invalid format, etc.).
    Protocol(String),

    /// Authentication failed.
    Auth(String),

    /// Server returned an error.
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
        constraint: Option<String>,
    },

    /// Type conversion error.
    Type(String),

    /// Connection is closed or in invalid state.
    ConnectionClosed,

    /// Timeout waiting for a response or a pooled connection.
    Timeout(Duration),

    /// Pool closed.
    Pool(String),

    /// Invalid connection URL or settings.
    Config(String),

    /// The statement text was rejected before it was sent.
    Sql(SqlError),
}

impl PgError {
    /// The SQLSTATE reported by the server.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Class 23: integrity constraint violation.
    pub fn is_constraint(&self) -> bool {
        self.sqlstate().is_some_and(|c| c.starts_with("23"))
    }

    /// Failures of the server or the link rather than of the statement.
    pub fn is_unavailable(&self) -> bool {
        match self {
            PgError::Io(_)
            | PgError::Protocol(_)
            | PgError::Auth(_)
            | PgError::ConnectionClosed
            | PgError::Timeout(_)
            | PgError::Pool(_) => true,
            // connection exception, insufficient resources, operator
            // intervention, system error
            PgError::Server { code, .. } => ["08", "53", "57", "58"]
                .iter()
                .any(|class| code.starts_with(class)),
            _ => false,
        }
    }

    /// Whether the connection must be discarded after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            PgError::Server { severity, .. } => severity == "FATAL" || severity == "PANIC",
            PgError::Io(_)
            | PgError::Protocol(_)
            | PgError::ConnectionClosed
            | PgError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PgError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            PgError::Server {
                severity,
                code,
                message,
                detail,
                hint,
                ..
            } => {
                write!(f, "{}: {} ({})", severity, message, code)?;
                if let Some(d) = detail {
                    write!(f, "\nDetail: {}", d)?;
                }
                if let Some(h) = hint {
                    write!(f, "\nHint: {}", h)?;
                }
                Ok(())
            }
            PgError::Type(msg) => write!(f, "Type error: {}", msg),
            PgError::ConnectionClosed => write!(f, "Connection is closed"),
            PgError::Timeout(d) => write!(f, "Operation timed out after {:?}", d),
            PgError::Pool(msg) => write!(f, "Pool error: {}", msg),
            PgError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            PgError::Sql(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            PgError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgError {
    fn from(e: io::Error) -> Self {
        PgError::Io(e)
    }
}

impl From<SqlError> for PgError {
    fn from(e: SqlError) -> Self {
        PgError::Sql(e)
    }
}
