//! Error types for dualdb.
//!
//! Both drivers report failures in their own terms; the conversions here sort
//! them into one taxonomy so callers never have to know which backend ran.

use thiserror::Error;

use crate::pg::PgError;
use crate::sql::SqlError;
use crate::sqlite::SqliteError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database is not initialized")]
    NotInitialized,

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Constraint violation ({code}): {message}")]
    ConstraintViolation { code: String, message: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Statement rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// The category of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    MalformedQuery,
    ConstraintViolation,
    BackendUnavailable,
    Rejected,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::MalformedQuery(_) => ErrorKind::MalformedQuery,
            Error::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether trying again later could succeed. No retries happen inside
    /// this crate.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::BackendUnavailable
    }

    /// The store's own code: a SQLSTATE on PostgreSQL, an extended result
    /// code name on SQLite.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::ConstraintViolation { code, .. } | Error::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<SqlError> for Error {
    fn from(e: SqlError) -> Self {
        Error::MalformedQuery(e.to_string())
    }
}

impl From<PgError> for Error {
    fn from(e: PgError) -> Self {
        match e {
            PgError::Sql(e) => Error::MalformedQuery(e.to_string()),
            PgError::Config(msg) => Error::Config(msg),
            PgError::Server { code, message, .. } if code.starts_with("23") => {
                Error::ConstraintViolation { code, message }
            }
            e if e.is_unavailable() => Error::BackendUnavailable(e.to_string()),
            PgError::Server { code, message, .. } => Error::Rejected { code, message },
            PgError::Type(message) => Error::Rejected {
                code: "type_error".to_string(),
                message,
            },
            other => Error::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<SqliteError> for Error {
    fn from(e: SqliteError) -> Self {
        if e.is_malformed() {
            return Error::MalformedQuery(e.to_string());
        }
        if e.is_unavailable() {
            return Error::BackendUnavailable(e.to_string());
        }

        let code = e.code().map(|(_, name)| name);
        let message = match &e {
            SqliteError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg))) => msg.clone(),
            other => other.to_string(),
        };

        if e.is_constraint() {
            Error::ConstraintViolation {
                code: code.unwrap_or("SQLITE_CONSTRAINT").to_string(),
                message,
            }
        } else {
            Error::Rejected {
                code: code.unwrap_or("SQLITE_ERROR").to_string(),
                message,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
