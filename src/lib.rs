//! dualdb: one query dialect over PostgreSQL and SQLite.
//!
//! Statements are written once, PostgreSQL style: `$1`-style ordinal
//! markers, `RETURNING` on writes, JSON values bound as parameters. On
//! PostgreSQL they run as written through a native wire driver. On SQLite
//! the markers are rewritten, `RETURNING` is emulated on one connection,
//! and structured columns are stored as canonical JSON text and parsed back
//! on read.

pub mod codec;
pub mod error;
pub mod executor;
pub mod pg;
pub mod pool;
pub mod returning;
pub mod schema;
pub mod sql;
pub mod sqlite;

pub use codec::StructuredColumns;
pub use error::{Error, ErrorKind, Result};
pub use executor::{JsonValue, QueryResult, Row, UnexpectedRowCount, Value};
pub use pool::{Backend, ConnectionHandle, Database, DbConfig};
