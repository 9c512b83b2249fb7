//! Custom PostgreSQL wire protocol implementation.
//!
//! This module provides a PostgreSQL client that:
//! - Uses the binary format for parameters and for results it can decode
//! - Caches prepared statements per connection
//! - Authenticates with cleartext, MD5 or SCRAM-SHA-256
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `connection`: Connection state machine and management
//! - `types`: PostgreSQL type encoding/decoding
//! - `statement`: Prepared statement cache
//! - `pool`: Connection pool with per-connection statement cache

pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod scram;
pub mod statement;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{PgConfig, PgConnection, PgRows};
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PgPoolConfig, PooledConnection};
pub use types::Oid;
