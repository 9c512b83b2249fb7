//! SQLite driver built on rusqlite, with tokio-rusqlite moving each call
//! onto the connection's own thread.

pub mod connection;
pub mod error;
pub mod pool;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{SqliteConnection, SqliteRows};
pub use error::{SqliteError, SqliteResult};
pub use pool::{PooledConnection, SqlitePool, SqlitePoolConfig};
pub use types::SqliteValue;
