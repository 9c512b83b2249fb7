//! Query-text handling shared by both backends.
//!
//! Callers always write ordinal `$n` markers. PostgreSQL receives the text
//! unchanged; SQLite receives it through [`translate`].

pub mod error;
pub mod lexer;
pub mod statement;
pub mod translate;

pub use error::SqlError;
pub use statement::{Statement, StatementKind, TableName};
pub use translate::{translate, Translated};
