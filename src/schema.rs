//! SQLite table introspection used by the RETURNING emulator.
//!
//! The emulator needs one column that identifies a row and survives the
//! write: the table's `INTEGER PRIMARY KEY` (an alias of the rowid) when it
//! has one, otherwise the implicit `rowid`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::sql::statement::quote_ident;
use crate::sql::TableName;
use crate::sqlite::error::{SqliteError, SqliteResult};

/// Information about a table column, from `PRAGMA table_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// 1-based position within the primary key, 0 when not part of it.
    pub primary_key: u32,
}

/// The column the emulator uses to find rows again after a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowKey {
    /// An `INTEGER PRIMARY KEY` column.
    Column(String),
    /// No integer key; use the implicit rowid.
    Rowid,
}

impl RowKey {
    /// SQL expression naming the key.
    pub fn sql(&self) -> String {
        match self {
            RowKey::Column(name) => quote_ident(name),
            RowKey::Rowid => "rowid".to_string(),
        }
    }

    /// Whether assigning `column` changes the key.
    pub fn is_assigned_by(&self, column: &str) -> bool {
        match self {
            RowKey::Column(name) => name.eq_ignore_ascii_case(column),
            RowKey::Rowid => ["rowid", "oid", "_rowid_"]
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(column)),
        }
    }

    /// Pick the key from a table's columns.
    pub fn from_columns(columns: &[ColumnInfo]) -> Self {
        let mut pk = columns.iter().filter(|c| c.primary_key > 0);
        match (pk.next(), pk.next()) {
            (Some(col), None) if col.data_type.eq_ignore_ascii_case("INTEGER") => {
                RowKey::Column(col.name.clone())
            }
            _ => RowKey::Rowid,
        }
    }
}

/// Read column metadata. Returns an empty list when the table does not exist.
pub fn table_columns(conn: &Connection, table: &TableName) -> SqliteResult<Vec<ColumnInfo>> {
    let pragma = match &table.schema {
        Some(schema) => format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(&table.name)
        ),
        None => format!("PRAGMA table_info({})", quote_ident(&table.name)),
    };

    let mut stmt = conn.prepare(&pragma)?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            nullable: row.get::<_, i32>(3)? == 0,
            primary_key: row.get(5)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(SqliteError::from)
}

/// Whether `table` was declared `WITHOUT ROWID`.
///
/// Such a table has no rowid for `last_insert_rowid` to report, and its
/// `INTEGER PRIMARY KEY` is not a rowid alias.
pub fn is_without_rowid(conn: &Connection, table: &TableName) -> SqliteResult<bool> {
    let query = format!(
        "SELECT sql FROM {}.sqlite_schema WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        quote_ident(table.schema.as_deref().unwrap_or("main"))
    );
    let create: Option<String> = conn
        .query_row(&query, [&table.name], |row| row.get(0))
        .optional()?
        .flatten();

    Ok(create.as_deref().is_some_and(declares_without_rowid))
}

/// Look for `WITHOUT ROWID` among the options after the column list.
fn declares_without_rowid(create: &str) -> bool {
    let Some(close) = create.rfind(')') else {
        return false;
    };
    let options = create[close + 1..].to_ascii_uppercase();
    let words: Vec<&str> = options
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    words.windows(2).any(|pair| pair == ["WITHOUT", "ROWID"])
}

/// Per-pool cache of row keys, keyed by lowercase `schema.table`.
///
/// Cleared after every batch script and every statement that is not plain
/// DML, so DDL never leaves a stale key behind.
#[derive(Clone, Default)]
pub struct KeyCache {
    keys: Arc<Mutex<HashMap<String, RowKey>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the row key for `table`, introspecting on a miss.
    pub fn row_key(&self, conn: &Connection, table: &TableName) -> SqliteResult<RowKey> {
        let cache_key = format!(
            "{}.{}",
            table.schema.as_deref().unwrap_or("main").to_lowercase(),
            table.name.to_lowercase()
        );

        if let Some(key) = self.keys.lock().get(&cache_key) {
            return Ok(key.clone());
        }

        let columns = table_columns(conn, table)?;
        if columns.is_empty() {
            return Err(SqliteError::NoSuchTable(table.raw.clone()));
        }

        if is_without_rowid(conn, table)? {
            return Err(SqliteError::Emulation(format!(
                "table {} is WITHOUT ROWID",
                table.raw
            )));
        }

        let key = RowKey::from_columns(&columns);
        tracing::debug!(table = %table.raw, key = %key.sql(), "Discovered row key");
        self.keys.lock().insert(cache_key, key.clone());
        Ok(key)
    }

    pub fn clear(&self) {
        self.keys.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}
