//! RETURNING emulation for SQLite.
//!
//! A statement with a RETURNING clause is split into the bare write and one
//! or more reads that reproduce the rows the clause would have produced:
//!
//! - `INSERT`: run the insert, then select the new row by `last_insert_rowid`.
//! - `UPDATE`: capture the keys matching the original predicate, update by key,
//!   then re-select by key. The predicate is evaluated exactly once.
//! - `DELETE`: capture keys and projected rows, then delete by key.
//!
//! The caller runs [`Emulation::run`] on one pinned connection inside one
//! write transaction, so no other writer can interleave between the steps.

use crate::schema::RowKey;
use crate::sql::lexer::Token;
use crate::sql::statement::{Statement, StatementKind, TableName};
use crate::sql::translate::{render, validate_markers};
use crate::sql::SqlError;
use crate::sqlite::connection::SqliteRows;
use crate::sqlite::error::{SqliteError, SqliteResult};
use crate::sqlite::types::SqliteValue;

/// Keys bound per `IN (...)` list; well below SQLite's bound-variable limit.
pub const KEY_CHUNK: usize = 500;

/// The statements the emulator needs from a connection.
pub trait Session {
    /// Run a statement that returns no rows; yields the change count.
    fn execute(&mut self, sql: &str, params: &[SqliteValue]) -> SqliteResult<u64>;

    fn query(&mut self, sql: &str, params: &[SqliteValue]) -> SqliteResult<SqliteRows>;

    fn last_insert_rowid(&self) -> i64;

    fn row_key(&mut self, table: &TableName) -> SqliteResult<RowKey>;
}

/// How a statement reaches SQLite.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Translated text and parameters in marker order.
    Direct {
        sql: String,
        params: Vec<SqliteValue>,
        /// Set for statements outside SELECT/INSERT/UPDATE/DELETE, which
        /// covers every DDL statement.
        schema_change: bool,
    },
    Emulated(Emulation),
}

impl Plan {
    /// Whether running this plan can invalidate cached row keys.
    pub fn may_change_schema(&self) -> bool {
        matches!(self, Plan::Direct { schema_change: true, .. })
    }
}

/// Validate `sql` against `params` and decide how to run it.
pub fn plan(sql: &str, params: Vec<SqliteValue>) -> Result<Plan, SqlError> {
    let stmt = Statement::parse(sql)?;
    validate_markers(stmt.tokens(), params.len())?;

    if stmt.has_returning() {
        return Emulation::plan(&stmt, &params).map(Plan::Emulated);
    }

    let translated = render(sql, &stmt.tokens()[stmt.body()]);
    Ok(Plan::Direct {
        params: translated.bind(&params),
        sql: translated.sql,
        schema_change: stmt.kind() == StatementKind::Other,
    })
}

/// A translated SQL fragment and the parameters it binds.
#[derive(Debug, Clone, PartialEq)]
struct Fragment {
    sql: String,
    params: Vec<SqliteValue>,
}

impl Fragment {
    fn from_tokens(sql: &str, tokens: &[Token], params: &[SqliteValue]) -> Self {
        let translated = render(sql, tokens);
        Self {
            params: translated.bind(params),
            sql: translated.sql,
        }
    }
}

#[derive(Debug, Clone)]
enum Write {
    Insert {
        statement: Fragment,
    },
    Update {
        /// `UPDATE` plus any conflict clause.
        head: String,
        set: Fragment,
        filter: Option<Fragment>,
        assigned: Vec<String>,
    },
    Delete {
        filter: Option<Fragment>,
    },
}

/// An owned, validated emulation plan; safe to move onto the connection
/// thread.
#[derive(Debug, Clone)]
pub struct Emulation {
    table: TableName,
    /// Table reference including any alias.
    target: String,
    projection: String,
    write: Write,
}

impl Emulation {
    /// Build a plan for a statement whose markers were already validated.
    pub fn plan(stmt: &Statement<'_>, params: &[SqliteValue]) -> Result<Self, SqlError> {
        let sql = stmt.sql();
        let tokens = stmt.tokens();
        let projection = stmt.text(stmt.returning_list()?).to_string();

        let emulation = match stmt.kind() {
            StatementKind::Insert => {
                let shape = stmt.insert_shape()?;
                Emulation {
                    target: shape.table.raw.clone(),
                    table: shape.table,
                    projection,
                    write: Write::Insert {
                        statement: Fragment::from_tokens(sql, &tokens[stmt.body()], params),
                    },
                }
            }
            StatementKind::Update => {
                let shape = stmt.update_shape()?;
                Emulation {
                    target: stmt.text(shape.target.clone()).to_string(),
                    projection,
                    write: Write::Update {
                        head: stmt.text(0..shape.target.start).trim().to_string(),
                        set: Fragment::from_tokens(sql, &tokens[shape.set], params),
                        filter: shape
                            .predicate
                            .map(|p| Fragment::from_tokens(sql, &tokens[p], params)),
                        assigned: shape.assigned,
                    },
                    table: shape.table,
                }
            }
            StatementKind::Delete => {
                let shape = stmt.delete_shape()?;
                Emulation {
                    target: stmt.text(shape.target).to_string(),
                    projection,
                    write: Write::Delete {
                        filter: shape
                            .predicate
                            .map(|p| Fragment::from_tokens(sql, &tokens[p], params)),
                    },
                    table: shape.table,
                }
            }
            StatementKind::Select | StatementKind::Other => {
                return Err(SqlError::Unsupported(
                    "RETURNING is only supported on INSERT, UPDATE and DELETE".into(),
                ))
            }
        };

        Ok(emulation)
    }

    #[inline]
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Execute the plan. Any error leaves the caller responsible for rolling
    /// back the enclosing transaction.
    pub fn run<S: Session>(&self, session: &mut S) -> SqliteResult<SqliteRows> {
        let key = session.row_key(&self.table)?;

        match &self.write {
            Write::Insert { statement } => self.run_insert(session, &key, statement),
            Write::Update {
                head,
                set,
                filter,
                assigned,
            } => self.run_update(session, &key, head, set, filter.as_ref(), assigned),
            Write::Delete { filter } => self.run_delete(session, &key, filter.as_ref()),
        }
    }

    fn run_insert<S: Session>(
        &self,
        session: &mut S,
        key: &RowKey,
        statement: &Fragment,
    ) -> SqliteResult<SqliteRows> {
        let changed = session.execute(&statement.sql, &statement.params)?;
        match changed {
            0 => return self.no_rows(session),
            1 => {}
            n => {
                return Err(SqliteError::Emulation(format!(
                    "INSERT ... RETURNING wrote {} rows into {}; only single-row inserts can be emulated",
                    n, self.table.raw
                )))
            }
        }

        let id = session.last_insert_rowid();
        tracing::debug!(table = %self.table.raw, rowid = id, "Selecting inserted row");

        let mut rows = session.query(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?",
                self.projection,
                self.target,
                key.sql()
            ),
            &[SqliteValue::Integer(id)],
        )?;
        rows.rows_affected = 1;
        Ok(rows)
    }

    fn run_update<S: Session>(
        &self,
        session: &mut S,
        key: &RowKey,
        head: &str,
        set: &Fragment,
        filter: Option<&Fragment>,
        assigned: &[String],
    ) -> SqliteResult<SqliteRows> {
        if let Some(column) = assigned.iter().find(|c| key.is_assigned_by(c)) {
            return Err(SqliteError::Emulation(format!(
                "UPDATE ... RETURNING cannot assign the row key {}",
                column
            )));
        }

        let key_sql = key.sql();
        let captured = session.query(
            &format!(
                "SELECT {} FROM {}{} ORDER BY 1",
                key_sql,
                self.target,
                where_clause(filter)
            ),
            filter.map_or(&[][..], |f| &f.params[..]),
        )?;
        let keys: Vec<SqliteValue> = captured
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();

        if keys.is_empty() {
            tracing::debug!(table = %self.table.raw, "UPDATE matched no rows");
            return self.no_rows(session);
        }
        tracing::debug!(table = %self.table.raw, rows = keys.len(), "Captured keys for UPDATE");

        let mut changed = 0u64;
        for chunk in keys.chunks(KEY_CHUNK) {
            let mut params = set.params.clone();
            params.extend_from_slice(chunk);
            changed += session.execute(
                &format!(
                    "{} {} SET {} WHERE {} IN ({})",
                    head,
                    self.target,
                    set.sql,
                    key_sql,
                    placeholders(chunk.len())
                ),
                &params,
            )?;
        }

        let mut rows = self.select_by_keys(session, &key_sql, &keys)?;
        rows.rows_affected = changed;
        Ok(rows)
    }

    fn run_delete<S: Session>(
        &self,
        session: &mut S,
        key: &RowKey,
        filter: Option<&Fragment>,
    ) -> SqliteResult<SqliteRows> {
        let key_sql = key.sql();
        let captured = session.query(
            &format!(
                "SELECT {}, {} FROM {}{} ORDER BY 1",
                key_sql,
                self.projection,
                self.target,
                where_clause(filter)
            ),
            filter.map_or(&[][..], |f| &f.params[..]),
        )?;
        let keys: Vec<SqliteValue> = captured
            .rows
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect();
        let mut rows = strip_key(captured);

        let mut changed = 0u64;
        for chunk in keys.chunks(KEY_CHUNK) {
            changed += session.execute(
                &format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    self.target,
                    key_sql,
                    placeholders(chunk.len())
                ),
                chunk,
            )?;
        }
        tracing::debug!(table = %self.table.raw, rows = changed, "Deleted captured rows");

        rows.rows_affected = changed;
        Ok(rows)
    }

    /// Re-select rows by key in ascending key order.
    fn select_by_keys<S: Session>(
        &self,
        session: &mut S,
        key_sql: &str,
        keys: &[SqliteValue],
    ) -> SqliteResult<SqliteRows> {
        let mut merged: Option<SqliteRows> = None;

        for chunk in keys.chunks(KEY_CHUNK) {
            let batch = strip_key(session.query(
                &format!(
                    "SELECT {}, {} FROM {} WHERE {} IN ({}) ORDER BY 1",
                    key_sql,
                    self.projection,
                    self.target,
                    key_sql,
                    placeholders(chunk.len())
                ),
                chunk,
            )?);
            match merged.as_mut() {
                Some(all) => all.rows.extend(batch.rows),
                None => merged = Some(batch),
            }
        }

        Ok(merged.unwrap_or_else(SqliteRows::empty))
    }

    /// Empty result that still reports the projected column names.
    fn no_rows<S: Session>(&self, session: &mut S) -> SqliteResult<SqliteRows> {
        let shape = session.query(
            &format!("SELECT {} FROM {} LIMIT 0", self.projection, self.target),
            &[],
        )?;
        Ok(SqliteRows {
            columns: shape.columns,
            rows: Vec::new(),
            rows_affected: 0,
        })
    }
}

fn where_clause(filter: Option<&Fragment>) -> String {
    filter.map_or_else(String::new, |f| format!(" WHERE {}", f.sql))
}

fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Drop the leading key column added to capture and re-select queries.
fn strip_key(mut rows: SqliteRows) -> SqliteRows {
    if !rows.columns.is_empty() {
        rows.columns.remove(0);
    }
    for row in &mut rows.rows {
        if !row.is_empty() {
            row.remove(0);
        }
    }
    rows
}
