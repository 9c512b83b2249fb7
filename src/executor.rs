//! Backend-neutral values, rows and query results.

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;

// Re-export serde_json::Value for JSON support
pub use serde_json::Value as JsonValue;

/// A parameter or column value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Structured value; only meaningful for columns declared structured.
    Json(JsonValue),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            // SQLite has no boolean storage class
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Json(j) => j.serialize(serializer),
        }
    }
}

/// A single result row.
///
/// Column names are shared with every other row of the same result; values
/// for rows of up to 16 columns are stored inline.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: SmallVec<[Value; 16]>,
}

impl Row {
    pub fn new(columns: Arc<Vec<String>>, values: SmallVec<[Value; 16]>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named column. The first match wins when a projection
    /// repeats a name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[inline]
    pub(crate) fn get_index_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.values.get_mut(index)
    }

    /// Move a value out, leaving `Null` behind.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.values.get_mut(i).map(|v| std::mem::replace(v, Value::Null))
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> SmallVec<[Value; 16]> {
        self.values
    }
}

static NULL: Value = Value::Null;

impl Index<&str> for Row {
    type Output = Value;

    /// Missing columns index as `Null`; use [`Row::get`] to tell them apart.
    fn index(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL)
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Returned by the single-row accessors when the row count is wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected {expected} row(s), got {actual}")]
pub struct UnexpectedRowCount {
    pub expected: &'static str,
    pub actual: usize,
}

/// Result from executing a SQL statement.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    columns: Arc<Vec<String>>,
    rows: Vec<Row>,
    /// Rows physically affected by INSERT/UPDATE/DELETE; `rows.len()` for
    /// a SELECT.
    pub row_count: u64,
}

impl QueryResult {
    pub fn new(columns: Arc<Vec<String>>, rows: Vec<Row>, row_count: u64) -> Self {
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// A result with no rows and no columns.
    pub fn empty(row_count: u64) -> Self {
        Self::new(Arc::new(Vec::new()), Vec::new(), row_count)
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[inline]
    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the first row, or None if empty
    #[inline]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Exactly one row.
    pub fn one(&self) -> Result<&Row, UnexpectedRowCount> {
        match self.rows.as_slice() {
            [row] => Ok(row),
            rows => Err(UnexpectedRowCount {
                expected: "exactly 1",
                actual: rows.len(),
            }),
        }
    }

    /// Zero or one row.
    pub fn one_or_none(&self) -> Result<Option<&Row>, UnexpectedRowCount> {
        match self.rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row)),
            rows => Err(UnexpectedRowCount {
                expected: "at most 1",
                actual: rows.len(),
            }),
        }
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get_index(0))
    }

    /// Every value of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get_index(idx).unwrap_or(&NULL))
                .collect(),
        )
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<QueryResult rows={} row_count={}>",
            self.rows.len(),
            self.row_count
        )
    }
}

/// Build a result from backend rows already converted to [`Value`].
pub(crate) fn collect_rows<I, R>(columns: Vec<String>, rows: I, row_count: u64) -> QueryResult
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = Value>,
{
    let columns = Arc::new(columns);
    let rows: Vec<Row> = rows
        .into_iter()
        .map(|values| Row {
            columns: Arc::clone(&columns),
            values: values.into_iter().collect(),
        })
        .collect();
    QueryResult::new(columns, rows, row_count)
}
