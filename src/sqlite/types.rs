//! SQLite storage classes and their mapping to [`Value`].

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::codec;
use crate::executor::Value;

/// Text layout used for dates and timestamps; sorts and compares correctly
/// and is understood by SQLite's date functions.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqliteValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqliteValue::Null)
    }

    /// Convert from rusqlite ValueRef.
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqliteValue::Null,
            ValueRef::Integer(i) => SqliteValue::Integer(i),
            ValueRef::Real(f) => SqliteValue::Real(f),
            ValueRef::Text(s) => SqliteValue::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => SqliteValue::Blob(b.to_vec()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqliteValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Parameters on the way in. Structured values become canonical JSON text.
impl From<Value> for SqliteValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqliteValue::Null,
            Value::Bool(b) => SqliteValue::Integer(b as i64),
            Value::Int(i) => SqliteValue::Integer(i),
            Value::Float(f) => SqliteValue::Real(f),
            Value::Text(s) => SqliteValue::Text(s),
            Value::Bytes(b) => SqliteValue::Blob(b),
            Value::Date(d) => SqliteValue::Text(d.format(DATE_FORMAT).to_string()),
            Value::Timestamp(ts) => SqliteValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Json(j) => SqliteValue::Text(codec::encode_json(&j)),
        }
    }
}

/// Column values on the way out. SQLite keeps no declared type per value,
/// so everything maps to its storage class.
impl From<SqliteValue> for Value {
    fn from(value: SqliteValue) -> Self {
        match value {
            SqliteValue::Null => Value::Null,
            SqliteValue::Integer(i) => Value::Int(i),
            SqliteValue::Real(f) => Value::Float(f),
            SqliteValue::Text(s) => Value::Text(s),
            SqliteValue::Blob(b) => Value::Bytes(b),
        }
    }
}

impl ToSql for SqliteValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqliteValue::Null => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Null)),
            SqliteValue::Integer(i) => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i))),
            SqliteValue::Real(f) => Ok(ToSqlOutput::Owned(rusqlite::types::Value::Real(*f))),
            // Borrow text and blobs instead of copying them into the statement
            SqliteValue::Text(s) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            SqliteValue::Blob(b) => Ok(ToSqlOutput::Borrowed(ValueRef::Blob(b))),
        }
    }
}

impl FromSql for SqliteValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(SqliteValue::from_value_ref(value))
    }
}
