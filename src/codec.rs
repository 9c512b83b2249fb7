//! Structured (JSON) column codec.
//!
//! SQLite has no JSON column type, so structured values travel as their
//! canonical `serde_json` text and are parsed back on read for the columns the
//! configuration declares structured. PostgreSQL binds `Value::Json` natively
//! and decodes `json`/`jsonb` itself; the read pass still runs there so a
//! structured column stored as `text` behaves the same on both backends.

use std::collections::HashSet;

use crate::executor::{Row, Value};

/// Canonical text encoding of a structured value.
#[inline]
pub fn encode_json(value: &serde_json::Value) -> String {
    // Serializing a `serde_json::Value` to a String cannot fail.
    value.to_string()
}

/// Prepare a parameter for a backend that stores JSON as text.
///
/// `Json` becomes canonical text; every other value, including text that is
/// already canonical JSON, passes through unchanged.
pub fn encode(value: Value) -> Value {
    match value {
        Value::Json(json) => Value::Text(encode_json(&json)),
        other => other,
    }
}

/// Parse a stored structured value.
///
/// Non-null text is parsed as JSON; text that does not parse is returned
/// unchanged. Values that are not text are never touched.
pub fn decode(value: Value) -> Value {
    match value {
        Value::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => Value::Json(json),
            Err(_) => Value::Text(text),
        },
        other => other,
    }
}

/// The set of column names declared structured, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StructuredColumns {
    names: HashSet<String>,
}

impl StructuredColumns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[inline]
    pub fn is_structured(&self, column: &str) -> bool {
        !self.names.is_empty() && self.names.contains(&column.to_ascii_lowercase())
    }

    /// Decode every structured column of `rows` in place.
    pub fn decode_rows(&self, columns: &[String], rows: &mut [Row]) {
        if self.is_empty() || rows.is_empty() {
            return;
        }

        let targets: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, name)| self.is_structured(name))
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return;
        }

        for row in rows.iter_mut() {
            for &i in &targets {
                if let Some(slot) = row.get_index_mut(i) {
                    if matches!(slot, Value::Text(_)) {
                        let value = std::mem::replace(slot, Value::Null);
                        *slot = decode(value);
                    }
                }
            }
        }
    }
}
