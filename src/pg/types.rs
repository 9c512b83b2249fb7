//! PostgreSQL type encoding and decoding.
//!
//! Parameters are sent in binary where the type is unambiguous and as
//! untyped text otherwise, so the server infers the column type. Results use
//! binary for the types decoded here and text for everything else.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use super::error::{PgError, PgResult};
use super::protocol::Format;
use crate::executor::{JsonValue, Value};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    /// Let the server infer the type.
    pub const UNSPECIFIED: Oid = Oid(0);

    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const JSON: Oid = Oid(114);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Whether [`decode_binary`] understands this type.
    pub fn has_binary_decoder(self) -> bool {
        self.is_text_like()
            || matches!(
                self,
                Oid::BOOL
                    | Oid::BYTEA
                    | Oid::INT2
                    | Oid::INT4
                    | Oid::INT8
                    | Oid::FLOAT4
                    | Oid::FLOAT8
                    | Oid::DATE
                    | Oid::TIMESTAMP
                    | Oid::TIMESTAMPTZ
                    | Oid::UUID
                    | Oid::JSON
                    | Oid::JSONB
            )
    }

    /// Result format to request for a column of this type.
    pub fn result_format(self) -> Format {
        if self.has_binary_decoder() {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

/// Days from 0001-01-01 (CE day 1) to 2000-01-01, the PostgreSQL epoch.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

/// 2000-01-01T00:00:00Z in microseconds since the Unix epoch.
const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

/// JSONB binary format version.
const JSONB_VERSION: u8 = 1;

// ============================================================================
// Parameters
// ============================================================================

/// A bind parameter, encoded for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub oid: Oid,
    pub format: Format,
    /// `None` is SQL NULL.
    pub data: Option<Vec<u8>>,
}

impl Param {
    fn binary(oid: Oid, data: Vec<u8>) -> Self {
        Self {
            oid,
            format: Format::Binary,
            data: Some(data),
        }
    }

    fn text(data: String) -> Self {
        Self {
            oid: Oid::UNSPECIFIED,
            format: Format::Text,
            data: Some(data.into_bytes()),
        }
    }

    /// Encode a caller value.
    ///
    /// Text and NULL go out untyped so that columns of any text-input type
    /// (`uuid`, `numeric`, enums) accept them.
    pub fn encode(value: &Value) -> Self {
        match value {
            Value::Null => Self {
                oid: Oid::UNSPECIFIED,
                format: Format::Text,
                data: None,
            },
            Value::Bool(b) => Self::binary(Oid::BOOL, vec![*b as u8]),
            Value::Int(i) => Self::binary(Oid::INT8, i.to_be_bytes().to_vec()),
            Value::Float(f) => Self::binary(Oid::FLOAT8, f.to_be_bytes().to_vec()),
            Value::Text(s) => Self::text(s.clone()),
            Value::Bytes(b) => Self::binary(Oid::BYTEA, b.clone()),
            Value::Date(d) => {
                let days = d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE;
                Self::binary(Oid::DATE, days.to_be_bytes().to_vec())
            }
            Value::Timestamp(ts) => {
                let micros = ts.and_utc().timestamp_micros() - PG_EPOCH_UNIX_MICROS;
                Self::binary(Oid::TIMESTAMP, micros.to_be_bytes().to_vec())
            }
            Value::Json(j) => {
                let mut buf = BytesMut::new();
                buf.put_u8(JSONB_VERSION);
                buf.put_slice(crate::codec::encode_json(j).as_bytes());
                Self::binary(Oid::JSONB, buf.to_vec())
            }
        }
    }
}

// ============================================================================
// Results
// ============================================================================

fn fixed<const N: usize>(oid: Oid, data: &[u8]) -> PgResult<[u8; N]> {
    data.try_into().map_err(|_| {
        PgError::Type(format!(
            "expected {} bytes for type {}, got {}",
            N,
            oid.as_i32(),
            data.len()
        ))
    })
}

fn utf8(data: &[u8]) -> PgResult<String> {
    String::from_utf8(data.to_vec()).map_err(|e| PgError::Type(format!("invalid UTF-8: {}", e)))
}

fn json(text: &str) -> PgResult<Value> {
    serde_json::from_str::<JsonValue>(text)
        .map(Value::Json)
        .map_err(|e| PgError::Type(format!("invalid JSON: {}", e)))
}

/// Decode a binary-format column value.
pub fn decode_binary(oid: Oid, data: &[u8]) -> PgResult<Value> {
    match oid {
        Oid::BOOL => Ok(Value::Bool(fixed::<1>(oid, data)?[0] != 0)),
        Oid::INT2 => Ok(Value::Int(i16::from_be_bytes(fixed(oid, data)?) as i64)),
        Oid::INT4 => Ok(Value::Int(i32::from_be_bytes(fixed(oid, data)?) as i64)),
        Oid::INT8 => Ok(Value::Int(i64::from_be_bytes(fixed(oid, data)?))),
        Oid::FLOAT4 => Ok(Value::Float(f32::from_be_bytes(fixed(oid, data)?) as f64)),
        Oid::FLOAT8 => Ok(Value::Float(f64::from_be_bytes(fixed(oid, data)?))),
        Oid::BYTEA => Ok(Value::Bytes(data.to_vec())),
        Oid::UUID => Ok(Value::Text(
            uuid::Uuid::from_bytes(fixed(oid, data)?).hyphenated().to_string(),
        )),
        Oid::DATE => {
            let days = i32::from_be_bytes(fixed(oid, data)?);
            match days {
                i32::MAX => Ok(Value::Text("infinity".into())),
                i32::MIN => Ok(Value::Text("-infinity".into())),
                _ => days
                    .checked_add(PG_EPOCH_DAYS_FROM_CE)
                    .and_then(NaiveDate::from_num_days_from_ce_opt)
                    .map(Value::Date)
                    .ok_or_else(|| PgError::Type(format!("date out of range: {}", days))),
            }
        }
        Oid::TIMESTAMP | Oid::TIMESTAMPTZ => {
            let micros = i64::from_be_bytes(fixed(oid, data)?);
            match micros {
                i64::MAX => Ok(Value::Text("infinity".into())),
                i64::MIN => Ok(Value::Text("-infinity".into())),
                _ => micros
                    .checked_add(PG_EPOCH_UNIX_MICROS)
                    .and_then(DateTime::from_timestamp_micros)
                    .map(|dt| Value::Timestamp(dt.naive_utc()))
                    .ok_or_else(|| PgError::Type(format!("timestamp out of range: {}", micros))),
            }
        }
        Oid::JSON => json(&utf8(data)?),
        Oid::JSONB => match data.split_first() {
            Some((&JSONB_VERSION, rest)) => json(&utf8(rest)?),
            Some((version, _)) => Err(PgError::Type(format!(
                "unsupported jsonb version {}",
                version
            ))),
            None => Err(PgError::Type("empty jsonb value".into())),
        },
        _ if oid.is_text_like() => Ok(Value::Text(utf8(data)?)),
        _ => Err(PgError::Type(format!(
            "no binary decoder for type {}",
            oid.as_i32()
        ))),
    }
}

/// Decode a text-format column value. Types without a binary decoder
/// (`numeric`, `interval`, arrays) arrive here and stay text.
pub fn decode_text(oid: Oid, data: &[u8]) -> PgResult<Value> {
    let text = utf8(data)?;
    match oid {
        Oid::BOOL => Ok(Value::Bool(text == "t")),
        Oid::INT2 | Oid::INT4 | Oid::INT8 => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| PgError::Type(format!("invalid integer {:?}: {}", text, e))),
        Oid::FLOAT4 | Oid::FLOAT8 => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| PgError::Type(format!("invalid float {:?}: {}", text, e))),
        Oid::JSON | Oid::JSONB => json(&text),
        // "infinity" and BC dates do not parse and stay text.
        Oid::DATE => Ok(NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or(Value::Text(text))),
        Oid::TIMESTAMP => Ok(NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .map(Value::Timestamp)
            .unwrap_or(Value::Text(text))),
        _ => Ok(Value::Text(text)),
    }
}

/// Decode one column value in the format the server sent it.
pub fn decode(oid: Oid, format: Format, data: &[u8]) -> PgResult<Value> {
    match format {
        Format::Binary => decode_binary(oid, data),
        Format::Text => decode_text(oid, data),
    }
}
