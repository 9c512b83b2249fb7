//! PostgreSQL wire protocol message encoding and decoding.
//!
//! Frontend messages encode into a shared write buffer so a whole request
//! (Parse/Describe or Bind/Execute/Sync) goes out in one write. Backend
//! messages are framed by the connection and decoded here with bounds-checked
//! reads; a short or malformed body is a protocol error, never a panic.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use super::types::{Oid, Param};

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Request code identifying a CancelRequest: (1234 << 16) | 5678
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Frame header: one tag byte plus the length word.
pub const HEADER_LEN: usize = 5;

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    fn from_i16(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = PgError;

    fn try_from(b: u8) -> PgResult<Self> {
        match b {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            other => Err(PgError::Protocol(format!(
                "Unknown transaction status: {:?}",
                other as char
            ))),
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self, buf: &mut BytesMut);
}

/// Write a tagged message, back-filling the length word.
fn framed(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let start = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup message sent at connection start (untagged).
#[derive(Debug, Clone)]
pub struct StartupMessage<'a> {
    pub user: &'a str,
    pub database: &'a str,
    pub options: &'a [(&'a str, &'a str)],
}

impl FrontendMessage for StartupMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstr(buf, "user");
        put_cstr(buf, self.user);
        put_cstr(buf, "database");
        put_cstr(buf, self.database);
        for (key, value) in self.options {
            put_cstr(buf, key);
            put_cstr(buf, value);
        }
        buf.put_u8(0);

        let len = (buf.len() - start) as i32;
        buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

/// Password message (cleartext or MD5 auth)
#[derive(Debug, Clone)]
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendMessage for PasswordMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'p', |b| put_cstr(b, self.password));
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage<'a> {
    pub query: &'a str,
}

impl FrontendMessage for QueryMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'Q', |b| put_cstr(b, self.query));
    }
}

/// Parse message ('P') - Creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage<'a> {
    pub name: &'a str,
    pub query: &'a str,
    pub param_types: &'a [Oid],
}

impl FrontendMessage for ParseMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'P', |b| {
            put_cstr(b, self.name);
            put_cstr(b, self.query);
            b.put_i16(self.param_types.len() as i16);
            for oid in self.param_types {
                b.put_i32(oid.as_i32());
            }
        });
    }
}

/// Bind message ('B') - Binds parameters to a prepared statement
#[derive(Debug, Clone)]
pub struct BindMessage<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    pub params: &'a [Param],
    pub result_formats: &'a [Format],
}

impl FrontendMessage for BindMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'B', |b| {
            put_cstr(b, self.portal);
            put_cstr(b, self.statement);

            b.put_i16(self.params.len() as i16);
            for param in self.params {
                b.put_i16(param.format as i16);
            }

            b.put_i16(self.params.len() as i16);
            for param in self.params {
                match &param.data {
                    Some(data) => {
                        b.put_i32(data.len() as i32);
                        b.put_slice(data);
                    }
                    None => b.put_i32(-1),
                }
            }

            b.put_i16(self.result_formats.len() as i16);
            for fmt in self.result_formats {
                b.put_i16(*fmt as i16);
            }
        });
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage<'a> {
    pub portal: &'a str,
    /// 0 = no limit
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'E', |b| {
            put_cstr(b, self.portal);
            b.put_i32(self.max_rows);
        });
    }
}

/// Describe message ('D') - Request description of statement or portal
#[derive(Debug, Clone)]
pub struct DescribeMessage<'a> {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: &'a str,
}

impl FrontendMessage for DescribeMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'D', |b| {
            b.put_u8(self.kind);
            put_cstr(b, self.name);
        });
    }
}

/// Close message ('C') - Releases a prepared statement or portal
#[derive(Debug, Clone)]
pub struct CloseMessage<'a> {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: &'a str,
}

impl FrontendMessage for CloseMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'C', |b| {
            b.put_u8(self.kind);
            put_cstr(b, self.name);
        });
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'S', |_| {});
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'X', |_| {});
    }
}

/// Cancel request, sent on a fresh connection (untagged).
#[derive(Debug, Clone, Copy)]
pub struct CancelRequestMessage {
    pub process_id: i32,
    pub secret_key: i32,
}

impl FrontendMessage for CancelRequestMessage {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(16);
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// SASL Initial Response message ('p') - First SCRAM message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage<'a> {
    /// SASL mechanism name (e.g., "SCRAM-SHA-256")
    pub mechanism: &'a str,
    pub data: &'a [u8],
}

impl FrontendMessage for SaslInitialResponseMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'p', |b| {
            put_cstr(b, self.mechanism);
            b.put_i32(self.data.len() as i32);
            b.put_slice(self.data);
        });
    }
}

/// SASL Response message ('p') - Subsequent SCRAM messages
#[derive(Debug, Clone)]
pub struct SaslResponseMessage<'a> {
    pub data: &'a [u8],
}

impl FrontendMessage for SaslResponseMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        framed(buf, b'p', |b| b.put_slice(self.data));
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },

    // Asynchronous; LISTEN is not supported, so these are skipped
    NotificationResponse { channel: String, payload: String },
}

impl BackendMessage {
    /// Decode the body of a framed message with type byte `tag`.
    pub fn decode(tag: u8, body: Bytes) -> PgResult<Self> {
        let mut body = Reader(body);

        let msg = match tag {
            b'R' => body.auth()?,
            b'T' => body.row_description()?,
            b'D' => body.data_row()?,
            b'C' => BackendMessage::CommandComplete { tag: body.cstr()? },
            b'Z' => BackendMessage::ReadyForQuery {
                status: TransactionStatus::try_from(body.u8()?)?,
            },
            b'E' => BackendMessage::ErrorResponse {
                fields: body.fields()?,
            },
            b'N' => BackendMessage::NoticeResponse {
                fields: body.fields()?,
            },
            b'S' => BackendMessage::ParameterStatus {
                name: body.cstr()?,
                value: body.cstr()?,
            },
            b'K' => BackendMessage::BackendKeyData {
                process_id: body.i32()?,
                secret_key: body.i32()?,
            },
            b't' => {
                let n = body.count()?;
                let mut type_oids = Vec::with_capacity(n);
                for _ in 0..n {
                    type_oids.push(Oid::from_i32(body.i32()?));
                }
                BackendMessage::ParameterDescription { type_oids }
            }
            b'A' => {
                body.i32()?;
                BackendMessage::NotificationResponse {
                    channel: body.cstr()?,
                    payload: body.cstr()?,
                }
            }
            b'1' => BackendMessage::ParseComplete,
            b'2' => BackendMessage::BindComplete,
            b'3' => BackendMessage::CloseComplete,
            b'I' => BackendMessage::EmptyQueryResponse,
            b'n' => BackendMessage::NoData,
            b's' => BackendMessage::PortalSuspended,
            _ => {
                return Err(PgError::Protocol(format!(
                    "Unknown message type: {:?}",
                    tag as char
                )))
            }
        };

        Ok(msg)
    }
}

/// Bounds-checked cursor over a message body.
struct Reader(Bytes);

impl Reader {
    fn need(&self, n: usize) -> PgResult<()> {
        if self.0.remaining() < n {
            return Err(PgError::Protocol(format!(
                "Message truncated: needed {} more bytes, {} left",
                n,
                self.0.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> PgResult<u8> {
        self.need(1)?;
        Ok(self.0.get_u8())
    }

    fn i16(&mut self) -> PgResult<i16> {
        self.need(2)?;
        Ok(self.0.get_i16())
    }

    fn i32(&mut self) -> PgResult<i32> {
        self.need(4)?;
        Ok(self.0.get_i32())
    }

    /// A non-negative 16-bit element count.
    fn count(&mut self) -> PgResult<usize> {
        let n = self.i16()?;
        usize::try_from(n).map_err(|_| PgError::Protocol(format!("Negative count: {}", n)))
    }

    fn bytes(&mut self, n: usize) -> PgResult<Bytes> {
        self.need(n)?;
        Ok(self.0.split_to(n))
    }

    /// Read a null-terminated string. Tries strict UTF-8 first and falls
    /// back to lossy conversion.
    fn cstr(&mut self) -> PgResult<String> {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PgError::Protocol("Missing null terminator in string".to_string()))?;

        let s = match std::str::from_utf8(&self.0[..end]) {
            Ok(s) => s.to_owned(),
            Err(_) => String::from_utf8_lossy(&self.0[..end]).into_owned(),
        };
        self.0.advance(end + 1);
        Ok(s)
    }

    fn rest(self) -> Bytes {
        self.0
    }

    fn auth(mut self) -> PgResult<BackendMessage> {
        let auth_type = self.i32()?;

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&self.bytes(4)?);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while self.0.has_remaining() {
                    let mech = self.cstr()?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: self.rest() }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: self.rest() }),
            _ => Err(PgError::Auth(format!(
                "Unsupported authentication method: {}",
                auth_type
            ))),
        }
    }

    fn row_description(mut self) -> PgResult<BackendMessage> {
        let n = self.count()?;
        let mut fields = Vec::with_capacity(n);

        for _ in 0..n {
            fields.push(FieldDescription {
                name: self.cstr()?,
                table_oid: self.i32()?,
                column_attr: self.i16()?,
                type_oid: Oid::from_i32(self.i32()?),
                type_size: self.i16()?,
                type_modifier: self.i32()?,
                format: Format::from_i16(self.i16()?),
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn data_row(mut self) -> PgResult<BackendMessage> {
        let n = self.count()?;
        let mut values = Vec::with_capacity(n);

        for _ in 0..n {
            let len = self.i32()?;
            if len < 0 {
                values.push(None);
            } else {
                values.push(Some(self.bytes(len as usize)?));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn fields(mut self) -> PgResult<HashMap<u8, String>> {
        let mut fields = HashMap::new();
        while self.0.has_remaining() {
            let code = self.u8()?;
            if code == 0 {
                break;
            }
            fields.insert(code, self.cstr()?);
        }
        Ok(fields)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Body length from a frame's length word, which counts itself.
pub fn frame_body_len(len_word: [u8; 4]) -> PgResult<usize> {
    let len = i32::from_be_bytes(len_word);
    if len < 4 {
        return Err(PgError::Protocol(format!("Invalid message length: {}", len)));
    }
    Ok(len as usize - 4)
}

/// Build a server error from ErrorResponse fields.
pub fn server_error(fields: &HashMap<u8, String>) -> PgError {
    PgError::Server {
        severity: fields.get(&b'S').cloned().unwrap_or_default(),
        code: fields.get(&b'C').cloned().unwrap_or_default(),
        message: fields.get(&b'M').cloned().unwrap_or_default(),
        detail: fields.get(&b'D').cloned(),
        hint: fields.get(&b'H').cloned(),
        constraint: fields.get(&b'n').cloned(),
    }
}

/// Row count from a command tag ("INSERT 0 3", "UPDATE 2", "SELECT 5").
pub fn rows_affected(tag: &str) -> u64 {
    tag.rsplit(' ')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}
