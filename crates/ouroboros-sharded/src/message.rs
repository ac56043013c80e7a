//! Wire messages
//!
//! Every message starts with a 16-byte little-endian header:
//!
//! ```text
//! int32 messageLength | int32 requestId | int32 responseTo | int32 opCode
//! ```
//!
//! `OP_QUERY` (2004) body:
//!
//! ```text
//! int32 flags | cstring "db.collection" | int32 numberToSkip
//!   | int32 numberToReturn | document query | [document fieldSelector]
//! ```
//!
//! `OP_REPLY` (1) body:
//!
//! ```text
//! int32 responseFlags | int64 cursorId | int32 startingFrom
//!   | int32 numberReturned | document*
//! ```

use std::sync::Arc;

use ouroboros_bson::{BsonInputStream, BsonOutputStream, Document, DocumentBuilder, StringEncoderCache};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ConnectionError, Result};

pub const HEADER_LENGTH: usize = 16;

/// Message operation codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
}

impl TryFrom<i32> for OpCode {
    type Error = ConnectionError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            other => Err(ConnectionError::Protocol(format!(
                "Unsupported op code: {}",
                other
            ))),
        }
    }
}

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub fn parse(bytes: &[u8; HEADER_LENGTH]) -> Result<Self> {
        let int_at = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let length = int_at(0);
        if length < HEADER_LENGTH as i32 {
            return Err(ConnectionError::Protocol(format!(
                "Message length {} is shorter than its header",
                length
            )));
        }
        Ok(Self {
            length,
            request_id: int_at(4),
            response_to: int_at(8),
            op_code: OpCode::try_from(int_at(12))?,
        })
    }

    /// Length of the body that follows the header
    pub fn body_length(&self) -> usize {
        self.length as usize - HEADER_LENGTH
    }
}

/// Read one framed message, rejecting anything over `max_message_size`
pub async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> Result<(MessageHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LENGTH];
    reader.read_exact(&mut raw).await?;
    let header = MessageHeader::parse(&raw)?;
    if header.length as usize > max_message_size {
        return Err(ConnectionError::Protocol(format!(
            "Message of {} bytes exceeds the maximum of {}",
            header.length, max_message_size
        )));
    }

    let mut body = vec![0u8; header.body_length()];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Write a header, let `body` append the rest, then patch the length
fn frame<F>(
    request_id: i32,
    response_to: i32,
    op_code: OpCode,
    cache: Arc<StringEncoderCache>,
    max_message_size: usize,
    body: F,
) -> Result<Vec<u8>>
where
    F: FnOnce(&mut BsonOutputStream<Vec<u8>>) -> Result<()>,
{
    let mut out = BsonOutputStream::with_cache(Vec::with_capacity(256), cache);
    out.write_int(0);
    out.write_int(request_id);
    out.write_int(response_to);
    out.write_int(op_code as i32);
    body(&mut out)?;
    if let Some(err) = out.error() {
        return Err(err.clone().into());
    }

    let mut bytes = out.into_inner();
    if bytes.len() > max_message_size {
        return Err(ConnectionError::Protocol(format!(
            "Message of {} bytes exceeds the maximum of {}",
            bytes.len(),
            max_message_size
        )));
    }
    let length = bytes.len() as i32;
    bytes[0..4].copy_from_slice(&length.to_le_bytes());
    Ok(bytes)
}

/// Where a query may be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    /// Anything other than primary-only may be served by a secondary
    pub fn is_slave_ok(self) -> bool {
        !matches!(self, ReadPreference::Primary)
    }
}

/// `OP_QUERY` flag bits
pub mod query_flags {
    pub const TAILABLE: i32 = 0x02;
    pub const SLAVE_OK: i32 = 0x04;
    pub const NO_CURSOR_TIMEOUT: i32 = 0x10;
    pub const AWAIT_DATA: i32 = 0x20;
    pub const EXHAUST: i32 = 0x40;
    pub const PARTIAL: i32 = 0x80;
}

/// A query against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub database: String,
    pub collection: String,
    pub query: Document,
    pub fields: Option<Document>,
    pub batch_size: i32,
    pub limit: i32,
    pub number_to_skip: i32,
    pub tailable: bool,
    pub read_preference: ReadPreference,
    pub no_cursor_timeout: bool,
    pub await_data: bool,
    pub exhaust: bool,
    pub partial: bool,
}

impl Query {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, query: Document) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            query,
            fields: None,
            batch_size: 0,
            limit: 0,
            number_to_skip: 0,
            tailable: false,
            read_preference: ReadPreference::Primary,
            no_cursor_timeout: false,
            await_data: false,
            exhaust: false,
            partial: false,
        }
    }

    /// A command: single-document query against `<database>.$cmd`
    pub fn command(database: impl Into<String>, command: Document) -> Self {
        Self::new(database, "$cmd", command).limit(1)
    }

    /// `{ ismaster : 1 }` against `admin`
    pub fn is_master() -> Self {
        let mut builder = DocumentBuilder::new();
        builder.add("ismaster", 1);
        Self::command("admin", builder.build())
    }

    /// `ismaster` carrying the client's application name, when it has one
    pub fn handshake(app_name: Option<&str>) -> Self {
        let mut builder = DocumentBuilder::new();
        builder.add("ismaster", 1);
        if let Some(name) = app_name {
            builder.push("client").push("application").add("name", name);
        }
        Self::command("admin", builder.build())
    }

    pub fn fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn batch_size(mut self, size: i32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn skip(mut self, skip: i32) -> Self {
        self.number_to_skip = skip;
        self
    }

    pub fn tailable(mut self, tailable: bool) -> Self {
        self.tailable = tailable;
        self
    }

    pub fn read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = preference;
        self
    }

    pub fn no_cursor_timeout(mut self, enabled: bool) -> Self {
        self.no_cursor_timeout = enabled;
        self
    }

    pub fn await_data(mut self, enabled: bool) -> Self {
        self.await_data = enabled;
        self
    }

    pub fn exhaust(mut self, enabled: bool) -> Self {
        self.exhaust = enabled;
        self
    }

    pub fn partial(mut self, enabled: bool) -> Self {
        self.partial = enabled;
        self
    }

    /// Fully qualified `database.collection`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    pub fn flags(&self) -> i32 {
        let mut flags = 0;
        if self.tailable {
            flags |= query_flags::TAILABLE;
        }
        if self.read_preference.is_slave_ok() {
            flags |= query_flags::SLAVE_OK;
        }
        if self.no_cursor_timeout {
            flags |= query_flags::NO_CURSOR_TIMEOUT;
        }
        if self.await_data {
            flags |= query_flags::AWAIT_DATA;
        }
        if self.exhaust {
            flags |= query_flags::EXHAUST;
        }
        if self.partial {
            flags |= query_flags::PARTIAL;
        }
        flags
    }

    /// `numberToReturn` on the wire
    ///
    /// A negative value asks the server to return that many documents and
    /// close the cursor, which is what a limit no larger than the batch means.
    pub fn number_to_return(&self) -> i32 {
        let limit = self.limit.saturating_abs();
        match (self.batch_size, limit) {
            (batch, 0) => batch,
            (0, limit) => -limit,
            (batch, limit) if limit <= batch => -limit,
            (batch, _) => batch,
        }
    }

    /// Encode as an `OP_QUERY` message
    pub fn encode(
        &self,
        request_id: i32,
        cache: Arc<StringEncoderCache>,
        max_message_size: usize,
    ) -> Result<Vec<u8>> {
        frame(request_id, 0, OpCode::Query, cache, max_message_size, |out| {
            out.write_int(self.flags());
            out.write_cstring(&self.namespace());
            out.write_int(self.number_to_skip);
            out.write_int(self.number_to_return());
            out.write_document(&self.query)?;
            if let Some(fields) = &self.fields {
                out.write_document(fields)?;
            }
            Ok(())
        })
    }

    /// Decode an `OP_QUERY` body (everything after the header)
    ///
    /// Batch size and limit cannot be told apart on the wire; a negative
    /// `numberToReturn` comes back as a limit, a positive one as a batch size.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let truncated = || ConnectionError::Protocol("Truncated query message".to_string());
        let flags = read_i32(body, 0).ok_or_else(truncated)?;
        let rest = body.get(4..).ok_or_else(truncated)?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ConnectionError::Protocol("Unterminated namespace".to_string()))?;
        let namespace = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ConnectionError::Protocol("Namespace is not UTF-8".to_string()))?;
        let (database, collection) = namespace
            .split_once('.')
            .ok_or_else(|| ConnectionError::Protocol(format!("Invalid namespace: {}", namespace)))?;

        let offset = 4 + nul + 1;
        let number_to_skip = read_i32(body, offset).ok_or_else(truncated)?;
        let number_to_return = read_i32(body, offset + 4).ok_or_else(truncated)?;
        let documents = body.get(offset + 8..).ok_or_else(truncated)?;

        let mut input = BsonInputStream::new(documents);
        let query = input.read_document()?;
        let fields = if input.is_empty() {
            None
        } else {
            Some(input.read_document()?)
        };
        if !input.is_empty() {
            return Err(ConnectionError::Protocol(format!(
                "{} unexpected bytes after query",
                input.remaining()
            )));
        }

        let (batch_size, limit) = if number_to_return < 0 {
            (0, number_to_return.saturating_abs())
        } else {
            (number_to_return, 0)
        };
        let read_preference = if flags & query_flags::SLAVE_OK != 0 {
            ReadPreference::SecondaryPreferred
        } else {
            ReadPreference::Primary
        };

        Ok(Self {
            database: database.to_string(),
            collection: collection.to_string(),
            query,
            fields,
            batch_size,
            limit,
            number_to_skip,
            tailable: flags & query_flags::TAILABLE != 0,
            read_preference,
            no_cursor_timeout: flags & query_flags::NO_CURSOR_TIMEOUT != 0,
            await_data: flags & query_flags::AWAIT_DATA != 0,
            exhaust: flags & query_flags::EXHAUST != 0,
            partial: flags & query_flags::PARTIAL != 0,
        })
    }
}

/// `OP_REPLY` flag bits
pub mod response_flags {
    pub const CURSOR_NOT_FOUND: i32 = 0x01;
    pub const QUERY_FAILURE: i32 = 0x02;
    pub const SHARD_CONFIG_STALE: i32 = 0x04;
    pub const AWAIT_CAPABLE: i32 = 0x08;
}

/// A server reply
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub response_to: i32,
    pub flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    /// A successful single-batch reply
    pub fn new(response_to: i32, documents: Vec<Document>) -> Self {
        Self {
            response_to,
            documents,
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_cursor_not_found(&self) -> bool {
        self.flags & response_flags::CURSOR_NOT_FOUND != 0
    }

    pub fn is_query_failed(&self) -> bool {
        self.flags & response_flags::QUERY_FAILURE != 0
    }

    pub fn is_shard_config_stale(&self) -> bool {
        self.flags & response_flags::SHARD_CONFIG_STALE != 0
    }

    pub fn is_await_capable(&self) -> bool {
        self.flags & response_flags::AWAIT_CAPABLE != 0
    }

    /// Encode as an `OP_REPLY` message
    pub fn encode(
        &self,
        request_id: i32,
        cache: Arc<StringEncoderCache>,
        max_message_size: usize,
    ) -> Result<Vec<u8>> {
        frame(request_id, self.response_to, OpCode::Reply, cache, max_message_size, |out| {
            out.write_int(self.flags);
            out.write_long(self.cursor_id);
            out.write_int(self.starting_from);
            out.write_int(self.documents.len() as i32);
            for doc in &self.documents {
                out.write_document(doc)?;
            }
            Ok(())
        })
    }

    /// Decode an `OP_REPLY` body for the given header
    pub fn decode(header: &MessageHeader, body: &[u8]) -> Result<Self> {
        if header.op_code != OpCode::Reply {
            return Err(ConnectionError::Protocol(format!(
                "Expected a reply, got {:?}",
                header.op_code
            )));
        }
        if body.len() < 20 {
            return Err(ConnectionError::Protocol("Truncated reply message".to_string()));
        }
        let flags = read_i32(body, 0).unwrap_or_default();
        let cursor_id = i64::from_le_bytes([
            body[4], body[5], body[6], body[7], body[8], body[9], body[10], body[11],
        ]);
        let starting_from = read_i32(body, 12).unwrap_or_default();
        let number_returned = read_i32(body, 16).unwrap_or_default();
        if number_returned < 0 {
            return Err(ConnectionError::Protocol(format!(
                "Negative document count: {}",
                number_returned
            )));
        }

        let payload = &body[20..];
        // An empty document is five bytes, so the body bounds the count
        let mut documents =
            Vec::with_capacity((number_returned as usize).min(payload.len() / MIN_DOCUMENT_SIZE));
        let mut input = BsonInputStream::new(payload);
        for _ in 0..number_returned {
            documents.push(input.read_document()?);
        }
        if !input.is_empty() {
            return Err(ConnectionError::Protocol(format!(
                "{} unexpected bytes after {} documents",
                input.remaining(),
                number_returned
            )));
        }

        Ok(Self {
            response_to: header.response_to,
            flags,
            cursor_id,
            starting_from,
            documents,
        })
    }
}

const MIN_DOCUMENT_SIZE: usize = 5;

fn read_i32(bytes: &[u8], at: usize) -> Option<i32> {
    let slice = bytes.get(at..at + 4)?;
    Some(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
