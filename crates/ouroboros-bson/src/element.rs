//! Element model
//!
//! A BSON value is one variant of the closed [`Bson`] enum. An [`Element`]
//! pairs a value with its field name. Both are immutable once constructed;
//! encoder, printer and ordering all match on [`Bson`] exhaustively, so a new
//! variant cannot be added without the compiler pointing at every consumer.
//!
//! Equality and hashing are structural. Doubles compare by IEEE-754 bit
//! pattern, so `0.0 != -0.0` and a NaN equals itself.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::document::Document;
use crate::error::{BsonError, Result};

/// Generic binary subtype
pub const BINARY_SUBTYPE_GENERIC: u8 = 0x00;

/// Deprecated binary subtype that repeats the payload length on the wire
pub const BINARY_SUBTYPE_OLD: u8 = 0x02;

/// Wire type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    ObjectId = 0x07,
    Boolean = 0x08,
    UtcDateTime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    DbPointer = 0x0C,
    JavaScript = 0x0D,
    Symbol = 0x0E,
    JavaScriptWithScope = 0x0F,
    Int32 = 0x10,
    MongoTimestamp = 0x11,
    Int64 = 0x12,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl ElementType {
    /// The tag byte written before each element
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Human readable type name
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Double => "double",
            ElementType::String => "string",
            ElementType::Document => "document",
            ElementType::Array => "array",
            ElementType::Binary => "binary",
            ElementType::ObjectId => "objectId",
            ElementType::Boolean => "boolean",
            ElementType::UtcDateTime => "date",
            ElementType::Null => "null",
            ElementType::Regex => "regex",
            ElementType::DbPointer => "dbPointer",
            ElementType::JavaScript => "javascript",
            ElementType::Symbol => "symbol",
            ElementType::JavaScriptWithScope => "javascriptWithScope",
            ElementType::Int32 => "int",
            ElementType::MongoTimestamp => "timestamp",
            ElementType::Int64 => "long",
            ElementType::MaxKey => "maxKey",
            ElementType::MinKey => "minKey",
        }
    }
}

impl TryFrom<u8> for ElementType {
    type Error = BsonError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ElementType::Double),
            0x02 => Ok(ElementType::String),
            0x03 => Ok(ElementType::Document),
            0x04 => Ok(ElementType::Array),
            0x05 => Ok(ElementType::Binary),
            0x07 => Ok(ElementType::ObjectId),
            0x08 => Ok(ElementType::Boolean),
            0x09 => Ok(ElementType::UtcDateTime),
            0x0A => Ok(ElementType::Null),
            0x0B => Ok(ElementType::Regex),
            0x0C => Ok(ElementType::DbPointer),
            0x0D => Ok(ElementType::JavaScript),
            0x0E => Ok(ElementType::Symbol),
            0x0F => Ok(ElementType::JavaScriptWithScope),
            0x10 => Ok(ElementType::Int32),
            0x11 => Ok(ElementType::MongoTimestamp),
            0x12 => Ok(ElementType::Int64),
            0x7F => Ok(ElementType::MaxKey),
            0xFF => Ok(ElementType::MinKey),
            _ => Err(BsonError::UnknownElementType(byte)),
        }
    }
}

/// 12-byte object identifier
///
/// Layout is a 4-byte big-endian timestamp followed by an 8-byte
/// big-endian machine/counter value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn from_parts(timestamp: u32, machine_id: u64) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..].copy_from_slice(&machine_id.to_be_bytes());
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn machine_id(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[4..]);
        u64::from_be_bytes(tail)
    }

    /// Lower-case hex form, 24 characters
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse the 24 character hex form
    pub fn parse_str(s: &str) -> Result<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(BsonError::InvalidObjectId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| BsonError::InvalidObjectId(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Ordered array of values
///
/// Elements are always named by their zero-based position; every
/// constructor re-indexes what it is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Array {
    elements: Vec<Element>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing elements, renaming each to its position
    pub fn from_elements(elements: impl IntoIterator<Item = Element>) -> Self {
        let elements = elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| {
                if element.name == index.to_string() {
                    element
                } else {
                    element.renamed(index.to_string())
                }
            })
            .collect();
        Self { elements }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bson> {
        self.elements.get(index).map(Element::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bson> {
        self.elements.iter().map(Element::value)
    }

    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }
}

impl FromIterator<Bson> for Array {
    fn from_iter<I: IntoIterator<Item = Bson>>(iter: I) -> Self {
        let elements = iter
            .into_iter()
            .enumerate()
            .map(|(index, value)| Element::new(index.to_string(), value))
            .collect();
        Self { elements }
    }
}

/// A BSON value
#[derive(Debug, Clone)]
pub enum Bson {
    Double(f64),
    String(String),
    Document(Document),
    Array(Array),
    Binary { subtype: u8, bytes: Vec<u8> },
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the Unix epoch
    UtcDateTime(i64),
    Null,
    Regex { pattern: String, options: String },
    DbPointer { namespace: String, id: ObjectId },
    JavaScript(String),
    Symbol(String),
    JavaScriptWithScope { code: String, scope: Document },
    Int32(i32),
    /// Server replication timestamp: seconds in the high word, increment in the low word
    MongoTimestamp(i64),
    Int64(i64),
    MinKey,
    MaxKey,
}

impl Bson {
    pub fn element_type(&self) -> ElementType {
        match self {
            Bson::Double(_) => ElementType::Double,
            Bson::String(_) => ElementType::String,
            Bson::Document(_) => ElementType::Document,
            Bson::Array(_) => ElementType::Array,
            Bson::Binary { .. } => ElementType::Binary,
            Bson::ObjectId(_) => ElementType::ObjectId,
            Bson::Boolean(_) => ElementType::Boolean,
            Bson::UtcDateTime(_) => ElementType::UtcDateTime,
            Bson::Null => ElementType::Null,
            Bson::Regex { .. } => ElementType::Regex,
            Bson::DbPointer { .. } => ElementType::DbPointer,
            Bson::JavaScript(_) => ElementType::JavaScript,
            Bson::Symbol(_) => ElementType::Symbol,
            Bson::JavaScriptWithScope { .. } => ElementType::JavaScriptWithScope,
            Bson::Int32(_) => ElementType::Int32,
            Bson::MongoTimestamp(_) => ElementType::MongoTimestamp,
            Bson::Int64(_) => ElementType::Int64,
            Bson::MinKey => ElementType::MinKey,
            Bson::MaxKey => ElementType::MaxKey,
        }
    }

    /// Build a replication timestamp from its two 32-bit halves
    pub fn mongo_timestamp(seconds: u32, increment: u32) -> Self {
        Bson::MongoTimestamp(((seconds as i64) << 32) | increment as i64)
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Bson::Binary {
            subtype: BINARY_SUBTYPE_GENERIC,
            bytes: bytes.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Bson::Regex {
            pattern: pattern.into(),
            options: options.into(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Integral view of any numeric variant; doubles are truncated
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Bson::Int32(v) => Some(*v as i64),
            Bson::Int64(v) => Some(*v),
            Bson::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }
}

impl PartialEq for Bson {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Bson::Double(a), Bson::Double(b)) => a.to_bits() == b.to_bits(),
            (Bson::String(a), Bson::String(b)) => a == b,
            (Bson::Document(a), Bson::Document(b)) => a == b,
            (Bson::Array(a), Bson::Array(b)) => a == b,
            (
                Bson::Binary { subtype: sa, bytes: ba },
                Bson::Binary { subtype: sb, bytes: bb },
            ) => sa == sb && ba == bb,
            (Bson::ObjectId(a), Bson::ObjectId(b)) => a == b,
            (Bson::Boolean(a), Bson::Boolean(b)) => a == b,
            (Bson::UtcDateTime(a), Bson::UtcDateTime(b)) => a == b,
            (
                Bson::Regex { pattern: pa, options: oa },
                Bson::Regex { pattern: pb, options: ob },
            ) => pa == pb && oa == ob,
            (
                Bson::DbPointer { namespace: na, id: ia },
                Bson::DbPointer { namespace: nb, id: ib },
            ) => na == nb && ia == ib,
            (Bson::JavaScript(a), Bson::JavaScript(b)) => a == b,
            (Bson::Symbol(a), Bson::Symbol(b)) => a == b,
            (
                Bson::JavaScriptWithScope { code: ca, scope: sa },
                Bson::JavaScriptWithScope { code: cb, scope: sb },
            ) => ca == cb && sa == sb,
            (Bson::Int32(a), Bson::Int32(b)) => a == b,
            (Bson::MongoTimestamp(a), Bson::MongoTimestamp(b)) => a == b,
            (Bson::Int64(a), Bson::Int64(b)) => a == b,
            (Bson::Null, Bson::Null) | (Bson::MinKey, Bson::MinKey) | (Bson::MaxKey, Bson::MaxKey) => {
                true
            }
            _ => false,
        }
    }
}

impl Eq for Bson {}

impl Hash for Bson {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element_type().hash(state);
        match self {
            Bson::Double(v) => v.to_bits().hash(state),
            Bson::String(s) | Bson::JavaScript(s) | Bson::Symbol(s) => s.hash(state),
            Bson::Document(d) => d.hash(state),
            Bson::Array(a) => a.hash(state),
            Bson::Binary { subtype, bytes } => {
                subtype.hash(state);
                bytes.hash(state);
            }
            Bson::ObjectId(id) => id.hash(state),
            Bson::Boolean(b) => b.hash(state),
            Bson::UtcDateTime(v) | Bson::MongoTimestamp(v) | Bson::Int64(v) => v.hash(state),
            Bson::Regex { pattern, options } => {
                pattern.hash(state);
                options.hash(state);
            }
            Bson::DbPointer { namespace, id } => {
                namespace.hash(state);
                id.hash(state);
            }
            Bson::JavaScriptWithScope { code, scope } => {
                code.hash(state);
                scope.hash(state);
            }
            Bson::Int32(v) => v.hash(state),
            Bson::Null | Bson::MinKey | Bson::MaxKey => {}
        }
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_string())
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl From<Array> for Bson {
    fn from(v: Array) -> Self {
        Bson::Array(v)
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<Vec<u8>> for Bson {
    fn from(v: Vec<u8>) -> Self {
        Bson::binary(v)
    }
}

/// A named value within a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element {
    name: String,
    value: Bson,
}

impl Element {
    pub fn new(name: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Bson {
        &self.value
    }

    pub fn into_value(self) -> Bson {
        self.value
    }

    pub fn element_type(&self) -> ElementType {
        self.value.element_type()
    }

    /// Structural copy under a new name
    pub fn with_name(&self, name: impl Into<String>) -> Element {
        Element {
            name: name.into(),
            value: self.value.clone(),
        }
    }

    /// Consuming variant of [`Element::with_name`]
    pub fn renamed(self, name: impl Into<String>) -> Element {
        Element {
            name: name.into(),
            value: self.value,
        }
    }
}
