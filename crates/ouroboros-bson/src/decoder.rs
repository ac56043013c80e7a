//! BSON decoder over an in-memory buffer

use crate::document::Document;
use crate::element::{Array, Bson, Element, ElementType, ObjectId, BINARY_SUBTYPE_OLD};
use crate::error::{BsonError, Result};

/// Default upper bound on a single decoded document (16 MiB plus slack for
/// command overhead, as servers allow)
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024 + 16 * 1024;

/// Default limit on embedded documents and arrays below the top level
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// Cursor over encoded documents
///
/// Several documents may sit back to back in one buffer (a reply batch);
/// call [`BsonInputStream::read_document`] until [`BsonInputStream::is_empty`].
pub struct BsonInputStream<'a> {
    data: &'a [u8],
    pos: usize,
    max_document_size: usize,
    max_nesting_depth: usize,
    /// Nesting level of the documents this stream reads; 0 at the top
    depth: usize,
}

impl<'a> BsonInputStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            depth: 0,
        }
    }

    pub fn with_max_document_size(mut self, max: usize) -> Self {
        self.max_document_size = max;
        self
    }

    pub fn with_max_nesting_depth(mut self, max: usize) -> Self {
        self.max_nesting_depth = max;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode the next document, advancing past it
    pub fn read_document(&mut self) -> Result<Document> {
        if self.depth > self.max_nesting_depth {
            return Err(BsonError::NestingTooDeep {
                max: self.max_nesting_depth,
            });
        }
        let declared = self.peek_i32()?;
        if declared < 5 {
            return Err(BsonError::InvalidLength(declared));
        }
        let declared = declared as usize;
        if declared > self.max_document_size {
            return Err(BsonError::DocumentTooLarge {
                size: declared,
                max: self.max_document_size,
            });
        }
        let body = self.take(declared)?;

        let mut inner = BsonInputStream {
            data: body,
            pos: 4,
            max_document_size: self.max_document_size,
            max_nesting_depth: self.max_nesting_depth,
            depth: self.depth + 1,
        };
        let elements = inner.read_elements()?;
        if inner.pos != declared {
            return Err(BsonError::LengthMismatch {
                declared,
                consumed: inner.pos,
            });
        }
        Ok(Document::from_elements(elements))
    }

    /// Elements up to and including the terminating zero byte
    fn read_elements(&mut self) -> Result<Vec<Element>> {
        let mut elements = Vec::new();
        loop {
            let tag = self.read_u8()?;
            if tag == 0 {
                return Ok(elements);
            }
            let element_type = ElementType::try_from(tag)?;
            let name = self.read_cstring()?;
            let value = self.read_value(element_type)?;
            elements.push(Element::new(name, value));
        }
    }

    fn read_value(&mut self, element_type: ElementType) -> Result<Bson> {
        let value = match element_type {
            ElementType::Double => Bson::Double(f64::from_le_bytes(self.read_array()?)),
            ElementType::String => Bson::String(self.read_string()?),
            ElementType::Document => Bson::Document(self.read_document()?),
            ElementType::Array => {
                let doc = self.read_document()?;
                Bson::Array(Array::from_elements(doc.into_elements()))
            }
            ElementType::Binary => self.read_binary()?,
            ElementType::ObjectId => Bson::ObjectId(self.read_object_id()?),
            ElementType::Boolean => Bson::Boolean(self.read_u8()? != 0),
            ElementType::UtcDateTime => Bson::UtcDateTime(self.read_i64()?),
            ElementType::Null => Bson::Null,
            ElementType::Regex => Bson::Regex {
                pattern: self.read_cstring()?,
                options: self.read_cstring()?,
            },
            ElementType::DbPointer => Bson::DbPointer {
                namespace: self.read_string()?,
                id: self.read_object_id()?,
            },
            ElementType::JavaScript => Bson::JavaScript(self.read_string()?),
            ElementType::Symbol => Bson::Symbol(self.read_string()?),
            ElementType::JavaScriptWithScope => {
                let start = self.pos;
                let total = self.read_i32()?;
                if total < 4 {
                    return Err(BsonError::InvalidLength(total));
                }
                let code = self.read_string()?;
                let scope = self.read_document()?;
                let consumed = self.pos - start;
                if consumed != total as usize {
                    return Err(BsonError::LengthMismatch {
                        declared: total as usize,
                        consumed,
                    });
                }
                Bson::JavaScriptWithScope { code, scope }
            }
            ElementType::Int32 => Bson::Int32(self.read_i32()?),
            ElementType::MongoTimestamp => Bson::MongoTimestamp(self.read_i64()?),
            ElementType::Int64 => Bson::Int64(self.read_i64()?),
            ElementType::MinKey => Bson::MinKey,
            ElementType::MaxKey => Bson::MaxKey,
        };
        Ok(value)
    }

    fn read_binary(&mut self) -> Result<Bson> {
        let len = self.read_len()?;
        let subtype = self.read_u8()?;
        let bytes = if subtype == BINARY_SUBTYPE_OLD {
            let inner = self.read_len()?;
            if inner + 4 != len {
                return Err(BsonError::LengthMismatch {
                    declared: len,
                    consumed: inner + 4,
                });
            }
            self.take(inner)?
        } else {
            self.take(len)?
        };
        Ok(Bson::Binary {
            subtype,
            bytes: bytes.to_vec(),
        })
    }

    fn read_object_id(&mut self) -> Result<ObjectId> {
        Ok(ObjectId::from_bytes(self.read_array()?))
    }

    fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BsonError::MissingTerminator)?;
        let s = std::str::from_utf8(&rest[..end]).map_err(|_| BsonError::InvalidUtf8)?;
        self.pos += end + 1;
        Ok(s.to_string())
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(BsonError::InvalidLength(len));
        }
        let raw = self.take(len as usize)?;
        let (text, terminator) = raw.split_at(raw.len() - 1);
        if terminator[0] != 0 {
            return Err(BsonError::MissingTerminator);
        }
        std::str::from_utf8(text)
            .map(str::to_string)
            .map_err(|_| BsonError::InvalidUtf8)
    }

    /// Non-negative length prefix
    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(BsonError::InvalidLength(len));
        }
        Ok(len as usize)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn peek_i32(&self) -> Result<i32> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(BsonError::UnexpectedEof)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BsonError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode exactly one document; leftover bytes are an error
pub fn decode_document(data: &[u8]) -> Result<Document> {
    let mut input = BsonInputStream::new(data);
    let doc = input.read_document()?;
    if !input.is_empty() {
        return Err(BsonError::TrailingBytes(input.remaining()));
    }
    Ok(doc)
}
