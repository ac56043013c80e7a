//! Streaming BSON encoder
//!
//! ## Wire layout
//!
//! ```text
//! document := int32 totalLength | element* | 0x00
//! element  := byte tag | cstring name | payload
//! cstring  := utf8 | 0x00
//! string   := int32 (len + 1) | utf8 | 0x00
//! ```
//!
//! All integers are little-endian. `totalLength` counts itself and the
//! terminator.
//!
//! ## Failure model
//!
//! Primitive writes never return errors. The first failure is captured and
//! every later write becomes a no-op, so the stream stays in one consistent
//! failed state. [`BsonOutputStream::write_document`] reports the captured
//! failure once the document is written; [`BsonOutputStream::reset`] clears it.
//! Structural problems (embedded NUL in a name, duplicate names when
//! checking is on, oversized documents) are detected before the first byte
//! is written.

use std::io::Write;
use std::sync::Arc;
use std::vec;

use crate::cache::StringEncoderCache;
use crate::document::Document;
use crate::element::{Bson, Element, BINARY_SUBTYPE_OLD};
use crate::error::{BsonError, Result};

/// Largest length any prefix can express
const MAX_ENCODED_SIZE: usize = i32::MAX as usize;

/// Encoder bound to one output stream
pub struct BsonOutputStream<W: Write> {
    output: W,
    error: Option<BsonError>,
    cache: Arc<StringEncoderCache>,
    check_duplicate_names: bool,
}

impl<W: Write> BsonOutputStream<W> {
    /// Encoder with a private default-sized string cache
    pub fn new(output: W) -> Self {
        Self::with_cache(output, Arc::new(StringEncoderCache::default()))
    }

    pub fn with_cache(output: W, cache: Arc<StringEncoderCache>) -> Self {
        Self {
            output,
            error: None,
            cache,
            check_duplicate_names: cfg!(debug_assertions),
        }
    }

    /// Enable or disable rejection of documents with repeated direct child
    /// names. Defaults to on in debug builds.
    pub fn check_duplicate_names(mut self, enabled: bool) -> Self {
        self.check_duplicate_names = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<StringEncoderCache> {
        &self.cache
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&BsonError> {
        self.error.as_ref()
    }

    /// Clear a captured failure so the stream can be reused
    pub fn reset(&mut self) {
        self.error = None;
    }

    pub fn get_ref(&self) -> &W {
        &self.output
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    pub fn size_of_cstring(&self, s: &str) -> usize {
        s.len() + 1
    }

    pub fn size_of_string(&self, s: &str) -> usize {
        4 + s.len() + 1
    }

    pub fn write_byte(&mut self, b: u8) {
        self.write_bytes(&[b]);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.output.write_all(data) {
            self.error = Some(e.into());
        }
    }

    pub fn write_int(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_long(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Bare UTF-8 plus terminator; an embedded NUL is captured as an error
    pub fn write_cstring(&mut self, s: &str) {
        if let Some(bytes) = self.cache.lookup(s) {
            self.write_bytes(&bytes);
            return;
        }
        if s.as_bytes().contains(&0) {
            if self.error.is_none() {
                self.error = Some(BsonError::EmbeddedNul(s.to_string()));
            }
            return;
        }
        self.write_bytes(s.as_bytes());
        self.write_byte(0);
        self.cache.admit(s);
    }

    /// Length-prefixed string
    pub fn write_string(&mut self, s: &str) {
        self.write_int((s.len() + 1) as i32);
        match self.cache.lookup(s) {
            Some(bytes) => self.write_bytes(&bytes),
            None => {
                self.write_bytes(s.as_bytes());
                self.write_byte(0);
                self.cache.admit(s);
            }
        }
    }

    /// Encode a whole document
    ///
    /// Returns the captured failure, if any; the failure stays recorded
    /// until [`BsonOutputStream::reset`].
    pub fn write_document(&mut self, document: &Document) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        // Sizes of every nested document, in the order they are written
        let mut sizes = Vec::new();
        let size = elements_size(document.elements(), Some(&mut sizes));
        if size > MAX_ENCODED_SIZE {
            return Err(BsonError::DocumentTooLarge {
                size,
                max: MAX_ENCODED_SIZE,
            });
        }
        validate_document(document, self.check_duplicate_names)?;

        self.write_elements(document.elements(), &mut sizes.into_iter());
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Flush the underlying stream, surfacing any captured failure first
    pub fn flush(&mut self) -> Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        self.output.flush().map_err(BsonError::from)
    }

    fn write_elements(&mut self, elements: &[Element], sizes: &mut vec::IntoIter<usize>) {
        let size = sizes.next().unwrap_or_default();
        self.write_int(size as i32);
        for element in elements {
            self.write_element(element, sizes);
        }
        self.write_byte(0);
    }

    fn write_element(&mut self, element: &Element, sizes: &mut vec::IntoIter<usize>) {
        self.write_byte(element.element_type().tag());
        self.write_cstring(element.name());
        self.write_value(element.value(), sizes);
    }

    fn write_value(&mut self, value: &Bson, sizes: &mut vec::IntoIter<usize>) {
        match value {
            Bson::Double(v) => self.write_double(*v),
            Bson::String(s) | Bson::JavaScript(s) | Bson::Symbol(s) => self.write_string(s),
            Bson::Document(doc) => self.write_elements(doc.elements(), sizes),
            Bson::Array(array) => self.write_elements(array.elements(), sizes),
            Bson::Binary { subtype, bytes } => {
                if *subtype == BINARY_SUBTYPE_OLD {
                    self.write_int((bytes.len() + 4) as i32);
                    self.write_byte(*subtype);
                    self.write_int(bytes.len() as i32);
                } else {
                    self.write_int(bytes.len() as i32);
                    self.write_byte(*subtype);
                }
                self.write_bytes(bytes);
            }
            Bson::ObjectId(id) => self.write_bytes(id.bytes()),
            Bson::Boolean(b) => self.write_byte(u8::from(*b)),
            Bson::UtcDateTime(v) | Bson::MongoTimestamp(v) | Bson::Int64(v) => self.write_long(*v),
            Bson::Null | Bson::MinKey | Bson::MaxKey => {}
            Bson::Regex { pattern, options } => {
                self.write_cstring(pattern);
                self.write_cstring(options);
            }
            Bson::DbPointer { namespace, id } => {
                self.write_string(namespace);
                self.write_bytes(id.bytes());
            }
            Bson::JavaScriptWithScope { code, scope } => {
                let scope_size = sizes.as_slice().first().copied().unwrap_or_default();
                self.write_int((4 + self.size_of_string(code) + scope_size) as i32);
                self.write_string(code);
                self.write_elements(scope.elements(), sizes);
            }
            Bson::Int32(v) => self.write_int(*v),
        }
    }
}

/// Encode a document into a fresh buffer
pub fn encode_document(document: &Document) -> Result<Vec<u8>> {
    let mut out = BsonOutputStream::new(Vec::with_capacity(document.encoded_size()));
    out.write_document(document)?;
    Ok(out.into_inner())
}

/// Encode a document into a fresh buffer using a shared cache
pub fn encode_document_with_cache(
    document: &Document,
    cache: Arc<StringEncoderCache>,
) -> Result<Vec<u8>> {
    let mut out =
        BsonOutputStream::with_cache(Vec::with_capacity(document.encoded_size()), cache);
    out.write_document(document)?;
    Ok(out.into_inner())
}

fn validate_document(document: &Document, check_duplicates: bool) -> Result<()> {
    if check_duplicates {
        if let Some(name) = document.duplicate_name() {
            return Err(BsonError::DuplicateName(name.to_string()));
        }
    }
    validate_elements(document.elements(), check_duplicates)
}

fn validate_elements(elements: &[Element], check_duplicates: bool) -> Result<()> {
    for element in elements {
        validate_cstring(element.name())?;
        match element.value() {
            Bson::Document(doc) => validate_document(doc, check_duplicates)?,
            Bson::Array(array) => validate_elements(array.elements(), check_duplicates)?,
            Bson::JavaScriptWithScope { scope, .. } => validate_document(scope, check_duplicates)?,
            Bson::Regex { pattern, options } => {
                validate_cstring(pattern)?;
                validate_cstring(options)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_cstring(s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(BsonError::EmbeddedNul(s.to_string()));
    }
    Ok(())
}

/// Size of a document body; with `sizes`, also records every nested
/// document's size in pre-order, the order the writer consumes them
fn elements_size(elements: &[Element], mut sizes: Option<&mut Vec<usize>>) -> usize {
    let slot = sizes.as_mut().map(|sizes| {
        sizes.push(0);
        sizes.len() - 1
    });
    let mut size = 4 + 1;
    for element in elements {
        size += 1 + element.name().len() + 1 + value_size(element.value(), sizes.as_deref_mut());
    }
    if let (Some(sizes), Some(slot)) = (sizes, slot) {
        sizes[slot] = size;
    }
    size
}

fn value_size(value: &Bson, sizes: Option<&mut Vec<usize>>) -> usize {
    match value {
        Bson::Double(_) | Bson::UtcDateTime(_) | Bson::MongoTimestamp(_) | Bson::Int64(_) => 8,
        Bson::String(s) | Bson::JavaScript(s) | Bson::Symbol(s) => 4 + s.len() + 1,
        Bson::Document(doc) => elements_size(doc.elements(), sizes),
        Bson::Array(array) => elements_size(array.elements(), sizes),
        Bson::Binary { subtype, bytes } => {
            let extra = if *subtype == BINARY_SUBTYPE_OLD { 4 } else { 0 };
            4 + 1 + extra + bytes.len()
        }
        Bson::ObjectId(_) => 12,
        Bson::Boolean(_) => 1,
        Bson::Null | Bson::MinKey | Bson::MaxKey => 0,
        Bson::Regex { pattern, options } => pattern.len() + 1 + options.len() + 1,
        Bson::DbPointer { namespace, .. } => 4 + namespace.len() + 1 + 12,
        Bson::JavaScriptWithScope { code, scope } => {
            4 + (4 + code.len() + 1) + elements_size(scope.elements(), sizes)
        }
        Bson::Int32(_) => 4,
    }
}

impl Element {
    /// Exact encoded size: tag, name and payload
    pub fn encoded_size(&self) -> usize {
        1 + self.name().len() + 1 + value_size(self.value(), None)
    }
}

impl Document {
    /// Exact encoded size including the length prefix and terminator
    pub fn encoded_size(&self) -> usize {
        elements_size(self.elements(), None)
    }
}
