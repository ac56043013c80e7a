//! BSON for ouroboros
//!
//! Element model, scoped builders and a streaming binary codec with a
//! bounded string-encoding cache. Values also render in a shell-like text
//! form and carry a total order matching the server's sort order.

pub mod builder;
pub mod cache;
pub mod decoder;
mod display;
pub mod document;
pub mod element;
pub mod encoder;
pub mod error;
mod ordering;

pub use builder::{ArrayBuilder, ArrayScope, DocumentBuilder, DocumentScope, ParentScope};
pub use cache::StringEncoderCache;
pub use decoder::{
    decode_document, BsonInputStream, DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_MAX_NESTING_DEPTH,
};
pub use document::Document;
pub use element::{
    Array, Bson, Element, ElementType, ObjectId, BINARY_SUBTYPE_GENERIC, BINARY_SUBTYPE_OLD,
};
pub use encoder::{encode_document, encode_document_with_cache, BsonOutputStream};
pub use error::{BsonError, Result};
