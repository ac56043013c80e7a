//! Shell-style text rendering
//!
//! `{ "name" : "router", "port" : 27017, "seen" : ISODate("2024-01-01T00:00:00.000Z") }`

use std::fmt::{self, Display, Formatter, Write};

use chrono::DateTime;

use crate::document::Document;
use crate::element::{Array, Bson, Element};

fn write_quoted(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c.is_control() => write!(f, "\\u{:04x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn write_double(f: &mut Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        f.write_str("NaN")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        write!(f, "{:?}", v)
    }
}

fn write_hex(f: &mut Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl Display for Bson {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Double(v) => write_double(f, *v),
            Bson::String(s) => write_quoted(f, s),
            Bson::Document(doc) => doc.fmt(f),
            Bson::Array(array) => array.fmt(f),
            Bson::Binary { subtype, bytes } => {
                write!(f, "BinData({}, \"", subtype)?;
                write_hex(f, bytes)?;
                f.write_str("\")")
            }
            Bson::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::UtcDateTime(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(dt) => write!(f, "ISODate(\"{}\")", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
                None => write!(f, "Date({})", ms),
            },
            Bson::Null => f.write_str("null"),
            Bson::Regex { pattern, options } => write!(f, "/{}/{}", pattern, options),
            Bson::DbPointer { namespace, id } => {
                f.write_str("DBPointer(")?;
                write_quoted(f, namespace)?;
                write!(f, ", ObjectId(\"{}\"))", id)
            }
            Bson::JavaScript(code) => {
                f.write_str("Code(")?;
                write_quoted(f, code)?;
                f.write_char(')')
            }
            Bson::Symbol(s) => {
                f.write_str("Symbol(")?;
                write_quoted(f, s)?;
                f.write_char(')')
            }
            Bson::JavaScriptWithScope { code, scope } => {
                f.write_str("Code(")?;
                write_quoted(f, code)?;
                write!(f, ", {})", scope)
            }
            Bson::Int32(v) => write!(f, "{}", v),
            Bson::MongoTimestamp(v) => {
                let seconds = ((*v as u64) >> 32) as u32;
                let increment = *v as u32;
                write!(f, "Timestamp({}, {})", seconds, increment)
            }
            Bson::Int64(v) => write!(f, "NumberLong({})", v),
            Bson::MinKey => f.write_str("MinKey()"),
            Bson::MaxKey => f.write_str("MaxKey()"),
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_quoted(f, self.name())?;
        write!(f, " : {}", self.value())
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{ ")?;
        for (i, element) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            element.fmt(f)?;
        }
        f.write_str(" }")
    }
}

impl Display for Array {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("[]");
        }
        f.write_str("[ ")?;
        for (i, value) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            value.fmt(f)?;
        }
        f.write_str(" ]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DocumentBuilder;
    use crate::element::ObjectId;

    #[test]
    fn test_document_rendering() {
        let mut builder = DocumentBuilder::new();
        builder
            .add("name", "router")
            .add("port", 27017)
            .add("big", 5i64)
            .add("ratio", 0.5)
            .add_null("none");
        builder.push_array("tags").add("a").add(true);
        let doc = builder.build();

        assert_eq!(
            doc.to_string(),
            r#"{ "name" : "router", "port" : 27017, "big" : NumberLong(5), "ratio" : 0.5, "none" : null, "tags" : [ "a", true ] }"#
        );
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(Document::new().to_string(), "{}");
        assert_eq!(Array::new().to_string(), "[]");
    }

    #[test]
    fn test_special_values() {
        assert_eq!(Bson::UtcDateTime(0).to_string(), r#"ISODate("1970-01-01T00:00:00.000Z")"#);
        assert_eq!(Bson::mongo_timestamp(7, 3).to_string(), "Timestamp(7, 3)");
        assert_eq!(Bson::regex("^a", "i").to_string(), "/^a/i");
        assert_eq!(
            Bson::Binary { subtype: 0, bytes: vec![0x0a, 0xff] }.to_string(),
            r#"BinData(0, "0aff")"#
        );
        assert_eq!(
            Bson::ObjectId(ObjectId::from_bytes([0; 12])).to_string(),
            r#"ObjectId("000000000000000000000000")"#
        );
        assert_eq!(Bson::Double(f64::NAN).to_string(), "NaN");
        assert_eq!(Bson::Double(1.0).to_string(), "1.0");
        assert_eq!(Bson::MinKey.to_string(), "MinKey()");
    }

    #[test]
    fn test_string_escaping() {
        let element = Element::new("q\"", "line\nbreak");
        assert_eq!(element.to_string(), r#""q\"" : "line\nbreak""#);
    }
}
