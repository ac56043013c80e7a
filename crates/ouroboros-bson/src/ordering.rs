//! Total ordering of values
//!
//! Values of different kinds sort by canonical class:
//!
//! ```text
//! MinKey < Null < numbers < string/symbol < document < array < binary
//!   < objectId < boolean < date < timestamp < regex < dbPointer
//!   < code < code-with-scope < MaxKey
//! ```
//!
//! Numbers compare by numeric value across int32, int64 and double, with NaN
//! below every other number. Values that are numerically equal but
//! structurally different (`Int32(1)` vs `Double(1.0)`, `0.0` vs `-0.0`) are
//! ordered by type tag and then bit pattern, so `cmp` returns `Equal` exactly
//! when `==` holds.

use std::cmp::Ordering;

use crate::document::Document;
use crate::element::{Array, Bson, Element};

fn class(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null => 1,
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary { .. } => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::UtcDateTime(_) => 9,
        Bson::MongoTimestamp(_) => 10,
        Bson::Regex { .. } => 11,
        Bson::DbPointer { .. } => 12,
        Bson::JavaScript(_) => 13,
        Bson::JavaScriptWithScope { .. } => 14,
        Bson::MaxKey => 15,
    }
}

/// 2^63 as a double; the first value past `i64::MAX`
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer against a double
fn cmp_i64_f64(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return Ordering::Greater;
    }
    match (i as f64).partial_cmp(&d) {
        Some(Ordering::Equal) | None => {
            // `d` is integral here; compare exactly unless it is out of range
            if d >= I64_LIMIT {
                Ordering::Less
            } else {
                i.cmp(&(d as i64))
            }
        }
        Some(ord) => ord,
    }
}

fn cmp_numbers(a: &Bson, b: &Bson) -> Ordering {
    let numeric = match (a, b) {
        (Bson::Double(x), Bson::Double(y)) => cmp_f64(*x, *y),
        (Bson::Double(x), other) => other
            .as_integer()
            .map_or(Ordering::Equal, |i| cmp_i64_f64(i, *x).reverse()),
        (other, Bson::Double(y)) => other
            .as_integer()
            .map_or(Ordering::Equal, |i| cmp_i64_f64(i, *y)),
        (x, y) => x.as_integer().cmp(&y.as_integer()),
    };
    numeric.then_with(|| match (a, b) {
        (Bson::Double(x), Bson::Double(y)) => x.to_bits().cmp(&y.to_bits()),
        _ => a.element_type().cmp(&b.element_type()),
    })
}

fn cmp_same_class(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_), _) => cmp_numbers(a, b),
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x
            .as_bytes()
            .cmp(y.as_bytes())
            .then_with(|| a.element_type().cmp(&b.element_type())),
        (Bson::Document(x), Bson::Document(y)) => x.cmp(y),
        (Bson::Array(x), Bson::Array(y)) => x.cmp(y),
        (
            Bson::Binary { subtype: sa, bytes: ba },
            Bson::Binary { subtype: sb, bytes: bb },
        ) => ba.len().cmp(&bb.len()).then(sa.cmp(sb)).then_with(|| ba.cmp(bb)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::UtcDateTime(x), Bson::UtcDateTime(y)) => x.cmp(y),
        (Bson::MongoTimestamp(x), Bson::MongoTimestamp(y)) => (*x as u64).cmp(&(*y as u64)),
        (
            Bson::Regex { pattern: pa, options: oa },
            Bson::Regex { pattern: pb, options: ob },
        ) => pa.cmp(pb).then_with(|| oa.cmp(ob)),
        (
            Bson::DbPointer { namespace: na, id: ia },
            Bson::DbPointer { namespace: nb, id: ib },
        ) => na.cmp(nb).then_with(|| ia.cmp(ib)),
        (Bson::JavaScript(x), Bson::JavaScript(y)) => x.cmp(y),
        (
            Bson::JavaScriptWithScope { code: ca, scope: sa },
            Bson::JavaScriptWithScope { code: cb, scope: sb },
        ) => ca.cmp(cb).then_with(|| sa.cmp(sb)),
        _ => Ordering::Equal,
    }
}

impl Ord for Bson {
    fn cmp(&self, other: &Self) -> Ordering {
        class(self)
            .cmp(&class(other))
            .then_with(|| cmp_same_class(self, other))
    }
}

impl PartialOrd for Bson {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Value class first, then name, then value
impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        class(self.value())
            .cmp(&class(other.value()))
            .then_with(|| self.name().cmp(other.name()))
            .then_with(|| self.value().cmp(other.value()))
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elements().cmp(other.elements())
    }
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Array {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elements().cmp(other.elements())
    }
}

impl PartialOrd for Array {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ObjectId;

    #[test]
    fn test_cross_type_order() {
        let mut values = vec![
            Bson::MaxKey,
            Bson::Boolean(false),
            Bson::String("a".into()),
            Bson::Int32(3),
            Bson::Null,
            Bson::ObjectId(ObjectId::from_parts(0, 0)),
            Bson::MinKey,
            Bson::UtcDateTime(0),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Bson::MinKey,
                Bson::Null,
                Bson::Int32(3),
                Bson::String("a".into()),
                Bson::ObjectId(ObjectId::from_parts(0, 0)),
                Bson::Boolean(false),
                Bson::UtcDateTime(0),
                Bson::MaxKey,
            ]
        );
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(Bson::Int32(2) < Bson::Double(2.5));
        assert!(Bson::Double(2.5) < Bson::Int64(3));
        assert!(Bson::Double(f64::NAN) < Bson::Int64(i64::MIN));
        assert!(Bson::Int64(i64::MAX) < Bson::Double(I64_LIMIT));
        assert!(Bson::Double(f64::NEG_INFINITY) < Bson::Int32(i32::MIN));
    }

    #[test]
    fn test_equal_only_when_structurally_equal() {
        assert_ne!(Bson::Int32(1).cmp(&Bson::Double(1.0)), Ordering::Equal);
        assert_ne!(Bson::Int32(1).cmp(&Bson::Int64(1)), Ordering::Equal);
        assert_ne!(Bson::Double(0.0).cmp(&Bson::Double(-0.0)), Ordering::Equal);
        assert_ne!(
            Bson::String("x".into()).cmp(&Bson::Symbol("x".into())),
            Ordering::Equal
        );
        assert_eq!(Bson::Double(f64::NAN).cmp(&Bson::Double(f64::NAN)), Ordering::Equal);
        assert_eq!(Bson::Int64(7).cmp(&Bson::Int64(7)), Ordering::Equal);
    }

    #[test]
    fn test_document_order() {
        let a = Document::from_elements(vec![Element::new("a", 1)]);
        let b = Document::from_elements(vec![Element::new("a", 2)]);
        let longer = Document::from_elements(vec![Element::new("a", 1), Element::new("b", 0)]);
        assert!(a < b);
        assert!(a < longer);
        assert!(Document::new() < a);
    }
}
