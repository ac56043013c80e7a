//! Immutable ordered documents

use std::collections::HashSet;

use crate::element::{Bson, Element};

/// An ordered sequence of elements
///
/// Insertion order is preserved on the wire. Names are expected to be
/// unique, but that is only checked by the builders (debug builds) and by
/// an encoder with duplicate-name checking enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Document {
    elements: Vec<Element>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// First element with the given name
    pub fn get_element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    /// Value of the first element with the given name
    pub fn get(&self, name: &str) -> Option<&Bson> {
        self.get_element(name).map(Element::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_element(name).is_some()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Bson::as_str)
    }

    pub fn get_document(&self, name: &str) -> Option<&Document> {
        self.get(name).and_then(Bson::as_document)
    }

    /// Resolve a dotted path through nested documents and arrays
    ///
    /// `"a.b.0"` looks up `b` in sub-document `a`, then position 0 of the
    /// array found there.
    pub fn find(&self, path: &str) -> Option<&Bson> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Bson::Document(doc) => doc.get(part)?,
                Bson::Array(array) => array.get(part.parse().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// The first direct child name that appears more than once
    pub fn duplicate_name(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.elements.len());
        self.elements
            .iter()
            .map(Element::name)
            .find(|name| !seen.insert(*name))
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl IntoIterator for Document {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl FromIterator<Element> for Document {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}
