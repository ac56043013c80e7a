//! Document and array builders
//!
//! Builders are single-threaded accumulators. Nested documents and arrays
//! are tracked in an arena: each node owns an ordered list of slots, where a
//! slot is either a finished [`Element`] or a placeholder pointing at a child
//! node. A child only remembers its parent's index, which is what
//! [`DocumentScope::pop`] and [`ArrayScope::pop`] navigate back to.
//!
//! ```
//! use ouroboros_bson::{DocumentBuilder, Bson};
//!
//! let mut builder = DocumentBuilder::new();
//! builder.add("name", "mongos").add("port", 27017);
//! builder
//!     .push("tags")
//!     .add("dc", "east")
//!     .push_array("racks")
//!     .add("r1")
//!     .add("r2");
//!
//! let doc = builder.build();
//! assert_eq!(doc.find("tags.racks.1"), Some(&Bson::String("r2".into())));
//! ```

use crate::document::Document;
use crate::element::{Array, Bson, Element};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Document,
    Array,
}

#[derive(Debug)]
enum Slot {
    Element(Element),
    Child { name: String, node: usize },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<usize>,
    slots: Vec<Slot>,
}

/// Node storage shared by a builder and all of its scopes. Node 0 is the root.
#[derive(Debug)]
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    fn with_root(kind: NodeKind) -> Self {
        Self {
            nodes: vec![Node {
                kind,
                parent: None,
                slots: Vec::with_capacity(32),
            }],
        }
    }

    /// Positional name for the next slot of an array node
    fn next_index(&self, node: usize) -> String {
        self.nodes[node].slots.len().to_string()
    }

    fn append(&mut self, node: usize, element: Element) {
        self.nodes[node].slots.push(Slot::Element(element));
    }

    fn push_child(&mut self, node: usize, name: String, kind: NodeKind) -> usize {
        let child = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(node),
            slots: Vec::new(),
        });
        self.nodes[node].slots.push(Slot::Child { name, node: child });
        child
    }

    fn build_elements(&self, node: usize) -> Vec<Element> {
        let slots = &self.nodes[node].slots;
        let mut elements = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Element(element) => elements.push(element.clone()),
                Slot::Child { name, node: child } => {
                    elements.push(Element::new(name.clone(), self.build_value(*child)))
                }
            }
        }
        elements
    }

    fn build_document(&self, node: usize) -> Document {
        let document = Document::from_elements(self.build_elements(node));
        debug_assert!(
            document.duplicate_name().is_none(),
            "{:?} is not unique in document",
            document.duplicate_name()
        );
        document
    }

    fn build_value(&self, node: usize) -> Bson {
        match self.nodes[node].kind {
            NodeKind::Document => Bson::Document(self.build_document(node)),
            NodeKind::Array => Bson::Array(Array::from_elements(self.build_elements(node))),
        }
    }

    fn reset(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0].slots.clear();
    }
}

/// The parent returned by `pop()`
pub enum ParentScope<'a> {
    Document(DocumentScope<'a>),
    Array(ArrayScope<'a>),
}

impl<'a> ParentScope<'a> {
    fn wrap(arena: &'a mut Arena, node: usize) -> Self {
        let kind = arena.nodes[node].kind;
        match kind {
            NodeKind::Document => ParentScope::Document(DocumentScope { arena, node }),
            NodeKind::Array => ParentScope::Array(ArrayScope { arena, node }),
        }
    }

    pub fn into_document(self) -> Option<DocumentScope<'a>> {
        match self {
            ParentScope::Document(scope) => Some(scope),
            ParentScope::Array(_) => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayScope<'a>> {
        match self {
            ParentScope::Array(scope) => Some(scope),
            ParentScope::Document(_) => None,
        }
    }
}

/// Handle to one document node inside a builder
pub struct DocumentScope<'a> {
    arena: &'a mut Arena,
    node: usize,
}

impl<'a> DocumentScope<'a> {
    pub fn add(self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.arena.append(self.node, Element::new(name, value));
        self
    }

    pub fn add_null(self, name: impl Into<String>) -> Self {
        self.add(name, Bson::Null)
    }

    pub fn add_binary(self, name: impl Into<String>, subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        self.add(
            name,
            Bson::Binary {
                subtype,
                bytes: bytes.into(),
            },
        )
    }

    pub fn add_regex(
        self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        self.add(name, Bson::regex(pattern, options))
    }

    pub fn add_min_key(self, name: impl Into<String>) -> Self {
        self.add(name, Bson::MinKey)
    }

    pub fn add_max_key(self, name: impl Into<String>) -> Self {
        self.add(name, Bson::MaxKey)
    }

    /// Append an existing element under its own name
    pub fn add_element(self, element: Element) -> Self {
        self.arena.append(self.node, element);
        self
    }

    /// Open a sub-document and continue inside it
    pub fn push(self, name: impl Into<String>) -> DocumentScope<'a> {
        let child = self.arena.push_child(self.node, name.into(), NodeKind::Document);
        DocumentScope {
            arena: self.arena,
            node: child,
        }
    }

    /// Open a sub-array and continue inside it
    pub fn push_array(self, name: impl Into<String>) -> ArrayScope<'a> {
        let child = self.arena.push_child(self.node, name.into(), NodeKind::Array);
        ArrayScope {
            arena: self.arena,
            node: child,
        }
    }

    /// Return to the enclosing scope, or `None` at the top level
    pub fn pop(self) -> Option<ParentScope<'a>> {
        let parent = self.arena.nodes[self.node].parent?;
        Some(ParentScope::wrap(self.arena, parent))
    }
}

/// Handle to one array node inside a builder
///
/// Values are named by their position at append time.
pub struct ArrayScope<'a> {
    arena: &'a mut Arena,
    node: usize,
}

impl<'a> ArrayScope<'a> {
    pub fn add(self, value: impl Into<Bson>) -> Self {
        let name = self.arena.next_index(self.node);
        self.arena.append(self.node, Element::new(name, value));
        self
    }

    pub fn add_null(self) -> Self {
        self.add(Bson::Null)
    }

    pub fn add_binary(self, subtype: u8, bytes: impl Into<Vec<u8>>) -> Self {
        self.add(Bson::Binary {
            subtype,
            bytes: bytes.into(),
        })
    }

    pub fn add_regex(self, pattern: impl Into<String>, options: impl Into<String>) -> Self {
        self.add(Bson::regex(pattern, options))
    }

    pub fn add_min_key(self) -> Self {
        self.add(Bson::MinKey)
    }

    pub fn add_max_key(self) -> Self {
        self.add(Bson::MaxKey)
    }

    /// Append an existing element, renamed to the next position
    pub fn add_element(self, element: Element) -> Self {
        let name = self.arena.next_index(self.node);
        self.arena.append(self.node, element.renamed(name));
        self
    }

    pub fn push(self) -> DocumentScope<'a> {
        let name = self.arena.next_index(self.node);
        let child = self.arena.push_child(self.node, name, NodeKind::Document);
        DocumentScope {
            arena: self.arena,
            node: child,
        }
    }

    pub fn push_array(self) -> ArrayScope<'a> {
        let name = self.arena.next_index(self.node);
        let child = self.arena.push_child(self.node, name, NodeKind::Array);
        ArrayScope {
            arena: self.arena,
            node: child,
        }
    }

    pub fn pop(self) -> Option<ParentScope<'a>> {
        let parent = self.arena.nodes[self.node].parent?;
        Some(ParentScope::wrap(self.arena, parent))
    }
}

/// Builder for a top-level document
///
/// Not thread-safe; the owner has exclusive access for its whole lifetime.
#[derive(Debug)]
pub struct DocumentBuilder {
    arena: Arena,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self {
            arena: Arena::with_root(NodeKind::Document),
        }
    }

    /// Scope for the top-level document
    pub fn root(&mut self) -> DocumentScope<'_> {
        DocumentScope {
            arena: &mut self.arena,
            node: 0,
        }
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.root().add(name, value);
        self
    }

    pub fn add_null(&mut self, name: impl Into<String>) -> &mut Self {
        self.root().add_null(name);
        self
    }

    pub fn add_binary(
        &mut self,
        name: impl Into<String>,
        subtype: u8,
        bytes: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.root().add_binary(name, subtype, bytes);
        self
    }

    pub fn add_regex(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> &mut Self {
        self.root().add_regex(name, pattern, options);
        self
    }

    pub fn add_min_key(&mut self, name: impl Into<String>) -> &mut Self {
        self.root().add_min_key(name);
        self
    }

    pub fn add_max_key(&mut self, name: impl Into<String>) -> &mut Self {
        self.root().add_max_key(name);
        self
    }

    pub fn add_element(&mut self, element: Element) -> &mut Self {
        self.root().add_element(element);
        self
    }

    pub fn push(&mut self, name: impl Into<String>) -> DocumentScope<'_> {
        self.root().push(name)
    }

    pub fn push_array(&mut self, name: impl Into<String>) -> ArrayScope<'_> {
        self.root().push_array(name)
    }

    /// Number of top-level slots
    pub fn len(&self) -> usize {
        self.arena.nodes[0].slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize every placeholder into an immutable document
    ///
    /// The builder is left untouched and may keep accumulating.
    pub fn build(&self) -> Document {
        self.arena.build_document(0)
    }

    /// Drop every slot, keeping the allocation for reuse
    pub fn reset(&mut self) -> &mut Self {
        self.arena.reset();
        self
    }
}

/// Builder for a top-level array
#[derive(Debug)]
pub struct ArrayBuilder {
    arena: Arena,
}

impl Default for ArrayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self {
            arena: Arena::with_root(NodeKind::Array),
        }
    }

    pub fn root(&mut self) -> ArrayScope<'_> {
        ArrayScope {
            arena: &mut self.arena,
            node: 0,
        }
    }

    pub fn add(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.root().add(value);
        self
    }

    pub fn add_null(&mut self) -> &mut Self {
        self.root().add_null();
        self
    }

    pub fn add_binary(&mut self, subtype: u8, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.root().add_binary(subtype, bytes);
        self
    }

    pub fn add_regex(&mut self, pattern: impl Into<String>, options: impl Into<String>) -> &mut Self {
        self.root().add_regex(pattern, options);
        self
    }

    pub fn add_min_key(&mut self) -> &mut Self {
        self.root().add_min_key();
        self
    }

    pub fn add_max_key(&mut self) -> &mut Self {
        self.root().add_max_key();
        self
    }

    pub fn add_element(&mut self, element: Element) -> &mut Self {
        self.root().add_element(element);
        self
    }

    pub fn push(&mut self) -> DocumentScope<'_> {
        self.root().push()
    }

    pub fn push_array(&mut self) -> ArrayScope<'_> {
        self.root().push_array()
    }

    pub fn len(&self) -> usize {
        self.arena.nodes[0].slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(&self) -> Array {
        Array::from_elements(self.arena.build_elements(0))
    }

    /// Build the array as a named element
    pub fn build_element(&self, name: impl Into<String>) -> Element {
        Element::new(name, self.build())
    }

    pub fn reset(&mut self) -> &mut Self {
        self.arena.reset();
        self
    }
}
