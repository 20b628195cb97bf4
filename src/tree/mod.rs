//! Arena-based XML document tree.
//!
//! All nodes live in a contiguous `Vec<NodeData>` owned by the `Document`
//! and are referenced by `NodeId`, a newtype over `NonZeroU32`. Links
//! between nodes (parent, first/last child, siblings) are arena indices,
//! so the tree can be rewired in place while XIncludes are expanded
//! without reference counting or borrow juggling.

mod node;

pub use node::NodeKind;

use std::num::NonZeroU32;
use std::path::PathBuf;

use crate::error::ParseError;

/// The namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// The namespace of `xmlns` and `xmlns:*` declaration attributes.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// A typed index into the document's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    /// # Panics
    ///
    /// Panics if `index` is 0.
    #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
    fn from_index(index: usize) -> Self {
        Self(NonZeroU32::new(index as u32).expect("NodeId index must be non-zero"))
    }

    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// Storage for a single node in the document arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// What kind of node this is and its payload.
    pub kind: NodeKind,
    /// Parent node. The document node has none.
    pub parent: Option<NodeId>,
    /// First child node.
    pub first_child: Option<NodeId>,
    /// Last child node (for O(1) append).
    pub last_child: Option<NodeId>,
    /// Next sibling.
    pub next_sibling: Option<NodeId>,
    /// Previous sibling.
    pub prev_sibling: Option<NodeId>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
        }
    }
}

/// An XML attribute on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The local part of the attribute name (`"id"` for `xml:id`).
    pub name: String,
    /// The attribute value, normalized and with references expanded.
    pub value: String,
    /// Namespace prefix, if any.
    pub prefix: Option<String>,
    /// Namespace URI after resolution, if any.
    pub namespace: Option<String>,
}

impl Attribute {
    /// Creates an unprefixed attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            prefix: None,
            namespace: None,
        }
    }

    /// Returns `true` if this attribute is a namespace declaration.
    #[must_use]
    pub fn is_namespace_decl(&self) -> bool {
        self.prefix.as_deref() == Some("xmlns") || (self.prefix.is_none() && self.name == "xmlns")
    }
}

/// An XML document.
///
/// The `Document` owns all nodes in an arena. Navigation goes through
/// `&Document`, mutation through `&mut Document`.
///
/// # Examples
///
/// ```
/// use manxml::Document;
///
/// let doc = Document::parse_str("<refentry><refnamediv/></refentry>").unwrap();
/// let root = doc.root_element().unwrap();
/// assert_eq!(doc.node_name(root), Some("refentry"));
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    /// Index 0 is a placeholder so that `NodeId` can be non-zero.
    nodes: Vec<NodeData>,
    root: NodeId,
    /// XML version from the XML declaration.
    pub version: Option<String>,
    /// Encoding from the XML declaration.
    pub encoding: Option<String>,
    /// Standalone flag from the XML declaration.
    pub standalone: Option<bool>,
    /// Where the document was loaded from, if it came from disk.
    pub url: Option<PathBuf>,
}

impl Document {
    /// Creates a new document containing only the document node.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(64);
        nodes.push(NodeData::new(NodeKind::Document));
        nodes.push(NodeData::new(NodeKind::Document));
        Self {
            nodes,
            root: NodeId::from_index(1),
            version: None,
            encoding: None,
            standalone: None,
            url: None,
        }
    }

    /// Parses an XML string with default options.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the input is not well-formed XML.
    pub fn parse_str(input: &str) -> Result<Self, ParseError> {
        crate::parser::parse_str(input)
    }

    /// Returns the document node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the single top-level element, if any.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| self.node(id).kind.is_element())
    }

    /// Returns the DOCTYPE node, if the document has one.
    #[must_use]
    pub fn doctype(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| matches!(self.node(id).kind, NodeKind::DocumentType { .. }))
    }

    /// Returns the `NodeData` for the given node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.as_index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.as_index()]
    }

    /// Returns the local name of an element or the target of a PI.
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. }
            | NodeKind::ProcessingInstruction { target: name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns the namespace URI of an element node, if any.
    #[must_use]
    pub fn node_namespace(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { namespace, .. } => namespace.as_deref(),
            _ => None,
        }
    }

    /// Returns the concatenated text of a node and all its descendants.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut result = String::new();
        self.collect_text(id, &mut result);
        result
    }

    fn collect_text(&self, id: NodeId, buf: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text { content } | NodeKind::CData { content } => buf.push_str(content),
            NodeKind::Element { .. } | NodeKind::Document => {
                for child in self.children(id) {
                    self.collect_text(child, buf);
                }
            }
            _ => {}
        }
    }

    /// Returns the attributes of an element node (empty for other nodes).
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Returns the value of an unprefixed attribute.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.prefix.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Returns the value of an attribute in the given namespace.
    #[must_use]
    pub fn attribute_ns(&self, id: NodeId, namespace: &str, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Finds the first element, in document order, whose `xml:id` or `id`
    /// attribute equals `id`.
    ///
    /// Without DTD processing there is no declared ID type, so the DocBook
    /// convention of a plain `id` attribute is honoured as well.
    #[must_use]
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root).find(|&node| {
            self.attribute_ns(node, XML_NAMESPACE, "id") == Some(id)
                || self.attribute(node, "id") == Some(id)
        })
    }

    // --- Navigation ---

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Returns the first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// Returns the last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    /// Returns the next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// Returns an iterator over the children of a node.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.node(id).first_child,
        }
    }

    /// Returns an iterator over a node and its ancestors.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: Some(id),
        }
    }

    /// Returns a depth-first iterator over the descendants of a node.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            root: id,
            next: self.first_child(id),
        }
    }

    // --- Mutation ---

    /// Allocates a new, unattached node.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let index = self.nodes.len();
        self.nodes.push(NodeData::new(kind));
        NodeId::from_index(index)
    }

    /// Appends `child` to the end of `parent`'s child list.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(
            self.node(child).parent.is_none(),
            "child already has a parent; detach it first"
        );

        self.node_mut(child).parent = Some(parent);

        if let Some(last) = self.node(parent).last_child {
            self.node_mut(last).next_sibling = Some(child);
            self.node_mut(child).prev_sibling = Some(last);
        } else {
            self.node_mut(parent).first_child = Some(child);
        }
        self.node_mut(parent).last_child = Some(child);
    }

    /// Appends character data to `parent`, merging it into a trailing text
    /// node when there is one.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.last_child(parent) {
            if let NodeKind::Text { content } = &mut self.node_mut(last).kind {
                content.push_str(text);
                return;
            }
        }
        let node = self.create_node(NodeKind::Text {
            content: text.to_string(),
        });
        self.append_child(parent, node);
    }

    /// Inserts `new_child` before `reference` in the parent's child list.
    ///
    /// # Panics
    ///
    /// Panics if `reference` has no parent.
    #[allow(clippy::expect_used)]
    pub fn insert_before(&mut self, reference: NodeId, new_child: NodeId) {
        debug_assert!(
            self.node(new_child).parent.is_none(),
            "new_child already has a parent; detach it first"
        );

        let parent = self
            .node(reference)
            .parent
            .expect("reference has no parent");
        self.node_mut(new_child).parent = Some(parent);

        if let Some(prev) = self.node(reference).prev_sibling {
            self.node_mut(prev).next_sibling = Some(new_child);
            self.node_mut(new_child).prev_sibling = Some(prev);
        } else {
            self.node_mut(parent).first_child = Some(new_child);
        }

        self.node_mut(new_child).next_sibling = Some(reference);
        self.node_mut(reference).prev_sibling = Some(new_child);
    }

    /// Detaches a node from its parent. The node stays allocated but is
    /// unreachable from the document node.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            return;
        };

        let prev = self.node(id).prev_sibling;
        let next = self.node(id).next_sibling;

        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => self.node_mut(parent).first_child = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => self.node_mut(parent).last_child = prev,
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
    }

    /// Copies `source_id` and its subtree out of `source` into this
    /// document's arena, returning the unattached copy.
    pub fn import_node(&mut self, source: &Document, source_id: NodeId) -> NodeId {
        let new_id = self.create_node(source.node(source_id).kind.clone());
        for child in source.children(source_id) {
            let new_child = self.import_node(source, child);
            self.append_child(new_id, new_child);
        }
        new_id
    }

    /// Copies a subtree within this document, returning the unattached copy.
    pub fn copy_node(&mut self, id: NodeId) -> NodeId {
        let new_id = self.create_node(self.node(id).kind.clone());
        let children: Vec<NodeId> = self.children(id).collect();
        for child in children {
            let new_child = self.copy_node(child);
            self.append_child(new_id, new_child);
        }
        new_id
    }

    /// Returns the total number of nodes in the arena, detached ones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

// --- Iterators ---

/// Iterator over the children of a node.
pub struct Children<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).next_sibling;
        Some(current)
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.node(current).parent;
        Some(current)
    }
}

/// Depth-first iterator over all descendants of a node.
pub struct Descendants<'a> {
    doc: &'a Document,
    root: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        if let Some(child) = self.doc.first_child(current) {
            self.next = Some(child);
            return Some(current);
        }

        let mut node = current;
        loop {
            if node == self.root {
                self.next = None;
                break;
            }
            if let Some(sibling) = self.doc.next_sibling(node) {
                self.next = Some(sibling);
                break;
            }
            match self.doc.parent(node) {
                Some(parent) => node = parent,
                None => {
                    self.next = None;
                    break;
                }
            }
        }
        Some(current)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn text(doc: &mut Document, s: &str) -> NodeId {
        doc.create_node(NodeKind::Text {
            content: s.to_string(),
        })
    }

    fn element(doc: &mut Document, name: &str) -> NodeId {
        doc.create_node(NodeKind::Element {
            name: name.to_string(),
            prefix: None,
            namespace: None,
            attributes: vec![],
        })
    }

    #[test]
    fn test_new_document_has_root() {
        let doc = Document::new();
        assert!(matches!(doc.node(doc.root()).kind, NodeKind::Document));
        assert_eq!(doc.node_count(), 1);
        assert_eq!(doc.root_element(), None);
    }

    #[test]
    fn test_append_and_navigate() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = element(&mut doc, "a");
        let b = element(&mut doc, "b");
        doc.append_child(root, a);
        doc.append_child(root, b);

        assert_eq!(doc.first_child(root), Some(a));
        assert_eq!(doc.last_child(root), Some(b));
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.node(b).prev_sibling, Some(a));
        assert_eq!(doc.parent(b), Some(root));
        assert_eq!(doc.root_element(), Some(a));
    }

    #[test]
    fn test_insert_before_first_child() {
        let mut doc = Document::new();
        let root = doc.root();
        let b = text(&mut doc, "B");
        doc.append_child(root, b);
        let a = text(&mut doc, "A");
        doc.insert_before(b, a);

        assert_eq!(doc.first_child(root), Some(a));
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.text_content(root), "AB");
    }

    #[test]
    fn test_detach_middle_child() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = text(&mut doc, "A");
        let b = element(&mut doc, "b");
        let c = text(&mut doc, "C");
        doc.append_child(root, a);
        doc.append_child(root, b);
        doc.append_child(root, c);

        doc.detach(b);

        let children: Vec<NodeId> = doc.children(root).collect();
        assert_eq!(children, vec![a, c]);
        assert_eq!(doc.parent(b), None);
        assert_eq!(doc.node(c).prev_sibling, Some(a));
    }

    #[test]
    fn test_detach_without_parent_is_noop() {
        let mut doc = Document::new();
        let a = text(&mut doc, "A");
        doc.detach(a);
        assert_eq!(doc.parent(a), None);
    }

    #[test]
    fn test_append_text_merges_adjacent_text() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = element(&mut doc, "p");
        doc.append_child(root, p);
        doc.append_text(p, "Hello, ");
        doc.append_text(p, "world");
        doc.append_text(p, "");

        assert_eq!(doc.children(p).count(), 1);
        assert_eq!(doc.text_content(p), "Hello, world");
    }

    #[test]
    fn test_descendants_stops_at_subtree() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = element(&mut doc, "a");
        let a1 = element(&mut doc, "a1");
        let b = element(&mut doc, "b");
        doc.append_child(root, a);
        doc.append_child(a, a1);
        doc.append_child(root, b);

        let under_a: Vec<NodeId> = doc.descendants(a).collect();
        assert_eq!(under_a, vec![a1]);
        let all: Vec<NodeId> = doc.descendants(root).collect();
        assert_eq!(all, vec![a, a1, b]);
    }

    #[test]
    fn test_ancestors_walk_to_document() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = element(&mut doc, "a");
        let t = text(&mut doc, "x");
        doc.append_child(root, a);
        doc.append_child(a, t);

        let chain: Vec<NodeId> = doc.ancestors(t).collect();
        assert_eq!(chain, vec![t, a, root]);
    }

    #[test]
    fn test_element_by_id_matches_plain_and_xml_id() {
        let doc = Document::parse_str(
            r#"<r><a id="first"/><b xml:id="second"/></r>"#,
        )
        .unwrap();
        let first = doc.element_by_id("first").unwrap();
        let second = doc.element_by_id("second").unwrap();
        assert_eq!(doc.node_name(first), Some("a"));
        assert_eq!(doc.node_name(second), Some("b"));
        assert_eq!(doc.element_by_id("third"), None);
    }

    #[test]
    fn test_import_node_copies_subtree() {
        let source = Document::parse_str("<v><term>x</term><listitem/></v>").unwrap();
        let mut target = Document::new();
        let copy = target.import_node(&source, source.root_element().unwrap());
        let root = target.root();
        target.append_child(root, copy);

        assert_eq!(target.node_name(copy), Some("v"));
        assert_eq!(target.children(copy).count(), 2);
        assert_eq!(target.text_content(copy), "x");
    }

    #[test]
    fn test_copy_node_is_independent() {
        let mut doc = Document::parse_str("<r><a>t</a></r>").unwrap();
        let r = doc.root_element().unwrap();
        let a = doc.first_child(r).unwrap();
        let copy = doc.copy_node(a);
        doc.append_child(r, copy);
        doc.append_text(copy, "u");

        assert_eq!(doc.text_content(a), "t");
        assert_eq!(doc.text_content(copy), "tu");
    }
}
