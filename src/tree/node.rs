//! Node type definitions.
//!
//! The `NodeKind` enum carries the per-type payload of a node. Navigation
//! links (parent, children, siblings) live in `NodeData`, not here.

use super::Attribute;

/// The kind of an XML node and its associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The document node. There is exactly one per `Document`.
    Document,

    /// An element node, e.g. `<refentry id="x">`.
    Element {
        /// The element's local name.
        name: String,
        /// Namespace prefix (e.g. `"xi"` in `xi:include`), if any.
        prefix: Option<String>,
        /// Namespace URI after resolution, if any.
        namespace: Option<String>,
        /// Attributes on this element, in document order.
        attributes: Vec<Attribute>,
    },

    /// Character data, with references already decoded.
    Text {
        /// The text content.
        content: String,
    },

    /// A CDATA section.
    CData {
        /// The raw section content.
        content: String,
    },

    /// A comment, without the `<!--` and `-->` delimiters.
    Comment {
        /// The comment text.
        content: String,
    },

    /// A processing instruction, e.g. `<?xml-stylesheet href="a"?>`.
    ProcessingInstruction {
        /// The PI target.
        target: String,
        /// The PI data, if any.
        data: Option<String>,
    },

    /// A general entity reference the parser could not expand because its
    /// declaration may live in an unread external DTD subset.
    EntityRef {
        /// The entity name (without `&` and `;`).
        name: String,
    },

    /// The document type declaration.
    DocumentType {
        /// The root element name declared in the DOCTYPE.
        name: String,
        /// The SYSTEM identifier, if any.
        system_id: Option<String>,
        /// The PUBLIC identifier, if any.
        public_id: Option<String>,
        /// The internal subset text between `[` and `]`, kept verbatim.
        internal_subset: Option<String>,
    },
}

impl NodeKind {
    /// Returns `true` for element nodes.
    #[must_use]
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }
}
