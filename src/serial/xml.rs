//! XML serializer.
//!
//! Writes a `Document` back out as UTF-8 XML text. Output always starts with
//! an XML declaration naming UTF-8, whatever encoding the source used, and
//! ends with a newline. Each top-level node (DOCTYPE, comments, the root
//! element) goes on its own line.

use std::fmt::Write;

use crate::tree::{Attribute, Document, NodeId, NodeKind};

/// Options controlling XML serialization output.
///
/// # Examples
///
/// ```
/// use manxml::Document;
/// use manxml::serial::{serialize_with_options, SerializeOptions};
///
/// let doc = Document::parse_str("<refentry><refnamediv/></refentry>").unwrap();
/// let xml = serialize_with_options(&doc, &SerializeOptions::default().indent(false));
/// assert!(xml.contains("<refentry><refnamediv/></refentry>"));
/// ```
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Whether to pretty-print element-only content. Defaults to `true`.
    pub indent: bool,
    /// The indentation string for each level. Defaults to two spaces.
    pub indent_str: String,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            indent: true,
            indent_str: "  ".to_string(),
        }
    }
}

impl SerializeOptions {
    /// Enables or disables indented output.
    ///
    /// Only elements whose children are elements (plus whitespace) are
    /// re-indented; mixed content is written exactly as parsed.
    #[must_use]
    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    /// Sets the indentation string used for each nesting level.
    #[must_use]
    pub fn indent_str(mut self, s: &str) -> Self {
        self.indent_str = s.to_string();
        self
    }
}

/// Serializes a document to a pretty-printed XML string.
#[must_use]
pub fn serialize(doc: &Document) -> String {
    serialize_with_options(doc, &SerializeOptions::default())
}

/// Renders a document as pretty-printed UTF-8 bytes.
///
/// # Examples
///
/// ```
/// use manxml::{render, Document};
///
/// let doc = Document::parse_str("<refentry><refnamediv/></refentry>").unwrap();
/// assert_eq!(
///     render(&doc),
///     b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<refentry>\n  <refnamediv/>\n</refentry>\n"
/// );
/// ```
#[must_use]
pub fn render(doc: &Document) -> Vec<u8> {
    serialize(doc).into_bytes()
}

/// Serializes a document to an XML string with the given options.
#[must_use]
pub fn serialize_with_options(doc: &Document, options: &SerializeOptions) -> String {
    let mut writer = XmlWriter {
        doc,
        options,
        out: String::with_capacity(doc.node_count() * 16),
    };

    let version = doc.version.as_deref().unwrap_or("1.0");
    let _ = write!(writer.out, "<?xml version=\"{version}\" encoding=\"UTF-8\"");
    if let Some(standalone) = doc.standalone {
        writer.out.push_str(if standalone {
            " standalone=\"yes\""
        } else {
            " standalone=\"no\""
        });
    }
    writer.out.push_str("?>\n");

    for child in doc.children(doc.root()) {
        writer.write_node(child, 0, true);
        writer.out.push('\n');
    }
    writer.out
}

/// Returns `true` if the element has element children and no text other
/// than whitespace, so indentation can be added without changing content.
fn is_element_only(doc: &Document, id: NodeId) -> bool {
    let mut has_element_child = false;
    for child in doc.children(id) {
        match &doc.node(child).kind {
            NodeKind::Element { .. } => has_element_child = true,
            NodeKind::Text { content } if !content.trim().is_empty() => return false,
            NodeKind::CData { .. } | NodeKind::EntityRef { .. } => return false,
            _ => {}
        }
    }
    has_element_child
}

struct XmlWriter<'a> {
    doc: &'a Document,
    options: &'a SerializeOptions,
    out: String,
}

impl XmlWriter<'_> {
    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str(&self.options.indent_str);
        }
    }

    /// Writes one node. `pretty` is set when the parent is element-only and
    /// indentation is on: the node then owns its line.
    fn node(&mut self, id: NodeId, depth: usize, pretty: bool) {
        if pretty {
            self.indent(depth);
        }
        self.write_node(id, depth, pretty);
        if pretty {
            self.out.push('\n');
        }
    }

    /// Writes one node without surrounding layout. Element content is only
    /// re-indented when the element starts its own line.
    fn write_node(&mut self, id: NodeId, depth: usize, own_line: bool) {
        let doc = self.doc;
        match &doc.node(id).kind {
            NodeKind::Element {
                name,
                prefix,
                attributes,
                ..
            } => self.element(id, prefix.as_deref(), name, attributes, depth, own_line),
            NodeKind::Text { content } => write_escaped_text(&mut self.out, content),
            NodeKind::CData { content } => {
                let _ = write!(self.out, "<![CDATA[{content}]]>");
            }
            NodeKind::Comment { content } => {
                let _ = write!(self.out, "<!--{content}-->");
            }
            NodeKind::ProcessingInstruction { target, data } => match data {
                Some(d) => {
                    let _ = write!(self.out, "<?{target} {d}?>");
                }
                None => {
                    let _ = write!(self.out, "<?{target}?>");
                }
            },
            NodeKind::EntityRef { name } => {
                let _ = write!(self.out, "&{name};");
            }
            NodeKind::DocumentType {
                name,
                system_id,
                public_id,
                internal_subset,
            } => {
                let _ = write!(self.out, "<!DOCTYPE {name}");
                match (public_id, system_id) {
                    (Some(public_id), Some(system_id)) => {
                        let _ = write!(self.out, " PUBLIC \"{public_id}\" \"{system_id}\"");
                    }
                    (None, Some(system_id)) => {
                        let _ = write!(self.out, " SYSTEM \"{system_id}\"");
                    }
                    _ => {}
                }
                if let Some(subset) = internal_subset {
                    let _ = write!(self.out, " [{subset}]");
                }
                self.out.push('>');
            }
            NodeKind::Document => {}
        }
    }

    fn element(
        &mut self,
        id: NodeId,
        prefix: Option<&str>,
        name: &str,
        attributes: &[Attribute],
        depth: usize,
        own_line: bool,
    ) {
        let doc = self.doc;
        self.out.push('<');
        write_qname(&mut self.out, prefix, name);
        for attr in attributes {
            self.out.push(' ');
            write_qname(&mut self.out, attr.prefix.as_deref(), &attr.name);
            self.out.push_str("=\"");
            write_escaped_attr(&mut self.out, &attr.value);
            self.out.push('"');
        }

        if doc.first_child(id).is_none() {
            self.out.push_str("/>");
            return;
        }
        self.out.push('>');

        let element_only = own_line && self.options.indent && is_element_only(doc, id);
        if element_only {
            self.out.push('\n');
        }
        for child in doc.children(id) {
            if element_only
                && matches!(&doc.node(child).kind, NodeKind::Text { content } if content.trim().is_empty())
            {
                continue;
            }
            self.node(child, depth + 1, element_only);
        }
        if element_only {
            self.indent(depth);
        }
        self.out.push_str("</");
        write_qname(&mut self.out, prefix, name);
        self.out.push('>');
    }
}

fn write_qname(out: &mut String, prefix: Option<&str>, name: &str) {
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(name);
}

fn write_hex_char_ref(out: &mut String, ch: char) {
    let _ = write!(out, "&#x{:X};", ch as u32);
}

/// Escapes character data. `\r` is written as a reference so it survives
/// re-parsing; other control characters cannot appear in a parsed tree but
/// are hex-encoded if a caller built them.
fn write_escaped_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            '\t' | '\n' => out.push(ch),
            c if (c as u32) < 0x20 => write_hex_char_ref(out, c),
            c => out.push(c),
        }
    }
}

/// Escapes an attribute value for a double-quoted literal. Whitespace other
/// than the space is written as character references, otherwise attribute
/// value normalization would turn it into spaces on the next parse.
fn write_escaped_attr(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            c if (c as u32) < 0x20 => write_hex_char_ref(out, c),
            c => out.push(c),
        }
    }
}
