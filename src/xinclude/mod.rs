//! `XInclude` 1.0 processing.
//!
//! `XInclude` processing replaces `<xi:include>` elements (in the
//! `http://www.w3.org/2001/XInclude` namespace) with the content they
//! reference. The `href` attribute names the resource, `parse` selects
//! whether it is included as parsed XML (`parse="xml"`, the default) or as
//! a text node (`parse="text"`), and `xpointer` (or an `href` fragment)
//! selects part of an XML resource.
//!
//! If a resource cannot be resolved, the processor looks for an
//! `<xi:fallback>` child and uses its content instead. If no fallback is
//! provided, the include is recorded as an error and processing continues.
//!
//! # Design
//!
//! The processor does not perform I/O. The caller provides a resolver
//! callback that maps an [`IncludeRequest`] to an [`IncludeSource`]. Each
//! request carries the location of the document that contains the include,
//! so relative references inside included documents can be resolved against
//! their own directory.
//!
//! `xml:base` attributes are not added to included content.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::encoding::{decode_to_utf8, transcode};
use crate::parser::{parse_str_with_options, ParseOptions};
use crate::tree::{Attribute, Document, NodeId, NodeKind, XMLNS_NAMESPACE};

/// The `XInclude` namespace URI.
pub const XINCLUDE_NS: &str = "http://www.w3.org/2001/XInclude";

const INCLUDE_ELEMENT: &str = "include";
const FALLBACK_ELEMENT: &str = "fallback";

/// How an included resource is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Parsed as XML; its nodes replace the include element.
    Xml,
    /// Included verbatim as a single text node.
    Text,
}

/// A resource requested by an `xi:include` element.
#[derive(Debug, Clone, Copy)]
pub struct IncludeRequest<'a> {
    /// The `href` attribute with any fragment removed.
    pub href: &'a str,
    /// Location of the document containing the include element.
    pub base: Option<&'a Path>,
    /// The `parse` attribute.
    pub parse: ParseMode,
}

/// The content returned by a resolver.
#[derive(Debug, Clone, Default)]
pub struct IncludeSource {
    /// Raw resource bytes.
    pub content: Vec<u8>,
    /// Where the resource was found. Becomes the base for includes and
    /// external entities inside it.
    pub location: Option<PathBuf>,
}

impl IncludeSource {
    /// Creates an in-memory source with no location.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: text.into().into_bytes(),
            location: None,
        }
    }
}

/// Options for `XInclude` processing.
///
/// # Examples
///
/// ```
/// use manxml::xinclude::XIncludeOptions;
///
/// let opts = XIncludeOptions::default();
/// assert_eq!(opts.max_depth, 50);
/// ```
#[derive(Debug, Clone)]
pub struct XIncludeOptions {
    /// Maximum nesting depth for recursive includes. The default is 50.
    pub max_depth: usize,
    /// Options used to parse included XML resources. The base URL is
    /// replaced by each resource's own location.
    pub parse_options: ParseOptions,
}

impl Default for XIncludeOptions {
    fn default() -> Self {
        Self {
            max_depth: 50,
            parse_options: ParseOptions::default(),
        }
    }
}

impl XIncludeOptions {
    /// Sets the maximum include nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }

    /// Sets the options used to parse included documents.
    #[must_use]
    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }
}

/// An error encountered during `XInclude` processing.
///
/// Errors are collected rather than stopping processing, so that as many
/// includes as possible are resolved even when some fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XIncludeError {
    /// Human-readable description of the error.
    pub message: String,
    /// The `href` that caused the error, if applicable.
    pub href: Option<String>,
}

impl XIncludeError {
    fn new(message: impl Into<String>, href: Option<&str>) -> Self {
        Self {
            message: message.into(),
            href: href.map(str::to_owned),
        }
    }
}

impl fmt::Display for XIncludeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.href {
            Some(href) => write!(f, "XInclude error for '{href}': {}", self.message),
            None => write!(f, "XInclude error: {}", self.message),
        }
    }
}

impl std::error::Error for XIncludeError {}

/// Result of `XInclude` processing.
#[derive(Debug, Default)]
pub struct XIncludeResult {
    /// Number of includes that were successfully processed.
    pub inclusions: usize,
    /// Errors encountered during processing, one per include element that
    /// could not be resolved and had no usable `xi:fallback`.
    pub errors: Vec<XIncludeError>,
}

/// Processes `XInclude` elements in a document.
///
/// Include elements are replaced in place. Content pulled in by an include
/// is itself processed, with relative references resolved against the
/// location its resolver reported.
///
/// # Examples
///
/// ```
/// use manxml::Document;
/// use manxml::xinclude::{process_xincludes, IncludeSource, XIncludeOptions};
///
/// let xml = r#"<refsect1 xmlns:xi="http://www.w3.org/2001/XInclude">
///   <xi:include href="standard-options.xml" xpointer="help"/>
/// </refsect1>"#;
///
/// let mut doc = Document::parse_str(xml).unwrap();
/// let result = process_xincludes(&mut doc, |req| {
///     (req.href == "standard-options.xml").then(|| {
///         IncludeSource::from_text(r#"<variablelist><varlistentry id="help"/></variablelist>"#)
///     })
/// }, &XIncludeOptions::default());
///
/// assert_eq!(result.inclusions, 1);
/// assert!(result.errors.is_empty());
/// ```
pub fn process_xincludes<F>(doc: &mut Document, resolver: F, options: &XIncludeOptions) -> XIncludeResult
where
    F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
{
    let mut state = ProcessingState {
        inclusions: 0,
        errors: Vec::new(),
        active: HashSet::new(),
        options,
    };
    let base = doc.url.clone();
    if let Some(base) = &base {
        state.active.insert(base.display().to_string());
    }

    let root = doc.root();
    process_node(doc, root, &resolver, &mut state, 0, base.as_deref());

    XIncludeResult {
        inclusions: state.inclusions,
        errors: state.errors,
    }
}

struct ProcessingState<'o> {
    inclusions: usize,
    errors: Vec<XIncludeError>,
    /// Resources in the current inclusion chain, for cycle detection.
    active: HashSet<String>,
    options: &'o XIncludeOptions,
}

fn process_node<F>(
    doc: &mut Document,
    node: NodeId,
    resolver: &F,
    state: &mut ProcessingState<'_>,
    depth: usize,
    base: Option<&Path>,
) where
    F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
{
    // Collect children first, the loop rewires the tree.
    let children: Vec<NodeId> = doc.children(node).collect();
    for child in children {
        if is_xinclude_element(doc, child, INCLUDE_ELEMENT) {
            process_include_element(doc, child, resolver, state, depth, base);
        } else {
            process_node(doc, child, resolver, state, depth, base);
        }
    }
}

fn is_xinclude_element(doc: &Document, node: NodeId, local: &str) -> bool {
    matches!(
        &doc.node(node).kind,
        NodeKind::Element { name, namespace, .. }
            if name == local && namespace.as_deref() == Some(XINCLUDE_NS)
    )
}

fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (href, None),
    }
}

#[allow(clippy::too_many_lines)]
fn process_include_element<F>(
    doc: &mut Document,
    include_node: NodeId,
    resolver: &F,
    state: &mut ProcessingState<'_>,
    depth: usize,
    base: Option<&Path>,
) where
    F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
{
    let href = doc.attribute(include_node, "href").unwrap_or("").to_owned();
    let parse = doc.attribute(include_node, "parse").unwrap_or("xml").to_owned();
    let encoding = doc.attribute(include_node, "encoding").map(str::to_owned);
    let (resource, fragment) = split_fragment(&href);
    let xpointer = doc
        .attribute(include_node, "xpointer")
        .or(fragment)
        .map(str::to_owned);
    let href_ref = (!href.is_empty()).then_some(href.as_str());

    let mode = match parse.as_str() {
        "xml" => ParseMode::Xml,
        "text" => ParseMode::Text,
        other => {
            fail(doc, include_node, state, XIncludeError::new(
                format!("invalid parse attribute value '{other}'; expected 'xml' or 'text'"),
                href_ref,
            ));
            return;
        }
    };

    if resource.is_empty() && xpointer.is_none() {
        fail(doc, include_node, state, XIncludeError::new(
            "xi:include element has neither 'href' nor 'xpointer'",
            None,
        ));
        return;
    }
    if mode == ParseMode::Text && xpointer.is_some() {
        fail(doc, include_node, state, XIncludeError::new(
            "xpointer is not allowed with parse=\"text\"",
            href_ref,
        ));
        return;
    }
    if depth >= state.options.max_depth {
        fail(doc, include_node, state, XIncludeError::new(
            format!("maximum XInclude nesting depth ({}) exceeded", state.options.max_depth),
            href_ref,
        ));
        return;
    }

    if resource.is_empty() {
        // Same-document reference.
        let pointer = xpointer.as_deref().unwrap_or_default();
        match resolve_xpointer(doc, pointer) {
            Some(target) if doc.ancestors(include_node).any(|n| n == target) => {
                fail(doc, include_node, state, XIncludeError::new(
                    format!("inclusion loop: '{pointer}' contains the include element"),
                    href_ref,
                ));
            }
            Some(target) => {
                let copy = doc.copy_node(target);
                replace_include(doc, include_node, &[copy]);
                state.inclusions += 1;
                process_node_and_self(doc, copy, resolver, state, depth + 1, base);
            }
            None => {
                let err = XIncludeError::new(format!("XPointer '{pointer}' selects nothing"), href_ref);
                fallback_or_fail(doc, include_node, resolver, state, depth, base, err);
            }
        }
        return;
    }

    let request = IncludeRequest {
        href: resource,
        base,
        parse: mode,
    };
    let Some(source) = resolver(request) else {
        let err = XIncludeError::new("could not load resource", href_ref);
        fallback_or_fail(doc, include_node, resolver, state, depth, base, err);
        return;
    };
    debug!(href = resource, location = ?source.location, "including");

    match mode {
        ParseMode::Text => {
            let text = match &encoding {
                Some(label) => transcode(&source.content, label),
                None => decode_to_utf8(&source.content),
            };
            match text {
                Ok(content) => {
                    let node = doc.create_node(NodeKind::Text { content });
                    replace_include(doc, include_node, &[node]);
                    state.inclusions += 1;
                }
                Err(e) => {
                    let err = XIncludeError::new(e.to_string(), href_ref);
                    fallback_or_fail(doc, include_node, resolver, state, depth, base, err);
                }
            }
        }
        ParseMode::Xml => {
            let key = source
                .location
                .as_ref()
                .map_or_else(|| resource.to_owned(), |p| p.display().to_string());
            if state.active.contains(&key) && xpointer.is_none() {
                fail(doc, include_node, state, XIncludeError::new(
                    "circular inclusion detected",
                    href_ref,
                ));
                return;
            }

            let included = decode_to_utf8(&source.content)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    let mut options = state.options.parse_options.clone();
                    options.base_url.clone_from(&source.location);
                    parse_str_with_options(&text, &options)
                        .map_err(|e| format!("failed to parse included XML: {e}"))
                });
            let mut included = match included {
                Ok(d) => d,
                Err(message) => {
                    let err = XIncludeError::new(message, href_ref);
                    fallback_or_fail(doc, include_node, resolver, state, depth, base, err);
                    return;
                }
            };

            // Expand the resource's own includes first, so same-document
            // references inside it see its own tree.
            let inserted_key = state.active.insert(key.clone());
            let included_base = source.location.clone();
            let root = included.root();
            process_node(&mut included, root, resolver, state, depth + 1, included_base.as_deref());
            if inserted_key {
                state.active.remove(&key);
            }

            let selected: Vec<NodeId> = match &xpointer {
                Some(pointer) => match resolve_xpointer(&included, pointer) {
                    Some(target) => vec![target],
                    None => {
                        let err = XIncludeError::new(
                            format!("XPointer '{pointer}' selects nothing"),
                            href_ref,
                        );
                        fallback_or_fail(doc, include_node, resolver, state, depth, base, err);
                        return;
                    }
                },
                None => included
                    .children(root)
                    .filter(|&n| !matches!(included.node(n).kind, NodeKind::DocumentType { .. }))
                    .collect(),
            };

            let copies: Vec<NodeId> = selected
                .into_iter()
                .map(|n| {
                    let copy = doc.import_node(&included, n);
                    declare_inherited_namespaces(&included, n, doc, copy);
                    copy
                })
                .collect();
            replace_include(doc, include_node, &copies);
            if let Some(parent) = doc.parent(copies.first().copied().unwrap_or(include_node)) {
                for &copy in &copies {
                    reconcile_namespaces(doc, parent, copy);
                }
            }
            state.inclusions += 1;
        }
    }
}

/// Replaces the include element with `nodes`, in order.
fn replace_include(doc: &mut Document, include_node: NodeId, nodes: &[NodeId]) {
    for &node in nodes {
        doc.insert_before(include_node, node);
    }
    doc.detach(include_node);
}

fn fail(doc: &mut Document, include_node: NodeId, state: &mut ProcessingState<'_>, err: XIncludeError) {
    debug!(%err, "include failed");
    state.errors.push(err);
    doc.detach(include_node);
}

fn process_node_and_self<F>(
    doc: &mut Document,
    node: NodeId,
    resolver: &F,
    state: &mut ProcessingState<'_>,
    depth: usize,
    base: Option<&Path>,
) where
    F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
{
    if is_xinclude_element(doc, node, INCLUDE_ELEMENT) {
        process_include_element(doc, node, resolver, state, depth, base);
    } else {
        process_node(doc, node, resolver, state, depth, base);
    }
}

/// Replaces the include element by the content of its `xi:fallback` child,
/// or records `err` if there is none.
fn fallback_or_fail<F>(
    doc: &mut Document,
    include_node: NodeId,
    resolver: &F,
    state: &mut ProcessingState<'_>,
    depth: usize,
    base: Option<&Path>,
    err: XIncludeError,
) where
    F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
{
    let fallback = doc
        .children(include_node)
        .find(|&child| is_xinclude_element(doc, child, FALLBACK_ELEMENT));
    let Some(fallback) = fallback else {
        fail(doc, include_node, state, err);
        return;
    };
    debug!(%err, "using xi:fallback");

    let fallback_children: Vec<NodeId> = doc.children(fallback).collect();
    for &child in &fallback_children {
        doc.detach(child);
        doc.insert_before(include_node, child);
    }
    doc.detach(include_node);

    for child in fallback_children {
        process_node_and_self(doc, child, resolver, state, depth + 1, base);
    }
}

// ---------------------------------------------------------------------------
// XPointer
// ---------------------------------------------------------------------------

/// Evaluates an XPointer against `doc`: a shorthand pointer (a bare id) or
/// one or more scheme parts, of which only `element()` is understood. The
/// first scheme part that selects an element wins.
fn resolve_xpointer(doc: &Document, pointer: &str) -> Option<NodeId> {
    let pointer = pointer.trim();
    if !pointer.contains('(') {
        return doc.element_by_id(pointer);
    }

    let mut rest = pointer;
    while let Some(open) = rest.find('(') {
        let scheme = rest[..open].trim();
        let close = rest[open..].find(')')? + open;
        let data = &rest[open + 1..close];
        if scheme == "element" {
            if let Some(found) = element_scheme(doc, data) {
                return Some(found);
            }
        } else {
            debug!(scheme, "unsupported XPointer scheme");
        }
        rest = &rest[close + 1..];
    }
    None
}

/// `element(id/1/2)` or `element(/1/2)`: an optional id followed by a
/// child sequence of 1-based element positions.
fn element_scheme(doc: &Document, data: &str) -> Option<NodeId> {
    let mut steps = data.split('/');
    let first = steps.next()?;
    let mut current = if first.is_empty() {
        doc.root()
    } else {
        doc.element_by_id(first)?
    };
    for step in steps {
        let n: usize = step.parse().ok()?;
        current = doc
            .children(current)
            .filter(|&c| doc.node(c).kind.is_element())
            .nth(n.checked_sub(1)?)?;
    }
    (current != doc.root()).then_some(current)
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// The namespace declared for `prefix` on `node`, if any.
fn declaration(doc: &Document, node: NodeId, prefix: Option<&str>) -> Option<String> {
    doc.attributes(node)
        .iter()
        .find(|a| match prefix {
            None => a.prefix.is_none() && a.name == "xmlns",
            Some(p) => a.prefix.as_deref() == Some("xmlns") && a.name == p,
        })
        .map(|a| a.value.clone())
}

/// The nearest declaration of `prefix` on `from` or its ancestors.
fn in_scope(doc: &Document, from: NodeId, prefix: Option<&str>) -> Option<String> {
    doc.ancestors(from).find_map(|n| declaration(doc, n, prefix))
}

/// Namespace bindings used by `node`'s element and attribute names.
fn used_bindings(doc: &Document, node: NodeId) -> Vec<(Option<String>, Option<String>)> {
    let NodeKind::Element {
        prefix,
        namespace,
        attributes,
        ..
    } = &doc.node(node).kind
    else {
        return Vec::new();
    };
    let mut used = vec![(prefix.clone(), namespace.clone())];
    used.extend(
        attributes
            .iter()
            .filter(|a| !a.is_namespace_decl() && a.prefix.as_deref().is_some_and(|p| p != "xml"))
            .map(|a| (a.prefix.clone(), a.namespace.clone())),
    );
    used
}

fn namespace_decl(prefix: Option<&str>, uri: &str) -> Attribute {
    match prefix {
        Some(p) => Attribute {
            name: p.to_string(),
            value: uri.to_string(),
            prefix: Some("xmlns".to_string()),
            namespace: Some(XMLNS_NAMESPACE.to_string()),
        },
        None => Attribute {
            name: "xmlns".to_string(),
            value: uri.to_string(),
            prefix: None,
            namespace: Some(XMLNS_NAMESPACE.to_string()),
        },
    }
}

fn add_declarations(doc: &mut Document, node: NodeId, decls: Vec<Attribute>) {
    if let NodeKind::Element { attributes, .. } = &mut doc.node_mut(node).kind {
        attributes.extend(decls);
    }
}

/// Copies onto `copy` the declarations `source_node` inherited from its
/// ancestors in `source`, so an element selected out of another document
/// keeps its bindings.
fn declare_inherited_namespaces(source: &Document, source_node: NodeId, doc: &mut Document, copy: NodeId) {
    let mut seen: HashSet<Option<String>> = doc
        .attributes(copy)
        .iter()
        .filter(|a| a.is_namespace_decl())
        .map(|a| a.prefix.is_some().then(|| a.name.clone()))
        .collect();
    let mut decls = Vec::new();
    for ancestor in source.ancestors(source_node).skip(1) {
        for attr in source.attributes(ancestor).iter().filter(|a| a.is_namespace_decl()) {
            let prefix = attr.prefix.is_some().then(|| attr.name.clone());
            if seen.insert(prefix.clone()) {
                decls.push(namespace_decl(prefix.as_deref(), &attr.value));
            }
        }
    }
    add_declarations(doc, copy, decls);
}

/// After `node` is attached under `parent`, adds declarations to `node` for
/// any binding its subtree uses that is not in scope, and drops inherited
/// declarations that are now redundant.
fn reconcile_namespaces(doc: &mut Document, parent: NodeId, node: NodeId) {
    let mut missing: HashMap<Option<String>, String> = HashMap::new();
    let subtree: Vec<NodeId> = std::iter::once(node).chain(doc.descendants(node)).collect();
    for element in subtree {
        for (prefix, namespace) in used_bindings(doc, element) {
            if prefix.as_deref() == Some("xml") {
                continue;
            }
            let bound = in_scope(doc, element, prefix.as_deref())
                .or_else(|| missing.get(&prefix).cloned())
                .filter(|uri| !uri.is_empty());
            if bound == namespace {
                continue;
            }
            match namespace {
                Some(uri) => {
                    missing.insert(prefix, uri);
                }
                None if prefix.is_none() => {
                    missing.insert(None, String::new());
                }
                None => {}
            }
        }
    }

    // Inherited declarations identical to the ones in scope at the new
    // parent add nothing.
    let redundant: Vec<usize> = doc
        .attributes(node)
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_namespace_decl())
        .filter(|(_, a)| {
            let prefix = a.prefix.is_some().then_some(a.name.as_str());
            in_scope(doc, parent, prefix).unwrap_or_default() == a.value
        })
        .map(|(i, _)| i)
        .collect();
    if let NodeKind::Element { attributes, .. } = &mut doc.node_mut(node).kind {
        for i in redundant.into_iter().rev() {
            attributes.remove(i);
        }
    }

    let mut decls: Vec<Attribute> = missing
        .into_iter()
        .map(|(prefix, uri)| namespace_decl(prefix.as_deref(), &uri))
        .collect();
    decls.sort_by(|a, b| a.name.cmp(&b.name));
    add_declarations(doc, node, decls);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const XI: &str = r#"xmlns:xi="http://www.w3.org/2001/XInclude""#;

    fn process<F>(xml: &str, resolver: F) -> (Document, XIncludeResult)
    where
        F: Fn(IncludeRequest<'_>) -> Option<IncludeSource>,
    {
        let mut doc = Document::parse_str(xml).unwrap();
        let result = process_xincludes(&mut doc, resolver, &XIncludeOptions::default());
        (doc, result)
    }

    fn child_names(doc: &Document, node: NodeId) -> Vec<String> {
        doc.children(node)
            .filter_map(|c| doc.node_name(c).map(str::to_owned))
            .collect()
    }

    #[test]
    fn test_basic_xml_include() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="a.xml"/></doc>"#),
            |req| (req.href == "a.xml").then(|| IncludeSource::from_text("<hello>world</hello>")),
        );
        assert_eq!(result.inclusions, 1);
        assert!(result.errors.is_empty());
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["hello"]);
        assert_eq!(doc.text_content(root), "world");
    }

    #[test]
    fn test_included_doctype_is_dropped() {
        let (doc, _) = process(
            &format!(r#"<doc {XI}><xi:include href="a.xml"/></doc>"#),
            |_| Some(IncludeSource::from_text("<!DOCTYPE v [<!ENTITY x 'y'>]><!--c--><v>&x;</v>")),
        );
        let root = doc.root_element().unwrap();
        let kinds: Vec<bool> = doc
            .children(root)
            .map(|c| matches!(doc.node(c).kind, NodeKind::Comment { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false]);
        assert_eq!(doc.text_content(root), "y");
    }

    #[test]
    fn test_text_include() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="t.txt" parse="text"/></doc>"#),
            |req| {
                assert_eq!(req.parse, ParseMode::Text);
                Some(IncludeSource::from_text("<not> markup"))
            },
        );
        assert_eq!(result.inclusions, 1);
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "<not> markup");
    }

    #[test]
    fn test_text_include_with_encoding() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="t.txt" parse="text" encoding="ISO-8859-1"/></doc>"#),
            |_| {
                Some(IncludeSource {
                    content: b"caf\xE9".to_vec(),
                    location: None,
                })
            },
        );
        assert!(result.errors.is_empty());
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "café");
    }

    #[test]
    fn test_xpointer_shorthand_and_fragment() {
        let source = r#"<variablelist><varlistentry id="help"><term>-h</term></varlistentry><varlistentry id="version"><term>--version</term></varlistentry></variablelist>"#;
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="opts.xml" xpointer="version"/><xi:include href="opts.xml#help"/></doc>"#),
            |_| Some(IncludeSource::from_text(source)),
        );
        assert_eq!(result.inclusions, 2);
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["varlistentry", "varlistentry"]);
        assert_eq!(doc.text_content(root), "--version-h");
    }

    #[test]
    fn test_xpointer_element_scheme() {
        let source = "<r><a/><b><c>deep</c></b></r>";
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="s.xml" xpointer="element(/1/2/1)"/></doc>"#),
            |_| Some(IncludeSource::from_text(source)),
        );
        assert!(result.errors.is_empty());
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["c"]);
    }

    #[test]
    fn test_xpointer_no_match_is_error() {
        let (_, result) = process(
            &format!(r#"<doc {XI}><xi:include href="s.xml" xpointer="nope"/></doc>"#),
            |_| Some(IncludeSource::from_text("<r/>")),
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("selects nothing"));
    }

    #[test]
    fn test_fallback_used_when_unresolved() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="missing.xml"><xi:fallback><p>fb</p></xi:fallback></xi:include></doc>"#),
            |_| None,
        );
        assert!(result.errors.is_empty());
        assert_eq!(result.inclusions, 0);
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["p"]);
    }

    #[test]
    fn test_missing_resource_without_fallback() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="missing.xml"/></doc>"#),
            |_| None,
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].href.as_deref(), Some("missing.xml"));
        assert_eq!(doc.children(doc.root_element().unwrap()).count(), 0);
    }

    #[test]
    fn test_invalid_parse_attribute() {
        let (_, result) = process(
            &format!(r#"<doc {XI}><xi:include href="a" parse="html"/></doc>"#),
            |_| Some(IncludeSource::from_text("<a/>")),
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("invalid parse attribute"));
    }

    #[test]
    fn test_parse_failure_falls_back() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="bad.xml"><xi:fallback>plain</xi:fallback></xi:include></doc>"#),
            |_| Some(IncludeSource::from_text("<unclosed>")),
        );
        assert!(result.errors.is_empty());
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "plain");
    }

    #[test]
    fn test_nested_includes_get_their_own_base() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><xi:include href="sub/a.xml"/></doc>"#),
            |req| match req.href {
                "sub/a.xml" => Some(IncludeSource {
                    content: format!(r#"<a {XI}><xi:include href="b.xml"/></a>"#).into_bytes(),
                    location: Some(PathBuf::from("/src/sub/a.xml")),
                }),
                "b.xml" => {
                    assert_eq!(req.base, Some(Path::new("/src/sub/a.xml")));
                    Some(IncludeSource::from_text("<b/>"))
                }
                _ => None,
            },
        );
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.inclusions, 2);
        let a = doc.first_child(doc.root_element().unwrap()).unwrap();
        assert_eq!(child_names(&doc, a), vec!["b"]);
    }

    #[test]
    fn test_circular_inclusion_detected() {
        let (_, result) = process(
            &format!(r#"<doc {XI}><xi:include href="loop.xml"/></doc>"#),
            |_| {
                Some(IncludeSource {
                    content: format!(r#"<l {XI}><xi:include href="loop.xml"/></l>"#).into_bytes(),
                    location: Some(PathBuf::from("/loop.xml")),
                })
            },
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("circular"));
    }

    #[test]
    fn test_depth_limit() {
        let mut doc = Document::parse_str(&format!(r#"<doc {XI}><xi:include href="0"/></doc>"#)).unwrap();
        let opts = XIncludeOptions::default().max_depth(3);
        let result = process_xincludes(
            &mut doc,
            |req| {
                let next: u32 = req.href.parse().unwrap();
                Some(IncludeSource {
                    content: format!(r#"<n {XI}><xi:include href="{}"/></n>"#, next + 1).into_bytes(),
                    location: Some(PathBuf::from(format!("/{next}.xml"))),
                })
            },
            &opts,
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("depth"));
    }

    #[test]
    fn test_same_document_include() {
        let (doc, result) = process(
            &format!(r#"<doc {XI}><s id="shared">x</s><xi:include xpointer="shared"/></doc>"#),
            |_| None,
        );
        assert!(result.errors.is_empty());
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["s", "s"]);
        assert_eq!(doc.text_content(root), "xx");
    }

    #[test]
    fn test_same_document_include_of_ancestor_is_loop() {
        let (_, result) = process(
            &format!(r#"<doc {XI} id="top"><xi:include xpointer="top"/></doc>"#),
            |_| None,
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("loop"));
    }

    #[test]
    fn test_selected_element_keeps_inherited_namespace() {
        let source = r#"<r xmlns:d="urn:d"><d:item id="x"/></r>"#;
        let (doc, _) = process(
            &format!(r#"<doc {XI}><xi:include href="s.xml" xpointer="x"/></doc>"#),
            |_| Some(IncludeSource::from_text(source)),
        );
        let item = doc.first_child(doc.root_element().unwrap()).unwrap();
        assert_eq!(doc.node_namespace(item), Some("urn:d"));
        assert_eq!(declaration(&doc, item, Some("d")).as_deref(), Some("urn:d"));
    }

    #[test]
    fn test_non_xinclude_namespace_is_left_alone() {
        let (doc, result) = process(
            r#"<doc xmlns:x="urn:other"><x:include href="a.xml"/></doc>"#,
            |_| Some(IncludeSource::from_text("<a/>")),
        );
        assert_eq!(result.inclusions, 0);
        let root = doc.root_element().unwrap();
        assert_eq!(child_names(&doc, root), vec!["include"]);
    }

    #[test]
    fn test_included_xml_uses_parse_options() {
        let mut doc = Document::parse_str(&format!(r#"<doc {XI}><xi:include href="e.xml"/></doc>"#)).unwrap();
        let opts = XIncludeOptions::default().parse_options(
            ParseOptions::default().entity_resolver(|_| Some("<!ENTITY v '257'>".to_string())),
        );
        let result = process_xincludes(
            &mut doc,
            |_| {
                Some(IncludeSource::from_text(
                    r#"<!DOCTYPE p [<!ENTITY % e SYSTEM "custom-entities.ent"> %e;]><p>&v;</p>"#,
                ))
            },
            &opts,
        );
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(doc.text_content(doc.root_element().unwrap()), "257");
    }
}
