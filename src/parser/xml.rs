//! Document parser: prolog, DOCTYPE, elements, content and references.

use tracing::debug;

use super::dtd::{self, DtdProcessor, EntityTable, EntityValue};
use super::input::{
    builtin_entity, normalize_newlines, parse_cdata, parse_comment, parse_pi, parse_xml_decl,
    split_name, strip_text_decl, ParserInput,
};
use super::{ExternalEntityRequest, ParseOptions};
use crate::error::ParseError;
use crate::tree::{Attribute, Document, NodeId, NodeKind, XMLNS_NAMESPACE, XML_NAMESPACE};

/// In-scope namespace bindings, one frame per open element.
#[derive(Default)]
struct NamespaceStack {
    scopes: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceStack {
    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, prefix: Option<&str>, uri: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((prefix.map(String::from), uri.to_string()));
        }
    }

    /// Resolves a prefix (`None` for the default namespace). An empty
    /// binding (`xmlns=""`) undeclares the default namespace.
    fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            Some("xml") => return Some(XML_NAMESPACE),
            Some("xmlns") => return Some(XMLNS_NAMESPACE),
            _ => {}
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .and_then(|(_, uri)| (!uri.is_empty()).then_some(uri.as_str()))
    }
}

pub(crate) struct XmlParser<'o> {
    options: &'o ParseOptions,
    doc: Document,
    entities: EntityTable,
    ns: NamespaceStack,
    has_external_subset: bool,
    depth: u32,
    expansions: u32,
    /// General entities currently being expanded.
    expanding: Vec<String>,
}

impl<'o> XmlParser<'o> {
    pub fn new(options: &'o ParseOptions) -> Self {
        Self {
            options,
            doc: Document::new(),
            entities: EntityTable::default(),
            ns: NamespaceStack::default(),
            has_external_subset: false,
            depth: 0,
            expansions: 0,
            expanding: Vec::new(),
        }
    }

    pub fn parse(mut self, text: &str) -> Result<Document, ParseError> {
        let mut input = ParserInput::new(text);

        let has_decl = text
            .strip_prefix("<?xml")
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_whitespace()));
        if has_decl {
            let decl = parse_xml_decl(&mut input)?;
            if decl.version.is_none() {
                return Err(input.fatal("XML declaration is missing the version"));
            }
            self.doc.version = decl.version;
            self.doc.encoding = decl.encoding;
            self.doc.standalone = decl.standalone;
        }

        let root = self.doc.root();
        self.parse_misc(&mut input, root)?;
        if input.looking_at(b"<!DOCTYPE") {
            self.parse_doctype(&mut input, root)?;
            self.parse_misc(&mut input, root)?;
        }

        if input.at_end() {
            return Err(input.fatal("document has no root element"));
        }
        if input.peek() != Some(b'<') || input.looking_at(b"</") || input.looking_at(b"<!") {
            return Err(input.fatal("start tag expected"));
        }
        self.parse_element(&mut input, root)?;
        self.parse_misc(&mut input, root)?;
        if !input.at_end() {
            return Err(input.fatal("extra content at the end of the document"));
        }

        self.doc.url.clone_from(&self.options.base_url);
        Ok(self.doc)
    }

    /// Comments, PIs and whitespace outside the root element.
    fn parse_misc(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        loop {
            input.skip_whitespace();
            if input.looking_at(b"<!--") {
                let content = parse_comment(input)?;
                let node = self.doc.create_node(NodeKind::Comment { content });
                self.doc.append_child(parent, node);
            } else if input.looking_at(b"<?") {
                self.parse_pi_node(input, parent)?;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_pi_node(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        let (target, data) = parse_pi(input)?;
        let node = self
            .doc
            .create_node(NodeKind::ProcessingInstruction { target, data });
        self.doc.append_child(parent, node);
        Ok(())
    }

    fn parse_doctype(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        input.expect_str(b"<!DOCTYPE")?;
        input.skip_whitespace_required()?;
        let name = input.parse_name()?.to_string();
        let had_ws = input.skip_whitespace();

        let (system_id, public_id) =
            if had_ws && (input.looking_at(b"SYSTEM") || input.looking_at(b"PUBLIC")) {
                let (system_id, public_id) = dtd::parse_external_id(input)?;
                input.skip_whitespace();
                (Some(system_id), public_id)
            } else {
                (None, None)
            };
        // The external subset itself is never read; remember that it exists
        // so undeclared entities can be kept as references.
        self.has_external_subset = system_id.is_some();

        let mut internal_subset = None;
        if input.peek() == Some(b'[') {
            input.advance(1);
            let start = input.pos();
            loop {
                match input.peek() {
                    Some(b']') => break,
                    Some(b'"' | b'\'') => {
                        input.parse_quoted_value()?;
                    }
                    Some(b'<') if input.looking_at(b"<!--") => {
                        parse_comment(input)?;
                    }
                    Some(b'<') if input.looking_at(b"<?") => {
                        input.advance(2);
                        input.take_until("?>", "processing instruction")?;
                    }
                    Some(_) => {
                        input.next_char()?;
                    }
                    None => return Err(input.fatal("unexpected end of input in DOCTYPE")),
                }
            }
            let subset = input.slice(start, input.pos());
            input.advance(1);

            DtdProcessor::new(self.options, &mut self.entities, &mut self.expansions)
                .process(subset)
                .map_err(|e| ParseError {
                    message: format!("in DTD internal subset: {}", e.message),
                    location: e.location,
                })?;
            internal_subset = Some(subset.to_string());
            input.skip_whitespace();
        }
        input.expect_byte(b'>')?;

        let node = self.doc.create_node(NodeKind::DocumentType {
            name,
            system_id,
            public_id,
            internal_subset,
        });
        self.doc.append_child(parent, node);
        Ok(())
    }

    fn parse_element(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<NodeId, ParseError> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(input.fatal(format!(
                "maximum nesting depth exceeded ({})",
                self.options.max_depth
            )));
        }

        input.expect_byte(b'<')?;
        let qname = input.parse_name()?;

        let mut raw_attrs: Vec<(&str, String)> = Vec::new();
        loop {
            let had_ws = input.skip_whitespace();
            match input.peek() {
                Some(b'>' | b'/') => break,
                None => return Err(input.fatal(format!("unexpected end of input in <{qname}>"))),
                Some(_) if !had_ws => {
                    return Err(input.fatal("whitespace required between attributes"))
                }
                Some(_) => {}
            }
            let name = input.parse_name()?;
            input.skip_whitespace();
            input.expect_byte(b'=')?;
            input.skip_whitespace();
            let raw = input.parse_quoted_value()?;
            let value = self.attribute_value(raw, input)?;
            if raw_attrs.iter().any(|(n, _)| *n == name) {
                return Err(input.fatal(format!("attribute '{name}' redefined")));
            }
            raw_attrs.push((name, value));
        }
        let empty = if input.looking_at(b"/>") {
            input.advance(2);
            true
        } else {
            input.expect_byte(b'>')?;
            false
        };

        self.ns.push_scope();
        for (name, value) in &raw_attrs {
            if *name == "xmlns" {
                self.ns.bind(None, value);
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                if value.is_empty() {
                    return Err(input.fatal(format!("empty namespace URI for prefix '{prefix}'")));
                }
                self.ns.bind(Some(prefix), value);
            }
        }

        let (prefix, local) = split_name(qname);
        let namespace = self.ns.resolve(prefix).map(String::from);
        if let (Some(p), None) = (prefix, &namespace) {
            return Err(input.fatal(format!("namespace prefix '{p}' on <{qname}> is not bound")));
        }

        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (name, value) in raw_attrs {
            let (prefix, local) = split_name(name);
            let namespace = match prefix {
                None if local == "xmlns" => Some(XMLNS_NAMESPACE.to_string()),
                None => None,
                Some(p) => Some(self.ns.resolve(Some(p)).map(String::from).ok_or_else(|| {
                    input.fatal(format!("namespace prefix '{p}' on attribute '{name}' is not bound"))
                })?),
            };
            attributes.push(Attribute {
                name: local.to_string(),
                value,
                prefix: prefix.map(String::from),
                namespace,
            });
        }

        let element = self.doc.create_node(NodeKind::Element {
            name: local.to_string(),
            prefix: prefix.map(String::from),
            namespace,
            attributes,
        });
        self.doc.append_child(parent, element);

        if !empty {
            self.parse_content(input, element)?;
            if input.at_end() {
                return Err(input.fatal(format!("unexpected end of input, expected </{qname}>")));
            }
            input.expect_str(b"</")?;
            let end = input.parse_name()?;
            if end != qname {
                return Err(input.fatal(format!(
                    "mismatched tag: expected </{qname}>, found </{end}>"
                )));
            }
            input.skip_whitespace();
            input.expect_byte(b'>')?;
        }

        self.ns.pop_scope();
        self.depth -= 1;
        Ok(element)
    }

    /// Parses content until an end tag or the end of `input`.
    fn parse_content(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        loop {
            if input.at_end() || input.looking_at(b"</") {
                return Ok(());
            }
            if input.looking_at(b"<!--") {
                let content = parse_comment(input)?;
                let node = self.doc.create_node(NodeKind::Comment { content });
                self.doc.append_child(parent, node);
            } else if input.looking_at(b"<![CDATA[") {
                let content = parse_cdata(input)?;
                let node = self.doc.create_node(NodeKind::CData { content });
                self.doc.append_child(parent, node);
            } else if input.looking_at(b"<?") {
                self.parse_pi_node(input, parent)?;
            } else if input.looking_at(b"<!") {
                return Err(input.fatal("markup declaration not allowed in content"));
            } else if input.peek() == Some(b'<') {
                self.parse_element(input, parent)?;
            } else if input.peek() == Some(b'&') {
                self.parse_reference(input, parent)?;
            } else {
                self.parse_char_data(input, parent)?;
            }
        }
    }

    fn parse_char_data(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        let start = input.pos();
        while let Some(c) = input.peek_char() {
            if c == '<' || c == '&' {
                break;
            }
            if c == ']' && input.looking_at(b"]]>") {
                return Err(input.fatal("']]>' not allowed in content"));
            }
            input.next_char()?;
        }
        let text = input.slice(start, input.pos());
        self.doc.append_text(parent, text);
        Ok(())
    }

    fn parse_reference(&mut self, input: &mut ParserInput<'_>, parent: NodeId) -> Result<(), ParseError> {
        if input.looking_at(b"&#") {
            let c = input.parse_char_ref()?;
            let mut buf = [0u8; 4];
            self.doc.append_text(parent, c.encode_utf8(&mut buf));
            return Ok(());
        }

        input.advance(1);
        let name = input.parse_name()?;
        input.expect_byte(b';')?;

        if let Some(c) = builtin_entity(name) {
            let mut buf = [0u8; 4];
            self.doc.append_text(parent, c.encode_utf8(&mut buf));
            return Ok(());
        }

        match self.entities.general(name).cloned() {
            Some(EntityValue::Internal(text)) => self.expand_entity(name, &text, parent, input),
            Some(EntityValue::External {
                notation: Some(_), ..
            }) => Err(input.fatal(format!("unparsed entity '{name}' referenced in content"))),
            Some(EntityValue::External {
                system_id,
                public_id,
                ..
            }) => {
                let Some(resolver) = &self.options.entity_resolver else {
                    return Err(input.fatal(format!(
                        "external entity '{name}' cannot be loaded without a resolver"
                    )));
                };
                let request = ExternalEntityRequest {
                    name,
                    system_id: &system_id,
                    public_id: public_id.as_deref(),
                    parameter: false,
                    base_url: self.options.base_url.as_deref(),
                };
                let text = resolver(request).ok_or_else(|| {
                    input.fatal(format!(
                        "failed to load external entity '{name}' (\"{system_id}\")"
                    ))
                })?;
                let text = normalize_newlines(strip_text_decl(&text)).into_owned();
                self.expand_entity(name, &text, parent, input)
            }
            None if self.has_external_subset || self.entities.skipped_external() => {
                // The declaration may be in a part of the DTD we did not read.
                let node = self.doc.create_node(NodeKind::EntityRef {
                    name: name.to_string(),
                });
                self.doc.append_child(parent, node);
                Ok(())
            }
            None => Err(input.fatal(format!("entity '{name}' not defined"))),
        }
    }

    fn begin_expansion(&mut self, name: &str, at: &ParserInput<'_>) -> Result<(), ParseError> {
        if self.expanding.iter().any(|n| n == name) {
            return Err(at.fatal(format!("entity '{name}' references itself")));
        }
        self.expansions += 1;
        if self.expansions > self.options.max_entity_expansions {
            return Err(at.fatal(format!(
                "entity expansion limit exceeded ({})",
                self.options.max_entity_expansions
            )));
        }
        self.expanding.push(name.to_string());
        Ok(())
    }

    /// Parses replacement text as content of `parent`. The text must be
    /// balanced: every element it opens is closed inside it.
    fn expand_entity(
        &mut self,
        name: &str,
        text: &str,
        parent: NodeId,
        at: &ParserInput<'_>,
    ) -> Result<(), ParseError> {
        self.begin_expansion(name, at)?;
        let mut sub = ParserInput::new(text);
        let result = self.parse_content(&mut sub, parent).and_then(|()| {
            if sub.at_end() {
                Ok(())
            } else {
                Err(sub.fatal("replacement text is not well-balanced"))
            }
        });
        self.expanding.pop();
        result.map_err(|e| ParseError {
            message: format!("in entity '{name}': {}", e.message),
            location: e.location,
        })
    }

    /// Expands references in an attribute value and normalizes whitespace
    /// (XML 1.0 §3.3.3, CDATA attribute type).
    fn attribute_value(&mut self, raw: &str, at: &ParserInput<'_>) -> Result<String, ParseError> {
        let mut out = String::with_capacity(raw.len());
        self.attribute_value_into(raw, &mut out, at)?;
        Ok(out)
    }

    fn attribute_value_into(
        &mut self,
        raw: &str,
        out: &mut String,
        at: &ParserInput<'_>,
    ) -> Result<(), ParseError> {
        let mut sub = ParserInput::new(raw);
        let relocate = |e: ParseError| at.fatal(e.message);
        while let Some(b) = sub.peek() {
            match b {
                b'<' => return Err(at.fatal("'<' not allowed in attribute values")),
                b'&' if sub.looking_at(b"&#") => out.push(sub.parse_char_ref().map_err(relocate)?),
                b'&' => {
                    sub.advance(1);
                    let name = sub.parse_name().map_err(relocate)?;
                    sub.expect_byte(b';').map_err(relocate)?;
                    if let Some(c) = builtin_entity(name) {
                        out.push(c);
                        continue;
                    }
                    match self.entities.general(name).cloned() {
                        Some(EntityValue::Internal(text)) => {
                            self.begin_expansion(name, at)?;
                            let result = self.attribute_value_into(&text, out, at);
                            self.expanding.pop();
                            result?;
                        }
                        Some(EntityValue::External { .. }) => {
                            return Err(at.fatal(format!(
                                "attribute value references external entity '{name}'"
                            )))
                        }
                        None if self.has_external_subset || self.entities.skipped_external() => {
                            debug!(entity = name, "dropping undeclared entity from attribute value");
                        }
                        None => return Err(at.fatal(format!("entity '{name}' not defined"))),
                    }
                }
                b'\t' | b'\n' | b'\r' => {
                    out.push(' ');
                    sub.advance(1);
                }
                _ => out.push(sub.next_char().map_err(relocate)?),
            }
        }
        Ok(())
    }
}
