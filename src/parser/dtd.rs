//! DTD subset processing.
//!
//! Only what a non-validating processor needs is interpreted: entity
//! declarations (general and parameter), parameter-entity references
//! between declarations, and `INCLUDE`/`IGNORE` conditional sections in
//! external parameter entities. Element, attribute-list and notation
//! declarations are skipped over.
//!
//! External parameter entities are loaded through the resolver in
//! [`ParseOptions`]; their text is processed recursively as more DTD.

use std::collections::HashMap;

use tracing::debug;

use super::input::{normalize_newlines, parse_comment, strip_text_decl, ParserInput};
use super::{ExternalEntityRequest, ParseOptions};
use crate::error::ParseError;

/// The replacement source of a declared entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntityValue {
    /// Literal replacement text, with character and parameter-entity
    /// references already expanded.
    Internal(String),
    /// Text to be loaded from elsewhere.
    External {
        system_id: String,
        public_id: Option<String>,
        /// Set for unparsed (`NDATA`) entities.
        notation: Option<String>,
    },
}

/// Entity declarations collected from the DTD.
#[derive(Debug, Default)]
pub(crate) struct EntityTable {
    general: HashMap<String, EntityValue>,
    parameter: HashMap<String, EntityValue>,
    /// Set once an external parameter entity was skipped. XML 1.0 §5.1:
    /// later declarations must then be ignored, and undeclared entity
    /// references are no longer well-formedness errors.
    skipped_external: bool,
}

impl EntityTable {
    pub fn general(&self, name: &str) -> Option<&EntityValue> {
        self.general.get(name)
    }

    pub fn skipped_external(&self) -> bool {
        self.skipped_external
    }
}

/// Parses `SYSTEM "uri"` or `PUBLIC "pubid" "uri"`.
pub(crate) fn parse_external_id(
    input: &mut ParserInput<'_>,
) -> Result<(String, Option<String>), ParseError> {
    if input.looking_at(b"SYSTEM") {
        input.advance(6);
        input.skip_whitespace_required()?;
        let system_id = input.parse_quoted_value()?;
        Ok((system_id.to_string(), None))
    } else if input.looking_at(b"PUBLIC") {
        input.advance(6);
        input.skip_whitespace_required()?;
        let public_id = input.parse_quoted_value()?;
        input.skip_whitespace_required()?;
        let system_id = input.parse_quoted_value()?;
        Ok((system_id.to_string(), Some(public_id.to_string())))
    } else {
        Err(input.fatal("expected SYSTEM or PUBLIC"))
    }
}

/// Skips a markup declaration we do not interpret (`<!ELEMENT`, ...).
fn skip_markup_decl(input: &mut ParserInput<'_>) -> Result<(), ParseError> {
    input.advance(2);
    loop {
        match input.peek() {
            Some(b'"' | b'\'') => {
                input.parse_quoted_value()?;
            }
            Some(b'>') => {
                input.advance(1);
                return Ok(());
            }
            Some(_) => {
                input.next_char()?;
            }
            None => return Err(input.fatal("unexpected end of input in markup declaration")),
        }
    }
}

fn in_entity(name: &str, err: ParseError) -> ParseError {
    ParseError {
        message: format!("in parameter entity '%{name};': {}", err.message),
        location: err.location,
    }
}

/// Walks DTD text, recording entity declarations into an [`EntityTable`].
pub(crate) struct DtdProcessor<'p> {
    options: &'p ParseOptions,
    table: &'p mut EntityTable,
    expansions: &'p mut u32,
    /// Parameter entities currently being expanded, for recursion checks.
    active: Vec<String>,
}

impl<'p> DtdProcessor<'p> {
    pub fn new(
        options: &'p ParseOptions,
        table: &'p mut EntityTable,
        expansions: &'p mut u32,
    ) -> Self {
        Self {
            options,
            table,
            expansions,
            active: Vec::new(),
        }
    }

    /// Processes a run of markup declarations.
    pub fn process(&mut self, text: &str) -> Result<(), ParseError> {
        let mut input = ParserInput::new(text);
        loop {
            input.skip_whitespace();
            if input.at_end() {
                return Ok(());
            }
            if input.looking_at(b"<!--") {
                parse_comment(&mut input)?;
            } else if input.looking_at(b"<?") {
                // Processing instructions, including a text declaration at
                // the start of an external parameter entity.
                input.advance(2);
                input.take_until("?>", "processing instruction")?;
            } else if input.looking_at(b"<!ENTITY") {
                self.entity_decl(&mut input)?;
            } else if input.looking_at(b"<![") {
                self.conditional_section(&mut input)?;
            } else if input.looking_at(b"<!") {
                skip_markup_decl(&mut input)?;
            } else if input.peek() == Some(b'%') {
                input.advance(1);
                let name = input.parse_name()?;
                input.expect_byte(b';')?;
                if let Some(text) = self.parameter_text(name, &input)? {
                    self.active.push(name.to_string());
                    let result = self.process(&text);
                    self.active.pop();
                    result.map_err(|e| in_entity(name, e))?;
                }
            } else {
                return Err(input.fatal("unexpected content in DTD"));
            }
        }
    }

    fn entity_decl(&mut self, input: &mut ParserInput<'_>) -> Result<(), ParseError> {
        input.expect_str(b"<!ENTITY")?;
        input.skip_whitespace_required()?;
        let parameter = input.peek() == Some(b'%');
        if parameter {
            input.advance(1);
            input.skip_whitespace_required()?;
        }
        let name = input.parse_name()?;
        input.skip_whitespace_required()?;

        let value = if matches!(input.peek(), Some(b'"' | b'\'')) {
            let literal = input.parse_quoted_value()?;
            EntityValue::Internal(self.entity_value(literal, input)?)
        } else {
            let (system_id, public_id) = parse_external_id(input)?;
            let had_ws = input.skip_whitespace();
            let notation = if had_ws && input.looking_at(b"NDATA") {
                if parameter {
                    return Err(input.fatal("parameter entities cannot be unparsed"));
                }
                input.advance(5);
                input.skip_whitespace_required()?;
                Some(input.parse_name()?.to_string())
            } else {
                None
            };
            EntityValue::External {
                system_id,
                public_id,
                notation,
            }
        };
        input.skip_whitespace();
        input.expect_byte(b'>')?;

        if self.table.skipped_external {
            debug!(entity = name, "ignoring declaration after unread parameter entity");
            return Ok(());
        }
        let map = if parameter {
            &mut self.table.parameter
        } else {
            &mut self.table.general
        };
        // The first declaration of an entity is binding.
        map.entry(name.to_string()).or_insert(value);
        Ok(())
    }

    /// Expands character and parameter-entity references in an entity
    /// value literal. General entity references are bypassed and stay
    /// in the text, to be expanded when the entity itself is referenced.
    fn entity_value(&mut self, literal: &str, outer: &ParserInput<'_>) -> Result<String, ParseError> {
        let mut out = String::with_capacity(literal.len());
        let mut input = ParserInput::new(literal);
        while let Some(b) = input.peek() {
            match b {
                b'&' if input.looking_at(b"&#") => out.push(input.parse_char_ref()?),
                b'&' => {
                    input.advance(1);
                    let name = input.parse_name()?;
                    input.expect_byte(b';')?;
                    out.push('&');
                    out.push_str(name);
                    out.push(';');
                }
                b'%' => {
                    input.advance(1);
                    let name = input.parse_name()?;
                    input.expect_byte(b';')?;
                    if let Some(text) = self.parameter_text(name, outer)? {
                        self.active.push(name.to_string());
                        let expanded = self.entity_value(&text, outer);
                        self.active.pop();
                        out.push_str(&expanded.map_err(|e| in_entity(name, e))?);
                    }
                }
                _ => out.push(input.next_char()?),
            }
        }
        Ok(out)
    }

    /// Returns the replacement text of a parameter entity, or `None` if it
    /// is external and no resolver is configured.
    fn parameter_text(
        &mut self,
        name: &str,
        at: &ParserInput<'_>,
    ) -> Result<Option<String>, ParseError> {
        if self.active.iter().any(|n| n == name) {
            return Err(at.fatal(format!("parameter entity '%{name};' references itself")));
        }
        *self.expansions += 1;
        if *self.expansions > self.options.max_entity_expansions {
            return Err(at.fatal(format!(
                "entity expansion limit exceeded ({})",
                self.options.max_entity_expansions
            )));
        }

        match self.table.parameter.get(name).cloned() {
            None if self.table.skipped_external => Ok(None),
            None => Err(at.fatal(format!("PEReference: %{name}; not found"))),
            Some(EntityValue::Internal(text)) => Ok(Some(text)),
            Some(EntityValue::External {
                system_id,
                public_id,
                ..
            }) => {
                let Some(resolver) = &self.options.entity_resolver else {
                    debug!(entity = name, system_id = %system_id, "skipping external parameter entity");
                    self.table.skipped_external = true;
                    return Ok(None);
                };
                let request = ExternalEntityRequest {
                    name,
                    system_id: &system_id,
                    public_id: public_id.as_deref(),
                    parameter: true,
                    base_url: self.options.base_url.as_deref(),
                };
                let text = resolver(request).ok_or_else(|| {
                    at.fatal(format!(
                        "failed to load external entity '%{name};' (\"{system_id}\")"
                    ))
                })?;
                Ok(Some(normalize_newlines(strip_text_decl(&text)).into_owned()))
            }
        }
    }

    fn conditional_section(&mut self, input: &mut ParserInput<'_>) -> Result<(), ParseError> {
        input.expect_str(b"<![")?;
        input.skip_whitespace();
        let keyword = input.parse_name()?;
        input.skip_whitespace();
        input.expect_byte(b'[')?;

        let start = input.pos();
        let mut depth = 1u32;
        loop {
            if input.at_end() {
                return Err(input.fatal("unexpected end of input in conditional section"));
            }
            if input.looking_at(b"<![") {
                depth += 1;
                input.advance(3);
            } else if input.looking_at(b"]]>") {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                input.advance(3);
            } else {
                input.next_char()?;
            }
        }
        let body = input.slice(start, input.pos());
        input.advance(3);

        match keyword {
            "INCLUDE" => self.process(body),
            "IGNORE" => Ok(()),
            other => Err(input.fatal(format!("invalid conditional section keyword '{other}'"))),
        }
    }
}
