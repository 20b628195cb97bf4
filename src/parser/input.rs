//! Low-level input cursor shared by the document and DTD parsers.
//!
//! [`ParserInput`] walks a UTF-8 string byte by byte while tracking line,
//! column, and byte offset for diagnostics. Line endings are normalized
//! before a cursor is created (see [`normalize_newlines`]), so the cursor
//! only ever sees `\n`.

use std::borrow::Cow;

use crate::error::{ParseError, SourceLocation};

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Default maximum number of entity expansions per document.
pub(crate) const DEFAULT_MAX_ENTITY_EXPANSIONS: u32 = 10_000;

// -------------------------------------------------------------------------
// Character classes (XML 1.0 §2.2, §2.3)
// -------------------------------------------------------------------------

/// `Char` per XML 1.0 §2.2 `[2]`.
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// `NameStartChar` per XML 1.0 §2.3 `[4]`.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// `NameChar` per XML 1.0 §2.3 `[4a]`.
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Splits a qualified name into optional prefix and local part.
pub(crate) fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Maps the five predefined entities to their characters.
pub(crate) fn builtin_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Applies end-of-line handling (XML 1.0 §2.11): `\r\n` and lone `\r`
/// become `\n`.
pub(crate) fn normalize_newlines(input: &str) -> Cow<'_, str> {
    if input.contains('\r') {
        Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(input)
    }
}

/// Strips a leading text declaration (`<?xml encoding="..."?>`) from the
/// replacement text of an external parsed entity.
pub(crate) fn strip_text_decl(text: &str) -> &str {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    if let Some(rest) = text.strip_prefix("<?xml") {
        if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
            if let Some(end) = rest.find("?>") {
                return &rest[end + 2..];
            }
        }
    }
    text
}

// -------------------------------------------------------------------------
// Cursor
// -------------------------------------------------------------------------

/// A cursor over XML text with position tracking.
pub(crate) struct ParserInput<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> ParserInput<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.pos,
        }
    }

    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            location: self.location(),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.src[start..end]
    }

    pub fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    pub fn looking_at(&self, s: &[u8]) -> bool {
        self.src.as_bytes()[self.pos..].starts_with(s)
    }

    /// Advances by `count` bytes. Callers only advance over whole
    /// characters, so the position stays on a char boundary.
    pub fn advance(&mut self, count: usize) {
        let end = (self.pos + count).min(self.src.len());
        for &b in &self.src.as_bytes()[self.pos..end] {
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if b & 0xC0 != 0x80 {
                self.column += 1;
            }
        }
        self.pos = end;
    }

    pub fn next_char(&mut self) -> Result<char, ParseError> {
        let ch = self
            .peek_char()
            .ok_or_else(|| self.fatal("unexpected end of input"))?;
        if !is_xml_char(ch) {
            return Err(self.fatal(format!("invalid XML character: U+{:04X}", ch as u32)));
        }
        self.advance(ch.len_utf8());
        Ok(ch)
    }

    pub fn expect_byte(&mut self, expected: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.advance(1);
                Ok(())
            }
            Some(_) => Err(self.fatal(format!(
                "expected '{}', found '{}'",
                expected as char,
                self.peek_char().unwrap_or('?')
            ))),
            None => Err(self.fatal(format!(
                "expected '{}', found end of input",
                expected as char
            ))),
        }
    }

    pub fn expect_str(&mut self, expected: &[u8]) -> Result<(), ParseError> {
        if self.looking_at(expected) {
            self.advance(expected.len());
            Ok(())
        } else {
            Err(self.fatal(format!(
                "expected '{}'",
                String::from_utf8_lossy(expected)
            )))
        }
    }

    /// Skips whitespace. Returns `true` if any was consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance(1);
        }
        self.pos > start
    }

    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if self.skip_whitespace() {
            Ok(())
        } else {
            Err(self.fatal("whitespace required"))
        }
    }

    /// Parses an XML `Name` (XML 1.0 §2.3 `[5]`).
    pub fn parse_name(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        match self.peek_char() {
            Some(c) if is_name_start_char(c) => self.advance(c.len_utf8()),
            Some(c) => return Err(self.fatal(format!("invalid name start character '{c}'"))),
            None => return Err(self.fatal("expected name, found end of input")),
        }
        while let Some(c) = self.peek_char().filter(|&c| is_name_char(c)) {
            self.advance(c.len_utf8());
        }
        Ok(self.slice(start, self.pos))
    }

    /// Consumes text up to `delim`, returning it and consuming the delimiter.
    pub fn take_until(&mut self, delim: &str, context: &str) -> Result<&'a str, ParseError> {
        let start = self.pos;
        match self.src[start..].find(delim) {
            Some(offset) => {
                let text = self.slice(start, start + offset);
                if let Some(bad) = text.chars().find(|&c| !is_xml_char(c)) {
                    return Err(self.fatal(format!(
                        "invalid XML character: U+{:04X}",
                        bad as u32
                    )));
                }
                self.advance(offset + delim.len());
                Ok(text)
            }
            None => Err(self.fatal(format!("unexpected end of input in {context}"))),
        }
    }

    /// Parses a quoted literal, returning its raw content.
    pub fn parse_quoted_value(&mut self) -> Result<&'a str, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.fatal("expected quoted value")),
        };
        self.advance(1);
        let delim = if quote == b'"' { "\"" } else { "'" };
        self.take_until(delim, "quoted value")
    }

    /// Parses a character reference after the leading `&#` has been seen
    /// but not consumed: `&#123;` or `&#x7B;`.
    pub fn parse_char_ref(&mut self) -> Result<char, ParseError> {
        self.expect_str(b"&#")?;
        let hex = self.peek() == Some(b'x');
        if hex {
            self.advance(1);
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| if hex { b.is_ascii_hexdigit() } else { b.is_ascii_digit() })
        {
            self.advance(1);
        }
        let digits = self.slice(start, self.pos);
        self.expect_byte(b';')?;
        let value = u32::from_str_radix(digits, if hex { 16 } else { 10 })
            .map_err(|_| self.fatal("invalid character reference"))?;
        char::from_u32(value)
            .filter(|&c| is_xml_char(c))
            .ok_or_else(|| self.fatal(format!("character reference to invalid character #{value}")))
    }
}

// -------------------------------------------------------------------------
// Markup helpers
// -------------------------------------------------------------------------

/// Parses `<!-- ... -->`, returning the comment text.
pub(crate) fn parse_comment(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    input.expect_str(b"<!--")?;
    let content = input.take_until("--", "comment")?;
    if !input.looking_at(b">") {
        return Err(input.fatal("'--' not allowed inside comments"));
    }
    input.advance(1);
    if content.ends_with('-') {
        return Err(input.fatal("comment must not end with '-'"));
    }
    Ok(content.to_string())
}

/// Parses `<![CDATA[ ... ]]>`, returning the section content.
pub(crate) fn parse_cdata(input: &mut ParserInput<'_>) -> Result<String, ParseError> {
    input.expect_str(b"<![CDATA[")?;
    Ok(input.take_until("]]>", "CDATA section")?.to_string())
}

/// Parses `<?target data?>`, returning the target and optional data.
pub(crate) fn parse_pi(
    input: &mut ParserInput<'_>,
) -> Result<(String, Option<String>), ParseError> {
    input.expect_str(b"<?")?;
    let target = input.parse_name()?;
    if target.eq_ignore_ascii_case("xml") {
        return Err(input.fatal("PI target 'xml' is reserved"));
    }
    let data = if input.skip_whitespace() {
        let data = input.take_until("?>", "processing instruction")?;
        (!data.is_empty()).then(|| data.to_string())
    } else {
        input.expect_str(b"?>")?;
        None
    };
    Ok((target.to_string(), data))
}

/// Parsed XML declaration data.
#[derive(Debug, Clone, Default)]
pub(crate) struct XmlDeclaration {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
}

/// Parses `<?xml version="1.0" encoding="..." standalone="..."?>`.
pub(crate) fn parse_xml_decl(input: &mut ParserInput<'_>) -> Result<XmlDeclaration, ParseError> {
    input.expect_str(b"<?xml")?;
    let mut decl = XmlDeclaration::default();
    loop {
        let had_ws = input.skip_whitespace();
        if input.looking_at(b"?>") {
            input.advance(2);
            break;
        }
        if !had_ws {
            return Err(input.fatal("whitespace required in XML declaration"));
        }
        let name = input.parse_name()?;
        input.skip_whitespace();
        input.expect_byte(b'=')?;
        input.skip_whitespace();
        let value = input.parse_quoted_value()?;
        match name {
            "version" => decl.version = Some(value.to_string()),
            "encoding" => decl.encoding = Some(value.to_string()),
            "standalone" => match value {
                "yes" => decl.standalone = Some(true),
                "no" => decl.standalone = Some(false),
                _ => return Err(input.fatal(format!("invalid standalone value '{value}'"))),
            },
            _ => {
                return Err(input.fatal(format!(
                    "unexpected pseudo-attribute '{name}' in XML declaration"
                )))
            }
        }
    }
    Ok(decl)
}
