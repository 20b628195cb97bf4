//! XML 1.0 parser.
//!
//! A hand-rolled recursive descent parser that builds a [`Document`]. It is
//! non-validating but does process the DTD internal subset: entity
//! declarations are recorded, parameter-entity references are expanded, and
//! general entity references in content are replaced by their (parsed)
//! replacement text. External entities are only ever read through the
//! caller-supplied [`EntityResolver`]; the external DTD subset named by the
//! DOCTYPE is never loaded.

mod dtd;
pub(crate) mod input;
mod xml;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ParseError;
use crate::tree::Document;

use input::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTITY_EXPANSIONS};

/// A request to load an external entity.
///
/// Passed to the [`EntityResolver`] callback when the parser needs the
/// replacement text of an entity declared with a SYSTEM or PUBLIC id.
#[derive(Debug, Clone, Copy)]
pub struct ExternalEntityRequest<'a> {
    /// The entity name as declared.
    pub name: &'a str,
    /// The SYSTEM identifier from the declaration.
    pub system_id: &'a str,
    /// The PUBLIC identifier from the declaration, if any.
    pub public_id: Option<&'a str>,
    /// `true` for parameter entities (`<!ENTITY % name ...>`).
    pub parameter: bool,
    /// The location of the document being parsed, for resolving a relative
    /// `system_id`.
    pub base_url: Option<&'a Path>,
}

/// A callback for loading external entities.
///
/// Returns `Some(replacement_text)` to expand the entity, or `None` if it
/// cannot be loaded, which fails the parse.
pub type EntityResolver = Arc<dyn Fn(ExternalEntityRequest<'_>) -> Option<String> + Send + Sync>;

/// Parse options.
///
/// ```
/// use manxml::parser::ParseOptions;
///
/// let opts = ParseOptions::default()
///     .max_depth(128)
///     .entity_resolver(|req| (req.system_id == "a.ent").then(|| "<!ENTITY a 'b'>".to_string()));
/// assert_eq!(opts.max_depth, 128);
/// ```
#[derive(Clone)]
pub struct ParseOptions {
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
    /// Maximum number of entity expansions per document (default: 10,000).
    pub max_entity_expansions: u32,
    /// Location of the document, recorded on the tree and handed to the
    /// resolver as the base for relative system identifiers.
    pub base_url: Option<PathBuf>,
    /// Optional callback for loading external entities.
    ///
    /// Without one, external general entities are an error and external
    /// parameter entities are skipped (which, per XML 1.0 §5.1, also stops
    /// processing of later declarations).
    pub entity_resolver: Option<EntityResolver>,
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("max_depth", &self.max_depth)
            .field("max_entity_expansions", &self.max_entity_expansions)
            .field("base_url", &self.base_url)
            .field(
                "entity_resolver",
                &self.entity_resolver.as_ref().map(|_| "..."),
            )
            .finish()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_entity_expansions: DEFAULT_MAX_ENTITY_EXPANSIONS,
            base_url: None,
            entity_resolver: None,
        }
    }
}

impl ParseOptions {
    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }

    /// Sets the maximum number of entity reference expansions.
    #[must_use]
    pub fn max_entity_expansions(mut self, max: u32) -> Self {
        self.max_entity_expansions = max;
        self
    }

    /// Sets the document location.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<PathBuf>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the external entity resolver callback.
    #[must_use]
    pub fn entity_resolver(
        mut self,
        resolver: impl Fn(ExternalEntityRequest<'_>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.entity_resolver = Some(Arc::new(resolver));
        self
    }
}

/// Parses an XML string with default options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML.
pub fn parse_str(input: &str) -> Result<Document, ParseError> {
    parse_str_with_options(input, &ParseOptions::default())
}

/// Parses an XML string with the given options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML or an external
/// entity it needs cannot be loaded.
pub fn parse_str_with_options(input: &str, options: &ParseOptions) -> Result<Document, ParseError> {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    let input = input::normalize_newlines(input);
    xml::XmlParser::new(options).parse(&input)
}
