//! Page loading: parse with allow-list resolution, then expand `XInclude`s.
//!
//! A [`PageLoader`] reads a man page from disk and installs one callback for
//! external entities and one for `xi:include` hrefs. Both consult the
//! [`DocsResolver`] first. Declined references fall back to a plain file
//! lookup relative to the document that contains them (`file://` URLs
//! included); other URL schemes are never fetched.
//!
//! The dependencies a load records are local to that call.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{decode_to_utf8, EncodingError};
use crate::error::ParseError;
use crate::parser::{parse_str_with_options, ExternalEntityRequest, ParseOptions};
use crate::resolver::{Dependencies, DocsResolver, Resolution};
use crate::tree::Document;
use crate::xinclude::{process_xincludes, IncludeRequest, IncludeSource, XIncludeError, XIncludeOptions};

/// Errors returned by [`PageLoader::load`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// A file could not be read: the page itself, or an allow-listed
    /// auxiliary file at its redirected location.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The page bytes could not be decoded.
    #[error("{}: {source}", .path.display())]
    Encoding {
        /// The page.
        path: PathBuf,
        /// The decoding failure.
        source: EncodingError,
    },

    /// The page, or an entity it references, is not well-formed.
    #[error("{}:{}: {}", .path.display(), .source.location, .source.message)]
    Parse {
        /// The page.
        path: PathBuf,
        /// The parse failure.
        source: ParseError,
    },

    /// One or more `xi:include` elements could not be resolved.
    #[error("{}: {}", .path.display(), summarize(.errors))]
    XInclude {
        /// The page.
        path: PathBuf,
        /// Every failed include, in document order.
        errors: Vec<XIncludeError>,
    },
}

fn summarize(errors: &[XIncludeError]) -> String {
    match errors {
        [] => "XInclude processing failed".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

/// A loaded page.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// The page with entities and includes expanded.
    pub document: Document,
    /// Auxiliary files consulted while loading it.
    pub dependencies: Dependencies,
}

/// Loads man pages through a [`DocsResolver`].
///
/// ```no_run
/// use manxml::loader::PageLoader;
/// use manxml::resolver::ResolverConfig;
///
/// let loader = PageLoader::new(ResolverConfig::new("/src/systemd").build());
/// let page = loader.load("/src/systemd/man/systemctl.xml")?;
/// for dependency in page.dependencies.iter() {
///     println!("{dependency}");
/// }
/// # Ok::<(), manxml::loader::LoadError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PageLoader {
    resolver: Arc<DocsResolver>,
    parse_options: ParseOptions,
    max_include_depth: usize,
}

impl PageLoader {
    /// Creates a loader with default parse limits.
    #[must_use]
    pub fn new(resolver: DocsResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            parse_options: ParseOptions::default(),
            max_include_depth: XIncludeOptions::default().max_depth,
        }
    }

    /// Sets the parser limits. The base URL and entity resolver are
    /// replaced on every load.
    #[must_use]
    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    /// Sets the maximum `xi:include` nesting depth.
    #[must_use]
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// The resolver this loader consults.
    #[must_use]
    pub fn resolver(&self) -> &DocsResolver {
        &self.resolver
    }

    /// Loads a page into a fresh dependency set.
    ///
    /// # Errors
    ///
    /// See [`LoadError`]. A missing allow-listed file is reported as
    /// [`LoadError::Io`] even though it surfaces as a parse or include
    /// failure.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadedPage, LoadError> {
        let mut dependencies = Dependencies::new();
        let document = self.load_into(path, &mut dependencies)?;
        Ok(LoadedPage {
            document,
            dependencies,
        })
    }

    /// Loads a page, adding consulted auxiliary files to `dependencies`.
    ///
    /// Dependencies are added even when the load fails.
    ///
    /// # Errors
    ///
    /// See [`PageLoader::load`].
    pub fn load_into(
        &self,
        path: impl AsRef<Path>,
        dependencies: &mut Dependencies,
    ) -> Result<Document, LoadError> {
        let path = path.as_ref();
        let session = Arc::new(Session {
            resolver: Arc::clone(&self.resolver),
            state: Mutex::new(SessionState::default()),
        });
        let result = self.load_with(path, &session);
        dependencies.extend(std::mem::take(&mut session.state().dependencies));
        result
    }

    fn load_with(&self, path: &Path, session: &Arc<Session>) -> Result<Document, LoadError> {
        debug!(path = %path.display(), "loading page");
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = decode_to_utf8(&bytes).map_err(|source| LoadError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;

        let entity_session = Arc::clone(session);
        let options = self
            .parse_options
            .clone()
            .base_url(path)
            .entity_resolver(move |request| entity_session.entity(request));

        let parsed = parse_str_with_options(&text, &options);
        let mut document = match parsed {
            Ok(document) => document,
            Err(source) => {
                return Err(session.take_missing().unwrap_or(LoadError::Parse {
                    path: path.to_path_buf(),
                    source,
                }))
            }
        };

        let include_options = XIncludeOptions::default()
            .max_depth(self.max_include_depth)
            .parse_options(options);
        let result = process_xincludes(&mut document, |request| session.include(request), &include_options);
        if let Some(missing) = session.take_missing_for(&result.errors) {
            return Err(missing);
        }
        if !result.errors.is_empty() {
            return Err(LoadError::XInclude {
                path: path.to_path_buf(),
                errors: result.errors,
            });
        }

        debug!(path = %path.display(), inclusions = result.inclusions, "loaded page");
        Ok(document)
    }
}

#[derive(Debug)]
struct MissingFile {
    /// The reference as written in the page.
    reference: String,
    path: PathBuf,
    source: io::Error,
}

impl From<MissingFile> for LoadError {
    fn from(missing: MissingFile) -> Self {
        LoadError::Io {
            path: missing.path,
            source: missing.source,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    dependencies: Dependencies,
    /// Allow-listed files that could not be read, in the order they were
    /// asked for.
    missing: Vec<MissingFile>,
}

/// State shared by the resolver callbacks of one load.
struct Session {
    resolver: Arc<DocsResolver>,
    state: Mutex<SessionState>,
}

impl Session {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The first missing file. Entities have no fallback, so after a
    /// parse failure any missing file is the cause.
    fn take_missing(&self) -> Option<LoadError> {
        let mut state = self.state();
        if state.missing.is_empty() {
            return None;
        }
        Some(state.missing.remove(0).into())
    }

    /// The first missing file named by a failed include. Files whose
    /// include was replaced by its `xi:fallback` are not errors.
    fn take_missing_for(&self, errors: &[XIncludeError]) -> Option<LoadError> {
        let mut state = self.state();
        let index = state.missing.iter().position(|missing| {
            errors.iter().any(|err| {
                err.href
                    .as_deref()
                    .is_some_and(|href| href.split('#').next() == Some(missing.reference.as_str()))
            })
        })?;
        Some(state.missing.remove(index).into())
    }

    /// Reads the file a reference points at, returning its bytes and the
    /// path they came from.
    fn read(&self, reference: &str, base: Option<&Path>) -> Option<(Vec<u8>, PathBuf)> {
        match self.resolver.resolve(reference) {
            Resolution::Override { path, dependency } => {
                self.state().dependencies.insert(dependency);
                match fs::read(&path) {
                    Ok(bytes) => Some((bytes, path)),
                    Err(err) => {
                        warn!(reference, path = %path.display(), %err, "cannot read auxiliary file");
                        self.state().missing.push(MissingFile {
                            reference: reference.to_string(),
                            path,
                            source: err,
                        });
                        None
                    }
                }
            }
            Resolution::NoOverride => {
                let Some(path) = default_path(reference, base) else {
                    warn!(reference, "not fetching non-local reference");
                    return None;
                };
                trace!(reference, path = %path.display(), "default resolution");
                match fs::read(&path) {
                    Ok(bytes) => Some((bytes, path)),
                    Err(err) => {
                        warn!(reference, path = %path.display(), %err, "cannot read referenced file");
                        None
                    }
                }
            }
        }
    }

    fn entity(&self, request: ExternalEntityRequest<'_>) -> Option<String> {
        let (bytes, path) = self.read(request.system_id, request.base_url)?;
        match decode_to_utf8(&bytes) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot decode entity");
                None
            }
        }
    }

    fn include(&self, request: IncludeRequest<'_>) -> Option<IncludeSource> {
        let (content, path) = self.read(request.href, request.base)?;
        Some(IncludeSource {
            content,
            location: Some(path),
        })
    }
}

/// Where a declined reference is read from: relative to the directory of
/// the referencing document, or as-is when absolute. `file://` URLs are
/// treated as paths; any other scheme yields `None`.
fn default_path(reference: &str, base: Option<&Path>) -> Option<PathBuf> {
    let local = match reference.strip_prefix("file://") {
        Some(rest) => rest,
        None if reference.contains(':') => return None,
        None => reference,
    };
    let path = Path::new(local);
    if path.is_absolute() {
        return Some(path.to_path_buf());
    }
    let dir = base.and_then(Path::parent).unwrap_or_else(|| Path::new(""));
    Some(dir.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_relative_to_base() {
        assert_eq!(
            default_path("sub/a.xml", Some(Path::new("/src/man/page.xml"))),
            Some(PathBuf::from("/src/man/sub/a.xml"))
        );
        assert_eq!(default_path("a.xml", None), Some(PathBuf::from("a.xml")));
    }

    #[test]
    fn test_default_path_absolute_and_file_url() {
        assert_eq!(
            default_path("/etc/x.xml", Some(Path::new("/src/page.xml"))),
            Some(PathBuf::from("/etc/x.xml"))
        );
        assert_eq!(
            default_path("file:///usr/share/x.xml", Some(Path::new("/src/page.xml"))),
            Some(PathBuf::from("/usr/share/x.xml"))
        );
    }

    #[test]
    fn test_default_path_refuses_other_schemes() {
        assert_eq!(
            default_path("http://www.oasis-open.org/docbook/xml/4.5/docbookx.dtd", None),
            None
        );
    }

    #[test]
    fn test_summarize() {
        let err = |m: &str| XIncludeError {
            message: m.to_string(),
            href: Some("x.xml".to_string()),
        };
        assert_eq!(
            summarize(&[err("could not load resource")]),
            "XInclude error for 'x.xml': could not load resource"
        );
        assert!(summarize(&[err("a"), err("b"), err("c")]).ends_with("(and 2 more)"));
    }
}
