//! Allow-list resolution of auxiliary man page files.
//!
//! Man pages pull shared fragments (option lists, variable tables, the
//! generated entity file) in through external entities and `xi:include`.
//! Those references are written relative to wherever the page is built
//! from, so they are redirected into `<srcdir>/man/` by basename. Only a
//! fixed set of known basenames is redirected; everything else is declined
//! and left to ordinary relative-path lookup.
//!
//! Every redirected reference records a build-system dependency string,
//! which the loader collects into a [`Dependencies`] set.
//!
//! # Examples
//!
//! ```
//! use manxml::resolver::{Resolution, ResolverConfig};
//!
//! let resolver = ResolverConfig::new("/src/systemd").build();
//! match resolver.resolve("../custom-entities.ent") {
//!     Resolution::Override { path, dependency } => {
//!         assert!(path.ends_with("man/custom-entities.ent.in"));
//!         assert_eq!(dependency, "$(topoutdir)/man/custom-entities.ent");
//!     }
//!     Resolution::NoOverride => unreachable!(),
//! }
//! assert_eq!(resolver.resolve("http://example.com/standard-options.xml"), Resolution::NoOverride);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

/// Basename of the generated entity definitions file.
pub const CUSTOM_ENTITIES: &str = "custom-entities.ent";

/// The auxiliary files redirected by default.
pub const DEFAULT_KNOWN_FILES: &[&str] = &[
    CUSTOM_ENTITIES,
    "standard-options.xml",
    "standard-conf.xml",
    "user-system-options.xml",
    "common-variables.xml",
    "less-variables.xml",
    "libsystemd-pkgconfig.xml",
    "threads-aware.xml",
    "vpick.xml",
];

/// The set of basenames eligible for redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryFiles(BTreeSet<String>);

impl AuxiliaryFiles {
    /// Creates a set from the given basenames.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if `basename` is a known auxiliary file.
    #[must_use]
    pub fn contains(&self, basename: &str) -> bool {
        self.0.contains(basename)
    }

    /// Iterates over the basenames in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the number of known files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no file is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AuxiliaryFiles {
    fn default() -> Self {
        Self::new(DEFAULT_KNOWN_FILES.iter().copied())
    }
}

/// A reference as it appears in a page: an entity system identifier or an
/// `xi:include` href.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    /// The reference exactly as written.
    pub raw: &'a str,
    /// The last path segment.
    pub basename: &'a str,
    /// Set when the reference contains a `:`, taken to be a URL scheme.
    pub has_scheme: bool,
}

impl<'a> Reference<'a> {
    /// Splits a raw reference into its parts.
    #[must_use]
    pub fn new(raw: &'a str) -> Self {
        let basename = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
        Self {
            raw,
            basename,
            has_scheme: raw.contains(':'),
        }
    }
}

/// The outcome of resolving a [`Reference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference is not ours; default resolution applies.
    NoOverride,
    /// Read `path` instead, and record `dependency`.
    Override {
        /// The real file on disk.
        path: PathBuf,
        /// The build-system-relative name to record as a dependency.
        dependency: String,
    },
}

/// Builder for a [`DocsResolver`].
///
/// ```
/// use manxml::resolver::ResolverConfig;
///
/// let resolver = ResolverConfig::new("/src")
///     .known_file("bpf-delegate.xml")
///     .srcdir_var("$(srcdir)")
///     .build();
/// assert!(resolver.known_files().contains("bpf-delegate.xml"));
/// assert!(resolver.known_files().contains("standard-options.xml"));
/// ```
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    srcdir: PathBuf,
    man_dir: String,
    entities_file: String,
    template_suffix: String,
    srcdir_var: String,
    outdir_var: String,
    known: AuxiliaryFiles,
}

impl ResolverConfig {
    /// Starts a configuration for the given documentation source directory,
    /// with the default allow-list and naming.
    pub fn new(srcdir: impl Into<PathBuf>) -> Self {
        Self {
            srcdir: srcdir.into(),
            man_dir: "man".to_string(),
            entities_file: CUSTOM_ENTITIES.to_string(),
            template_suffix: ".in".to_string(),
            srcdir_var: "$(topsrcdir)".to_string(),
            outdir_var: "$(topoutdir)".to_string(),
            known: AuxiliaryFiles::default(),
        }
    }

    /// Sets the subdirectory of the source directory holding the files.
    #[must_use]
    pub fn man_dir(mut self, dir: impl Into<String>) -> Self {
        self.man_dir = dir.into();
        self
    }

    /// Sets the basename of the generated entity file. It must also be in
    /// the allow-list to be redirected.
    #[must_use]
    pub fn entities_file(mut self, name: impl Into<String>) -> Self {
        self.entities_file = name.into();
        self
    }

    /// Sets the suffix of the entity file's on-disk template.
    #[must_use]
    pub fn template_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.template_suffix = suffix.into();
        self
    }

    /// Sets the make variable prefixed to ordinary dependencies.
    #[must_use]
    pub fn srcdir_var(mut self, var: impl Into<String>) -> Self {
        self.srcdir_var = var.into();
        self
    }

    /// Sets the make variable prefixed to the entity file dependency.
    #[must_use]
    pub fn outdir_var(mut self, var: impl Into<String>) -> Self {
        self.outdir_var = var.into();
        self
    }

    /// Adds one basename to the allow-list.
    #[must_use]
    pub fn known_file(mut self, name: impl Into<String>) -> Self {
        self.known.0.insert(name.into());
        self
    }

    /// Replaces the allow-list.
    #[must_use]
    pub fn known_files(mut self, files: AuxiliaryFiles) -> Self {
        self.known = files;
        self
    }

    /// Freezes the configuration.
    #[must_use]
    pub fn build(self) -> DocsResolver {
        DocsResolver { config: self }
    }
}

/// Redirects allow-listed references into the documentation source tree.
#[derive(Debug, Clone)]
pub struct DocsResolver {
    config: ResolverConfig,
}

impl DocsResolver {
    /// The documentation source directory.
    #[must_use]
    pub fn srcdir(&self) -> &Path {
        &self.config.srcdir
    }

    /// The allow-list.
    #[must_use]
    pub fn known_files(&self) -> &AuxiliaryFiles {
        &self.config.known
    }

    /// Decides where `raw` should be read from.
    ///
    /// References containing `:` and references whose basename is not in
    /// the allow-list are declined. The entity file is read from its
    /// template and recorded under the output directory, since the build
    /// generates it there.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Resolution {
        let reference = Reference::new(raw);
        if reference.has_scheme || !self.config.known.contains(reference.basename) {
            trace!(reference = raw, "declined");
            return Resolution::NoOverride;
        }

        let config = &self.config;
        let man = config.srcdir.join(&config.man_dir);
        let (path, dependency) = if reference.basename == config.entities_file {
            (
                man.join(format!("{}{}", reference.basename, config.template_suffix)),
                format!("{}/{}/{}", config.outdir_var, config.man_dir, reference.basename),
            )
        } else {
            (
                man.join(reference.basename),
                format!("{}/{}/{}", config.srcdir_var, config.man_dir, reference.basename),
            )
        };
        debug!(reference = raw, path = %path.display(), "redirecting");
        Resolution::Override { path, dependency }
    }
}

/// The auxiliary files a load consulted, as build-system-relative names.
///
/// Ordered, so printing it for a build rule is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies(BTreeSet<String>);

impl Dependencies {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dependency. Returns `false` if it was already present.
    pub fn insert(&mut self, dependency: impl Into<String>) -> bool {
        self.0.insert(dependency.into())
    }

    /// Returns `true` if `dependency` was recorded.
    #[must_use]
    pub fn contains(&self, dependency: &str) -> bool {
        self.0.contains(dependency)
    }

    /// Number of recorded dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl Extend<String> for Dependencies {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<String> for Dependencies {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Dependencies {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Space-separated, the form a make rule takes.
impl fmt::Display for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for dependency in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(dependency)?;
            first = false;
        }
        Ok(())
    }
}
