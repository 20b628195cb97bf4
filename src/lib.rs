//! # manxml
//!
//! Loads the XML sources of man pages the way the documentation build needs
//! them: references to a fixed set of shared auxiliary files (the generated
//! entity file, option and variable fragments) are redirected into the
//! documentation source tree, `xi:include`s are expanded, the auxiliary
//! files consulted are reported for dependency tracking, and the result is
//! written back out as pretty-printed UTF-8.
//!
//! ## Quick Start
//!
//! ```no_run
//! use manxml::{render, PageLoader, ResolverConfig};
//!
//! let loader = PageLoader::new(ResolverConfig::new("/src/systemd").build());
//! let page = loader.load("/src/systemd/man/systemctl.xml").unwrap();
//! println!("deps: {}", page.dependencies);
//! std::io::Write::write_all(&mut std::io::stdout(), &render(&page.document)).unwrap();
//! ```
//!
//! The XML engine underneath ([`parser`], [`tree`], [`xinclude`],
//! [`serial`]) is usable on its own:
//!
//! ```
//! use manxml::Document;
//!
//! let doc = Document::parse_str("<refentry><refnamediv/></refentry>").unwrap();
//! let root = doc.root_element().unwrap();
//! assert_eq!(doc.node_name(root), Some("refentry"));
//! ```

pub mod encoding;
pub mod error;
pub mod loader;
pub mod parser;
pub mod resolver;
pub mod serial;
pub mod tree;
pub mod xinclude;

pub use loader::{LoadError, LoadedPage, PageLoader};
pub use resolver::{Dependencies, DocsResolver, Resolution, ResolverConfig};
pub use serial::render;
pub use tree::{Attribute, Document, NodeId};
