//! Integration tests for page loading against on-disk source trees.

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use manxml::{render, Dependencies, Document, LoadError, NodeId, PageLoader, ResolverConfig};

const PAGE_PROLOG: &str = r#"<?xml version='1.0'?>
<!DOCTYPE refentry PUBLIC "-//OASIS//DTD DocBook XML V4.5//EN"
  "http://www.oasis-open.org/docbook/xml/4.5/docbookx.dtd" [
<!ENTITY % entities SYSTEM "custom-entities.ent" >
%entities;
]>
"#;

const ENTITIES: &str = r#"<!ENTITY fedora_latest_version "40">
<!ENTITY KILL_USER_PROCESSES "no">
<!ENTITY DEBUGTUNNEL "/usr/lib/systemd/systemd-debug-generator">
"#;

const STANDARD_OPTIONS: &str = r#"<?xml version="1.0"?>
<!DOCTYPE variablelist PUBLIC "-//OASIS//DTD DocBook XML V4.5//EN"
  "http://www.oasis-open.org/docbook/xml/4.5/docbookx.dtd">
<variablelist>
  <varlistentry id='help'>
    <term><option>-h</option></term>
    <term><option>--help</option></term>
    <listitem><para>Print a short help text and exit.</para></listitem>
  </varlistentry>
  <varlistentry id='version'>
    <term><option>--version</option></term>
    <listitem><para>Print a short version string and exit.</para></listitem>
  </varlistentry>
</variablelist>
"#;

/// A scratch source tree with a `man/` directory.
struct Tree {
    dir: TempDir,
}

impl Tree {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("man")).unwrap();
        Self { dir }
    }

    /// A tree with the entity template and `standard-options.xml`.
    fn with_aux() -> Self {
        let tree = Self::new();
        tree.write("man/custom-entities.ent.in", ENTITIES);
        tree.write("man/standard-options.xml", STANDARD_OPTIONS);
        tree
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn loader(&self) -> PageLoader {
        PageLoader::new(ResolverConfig::new(self.root()).build())
    }
}

fn deps(page_deps: &Dependencies) -> Vec<&str> {
    page_deps.iter().collect()
}

fn first_named(doc: &Document, name: &str) -> Option<NodeId> {
    let root = doc.root();
    doc.descendants(root)
        .find(|&n| doc.node_name(n) == Some(name))
}

#[test]
fn test_page_without_external_references_has_no_dependencies() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/plain.xml",
        "<refentry id='plain'><refnamediv><refname>plain</refname></refnamediv></refentry>",
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert!(loaded.dependencies.is_empty());
    let root = loaded.document.root_element().unwrap();
    assert_eq!(loaded.document.node_name(root), Some("refentry"));
}

#[test]
fn test_entity_file_is_read_from_template() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        &format!(
            "{PAGE_PROLOG}<refentry id='foo'>\n  <para>Fedora &fedora_latest_version;, KillUserProcesses=&KILL_USER_PROCESSES;.</para>\n</refentry>\n"
        ),
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert_eq!(deps(&loaded.dependencies), vec!["$(topoutdir)/man/custom-entities.ent"]);

    let para = first_named(&loaded.document, "para").unwrap();
    assert_eq!(
        loaded.document.text_content(para),
        "Fedora 40, KillUserProcesses=no."
    );
}

#[test]
fn test_standard_options_include_selects_by_id() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry id='foo' xmlns:xi="http://www.w3.org/2001/XInclude">
  <variablelist>
    <xi:include href="standard-options.xml" xpointer="help" />
    <xi:include href="standard-options.xml" xpointer="version" />
  </variablelist>
</refentry>
"#,
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert_eq!(deps(&loaded.dependencies), vec!["$(topsrcdir)/man/standard-options.xml"]);

    let doc = &loaded.document;
    let list = first_named(doc, "variablelist").unwrap();
    let ids: Vec<&str> = doc
        .children(list)
        .filter(|&n| doc.node(n).kind.is_element())
        .map(|n| doc.attribute(n, "id").unwrap())
        .collect();
    assert_eq!(ids, vec!["help", "version"]);
    assert!(first_named(doc, "include").is_none());
}

#[test]
fn test_entities_and_includes_together() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        &format!(
            r#"{PAGE_PROLOG}<refentry id='foo' xmlns:xi="http://www.w3.org/2001/XInclude">
  <para>&DEBUGTUNNEL;</para>
  <variablelist><xi:include href="standard-options.xml" xpointer="help" /></variablelist>
</refentry>
"#
        ),
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert_eq!(
        deps(&loaded.dependencies),
        vec![
            "$(topoutdir)/man/custom-entities.ent",
            "$(topsrcdir)/man/standard-options.xml",
        ]
    );
}

#[test]
fn test_loading_twice_gives_identical_output() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        &format!(
            r#"{PAGE_PROLOG}<refentry id='foo' xmlns:xi="http://www.w3.org/2001/XInclude">
  <para>&fedora_latest_version;</para>
  <variablelist><xi:include href="standard-options.xml" xpointer="version" /></variablelist>
</refentry>
"#
        ),
    );

    let loader = tree.loader();
    let first = loader.load(&page).unwrap();
    let second = loader.load(&page).unwrap();
    assert_eq!(first.dependencies, second.dependencies);
    assert_eq!(render(&first.document), render(&second.document));
}

#[test]
fn test_load_into_accumulates_across_pages() {
    let tree = Tree::with_aux();
    let a = tree.write(
        "man/a.xml",
        &format!("{PAGE_PROLOG}<refentry id='a'><para>&KILL_USER_PROCESSES;</para></refentry>\n"),
    );
    let b = tree.write(
        "man/b.xml",
        r#"<refentry id='b' xmlns:xi="http://www.w3.org/2001/XInclude"><variablelist><xi:include href="standard-options.xml" xpointer="help"/></variablelist></refentry>"#,
    );

    let loader = tree.loader();
    let mut all = Dependencies::new();
    loader.load_into(&a, &mut all).unwrap();
    loader.load_into(&b, &mut all).unwrap();
    assert_eq!(all.len(), 2);

    // A fresh load does not see what earlier loads recorded.
    assert_eq!(loader.load(&b).unwrap().dependencies.len(), 1);
}

#[test]
fn test_declined_relative_include_is_read_next_to_page() {
    let tree = Tree::with_aux();
    tree.write("man/fragments/notes.xml", "<para id='notes'>Local notes.</para>");
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="fragments/notes.xml"/></refentry>"#,
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert!(loaded.dependencies.is_empty());
    let para = first_named(&loaded.document, "para").unwrap();
    assert_eq!(loaded.document.text_content(para), "Local notes.");
}

#[test]
fn test_missing_declined_include_is_xinclude_error() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="nonexistent.xml"/></refentry>"#,
    );

    let err = tree.loader().load(&page).unwrap_err();
    match err {
        LoadError::XInclude { path, errors } => {
            assert_eq!(path, page);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].href.as_deref(), Some("nonexistent.xml"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_fallback_applies_when_declined_include_fails() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude">
  <xi:include href="http://example.com/remote.xml">
    <xi:fallback><para>offline</para></xi:fallback>
  </xi:include>
</refentry>"#,
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert!(loaded.dependencies.is_empty());
    let para = first_named(&loaded.document, "para").unwrap();
    assert_eq!(loaded.document.text_content(para), "offline");
}

#[test]
fn test_missing_allow_listed_include_is_io_error() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="common-variables.xml" xpointer="log-level"/></refentry>"#,
    );

    let loader = tree.loader();
    let mut recorded = Dependencies::new();
    let err = loader.load_into(&page, &mut recorded).unwrap_err();
    match err {
        LoadError::Io { path, .. } => {
            assert_eq!(path, tree.root().join("man").join("common-variables.xml"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(recorded.contains("$(topsrcdir)/man/common-variables.xml"));
}

#[test]
fn test_missing_allow_listed_include_uses_fallback() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="vpick.xml"><xi:fallback><para>fb</para></xi:fallback></xi:include></refentry>"#,
    );

    let loaded = tree.loader().load(&page).unwrap();
    assert_eq!(deps(&loaded.dependencies), vec!["$(topsrcdir)/man/vpick.xml"]);
    let para = first_named(&loaded.document, "para").unwrap();
    assert_eq!(loaded.document.text_content(para), "fb");
}

#[test]
fn test_missing_file_behind_fallback_does_not_mask_other_failures() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude">
  <xi:include href="vpick.xml"><xi:fallback><para>fb</para></xi:fallback></xi:include>
  <xi:include href="nonexistent.xml"/>
</refentry>"#,
    );

    let err = tree.loader().load(&page).unwrap_err();
    match err {
        LoadError::XInclude { errors, .. } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].href.as_deref(), Some("nonexistent.xml"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_entity_template_is_io_error() {
    let tree = Tree::new();
    let page = tree.write(
        "man/foo.xml",
        &format!("{PAGE_PROLOG}<refentry><para>&fedora_latest_version;</para></refentry>\n"),
    );

    let err = tree.loader().load(&page).unwrap_err();
    match err {
        LoadError::Io { path, .. } => {
            assert_eq!(path, tree.root().join("man").join("custom-entities.ent.in"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unreadable_page_is_io_error() {
    let tree = Tree::new();
    let page = tree.root().join("man").join("absent.xml");

    let err = tree.loader().load(&page).unwrap_err();
    assert!(matches!(err, LoadError::Io { ref path, .. } if *path == page));
    assert!(err.to_string().starts_with("failed to read "));
}

#[test]
fn test_malformed_page_is_parse_error() {
    let tree = Tree::new();
    let page = tree.write("man/bad.xml", "<refentry><para></refentry>");

    let err = tree.loader().load(&page).unwrap_err();
    assert!(matches!(err, LoadError::Parse { .. }), "{err}");
}

#[test]
fn test_known_file_extends_allow_list() {
    let tree = Tree::with_aux();
    tree.write(
        "man/bpf-delegate.xml",
        "<para id='bpf'>Delegation.</para>",
    );
    // A same-named decoy next to the page must not be read.
    tree.write("man/pages/bpf-delegate.xml", "<para id='bpf'>Decoy.</para>");
    let page = tree.write(
        "man/pages/foo.xml",
        r#"<refentry xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="bpf-delegate.xml"/></refentry>"#,
    );

    let loader = PageLoader::new(
        ResolverConfig::new(tree.root())
            .known_file("bpf-delegate.xml")
            .build(),
    );
    let loaded = loader.load(&page).unwrap();
    assert_eq!(deps(&loaded.dependencies), vec!["$(topsrcdir)/man/bpf-delegate.xml"]);
    let para = first_named(&loaded.document, "para").unwrap();
    assert_eq!(loaded.document.text_content(para), "Delegation.");
}

#[test]
fn test_rendered_page_keeps_doctype_and_expansions() {
    let tree = Tree::with_aux();
    let page = tree.write(
        "man/foo.xml",
        &format!("{PAGE_PROLOG}<refentry id='foo'><para>&fedora_latest_version;</para></refentry>\n"),
    );

    let loaded = tree.loader().load(&page).unwrap();
    let out = String::from_utf8(render(&loaded.document)).unwrap();
    assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE refentry PUBLIC"));
    assert!(out.contains("<para>40</para>"), "{out}");
}
