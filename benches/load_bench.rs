#![allow(clippy::expect_used)]

use std::fmt::Write;
use std::fs;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use manxml::serial::serialize;
use manxml::{Document, PageLoader, ResolverConfig};

// ---------------------------------------------------------------------------
// Document generators
// ---------------------------------------------------------------------------

/// Generates a man page with `options` option entries, each pulling in a
/// fragment from `standard-options.xml` and using two entities.
fn make_page(options: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version='1.0'?>
<!DOCTYPE refentry PUBLIC "-//OASIS//DTD DocBook XML V4.5//EN"
  "http://www.oasis-open.org/docbook/xml/4.5/docbookx.dtd" [
<!ENTITY % entities SYSTEM "custom-entities.ent" >
%entities;
]>
<refentry id="bench" xmlns:xi="http://www.w3.org/2001/XInclude">
  <refsect1><title>Options</title>
    <variablelist>
"#,
    );
    for i in 0..options {
        let _ = writeln!(
            xml,
            "      <varlistentry><term><option>--opt-{i}</option></term>\
             <listitem><para>Uses <filename>&MOUNT_PATH;</filename> on &fedora_latest_version;.</para></listitem></varlistentry>"
        );
        let _ = writeln!(
            xml,
            "      <xi:include href=\"standard-options.xml\" xpointer=\"{}\" />",
            if i % 2 == 0 { "help" } else { "version" }
        );
    }
    xml.push_str("    </variablelist>\n  </refsect1>\n</refentry>\n");
    xml
}

const STANDARD_OPTIONS: &str = r#"<?xml version="1.0"?>
<variablelist>
  <varlistentry id='help'><term><option>-h</option></term>
    <listitem><para>Print a short help text and exit.</para></listitem></varlistentry>
  <varlistentry id='version'><term><option>--version</option></term>
    <listitem><para>Print a short version string and exit.</para></listitem></varlistentry>
</variablelist>
"#;

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_parse(c: &mut Criterion) {
    let xml = make_page(200).replace("%entities;", "");
    let xml = xml.replace("&MOUNT_PATH;", "/usr/bin/mount").replace("&fedora_latest_version;", "40");
    c.bench_function("parse_page_200", |b| {
        b.iter(|| Document::parse_str(black_box(&xml)).expect("parse"));
    });
}

fn bench_load(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let man = dir.path().join("man");
    fs::create_dir(&man).expect("mkdir");
    fs::write(
        man.join("custom-entities.ent.in"),
        "<!ENTITY MOUNT_PATH \"/usr/bin/mount\">\n<!ENTITY fedora_latest_version \"40\">\n",
    )
    .expect("write entities");
    fs::write(man.join("standard-options.xml"), STANDARD_OPTIONS).expect("write options");
    let page = man.join("bench.xml");
    fs::write(&page, make_page(200)).expect("write page");

    let loader = PageLoader::new(ResolverConfig::new(dir.path()).build());
    c.bench_function("load_page_200", |b| {
        b.iter(|| loader.load(black_box(&page)).expect("load"));
    });

    let loaded = loader.load(&page).expect("load");
    c.bench_function("serialize_page_200", |b| {
        b.iter(|| serialize(black_box(&loaded.document)));
    });
}

criterion_group!(benches, bench_parse, bench_load);
criterion_main!(benches);
