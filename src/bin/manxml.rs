//! manxml - load man page sources with the documentation build's resolution
//! rules and write them back out.
//!
//! Usage: `manxml [OPTIONS] <FILES>...`
//!
//! Each page is parsed with references to the shared auxiliary files
//! redirected into `<srcdir>/man/`, its `xi:include`s expanded, and the
//! result written as UTF-8. `--deps` lists the auxiliary files each page
//! consulted, in the form a makefile rule expects.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use manxml::serial::{serialize_with_options, SerializeOptions};
use manxml::{PageLoader, ResolverConfig};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Load man page XML the way the documentation build does.
#[derive(Parser, Debug)]
#[command(name = "manxml", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Man page sources to load
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Top of the source tree; auxiliary files are read from <DIR>/man
    #[arg(long, value_name = "DIR", default_value = ".")]
    srcdir: PathBuf,

    /// Add a basename to the set of redirected auxiliary files
    #[arg(long = "known-file", value_name = "NAME")]
    known_files: Vec<String>,

    /// Print the auxiliary files each page depends on
    #[arg(long)]
    deps: bool,

    /// Do not write the loaded documents
    #[arg(long)]
    noout: bool,

    /// Write documents without re-indenting element content
    #[arg(long)]
    no_indent: bool,

    /// Write documents to FILE instead of standard output
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

const EXIT_SUCCESS: u8 = 0;
const EXIT_LOAD_ERROR: u8 = 1;
const EXIT_OUTPUT_ERROR: u8 = 2;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ResolverConfig::new(&cli.srcdir);
    for name in &cli.known_files {
        config = config.known_file(name.as_str());
    }
    let loader = PageLoader::new(config.build());

    let mut sink = match open_sink(&cli) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("manxml: {err:#}");
            return ExitCode::from(EXIT_OUTPUT_ERROR);
        }
    };

    let mut worst_exit = EXIT_SUCCESS;
    for file in &cli.files {
        let code = process_file(&cli, &loader, sink.as_mut(), file);
        worst_exit = worst_exit.max(code);
    }

    if let Err(err) = sink.flush().context("failed to flush output") {
        eprintln!("manxml: {err:#}");
        worst_exit = worst_exit.max(EXIT_OUTPUT_ERROR);
    }

    ExitCode::from(worst_exit)
}

/// Installs the stderr subscriber. `RUST_LOG` takes precedence over `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("manxml={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Where documents go. Nothing is opened under `--noout`.
fn open_sink(cli: &Cli) -> Result<Box<dyn Write>> {
    if cli.noout {
        return Ok(Box::new(io::sink()));
    }
    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

// ---------------------------------------------------------------------------
// Per-file processing
// ---------------------------------------------------------------------------

/// Loads one page and writes it out, returning its exit code.
fn process_file(cli: &Cli, loader: &PageLoader, sink: &mut dyn Write, file: &Path) -> u8 {
    let page = match loader
        .load(file)
        .with_context(|| format!("failed to load {}", file.display()))
    {
        Ok(page) => page,
        Err(err) => {
            eprintln!("manxml: {err:#}");
            return EXIT_LOAD_ERROR;
        }
    };

    if cli.deps {
        print_deps(cli, file, &page.dependencies);
    }

    if cli.noout {
        return EXIT_SUCCESS;
    }

    let options = SerializeOptions::default().indent(!cli.no_indent);
    let xml = serialize_with_options(&page.document, &options);
    if let Err(err) = sink
        .write_all(xml.as_bytes())
        .with_context(|| format!("failed to write {}", file.display()))
    {
        eprintln!("manxml: {err:#}");
        return EXIT_OUTPUT_ERROR;
    }

    EXIT_SUCCESS
}

/// Prints `file: dep dep...`. The line goes to stdout unless documents are
/// being written there.
fn print_deps(cli: &Cli, file: &Path, dependencies: &manxml::Dependencies) {
    let line = format!("{}: {dependencies}", file.display());
    if cli.noout || cli.output.is_some() {
        println!("{line}");
    } else {
        eprintln!("{line}");
    }
}
