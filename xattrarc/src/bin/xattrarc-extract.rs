use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

use libxattrarc as lib;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Capture the extended attributes of every \
file and directory beneath ROOT_DIR into the artifact OUT_FILE.

The artifact can later be replayed with xattrarc-restore, or inspected \
with xattrarc-debug.", long_about = None)]
struct Args {
    /// Output artifact filename
    out_file: PathBuf,

    /// Root directory to walk
    root_dir: PathBuf,

    /// Also print each captured triple to stdout, tab-separated
    #[clap(short, long, action)]
    dump: bool,

    /// Only capture attributes whose name matches this regular expression
    ///
    /// The match is an unanchored search over the attribute name; anchor
    /// with `^`/`$` as needed, e.g. `-m '^security\.'`. A file whose
    /// attributes are all filtered out leaves no trace in the artifact.
    #[clap(short = 'm', long = "match", value_parser, value_name = "PATTERN")]
    pattern: Option<String>,

    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let filter = match &args.pattern {
        Some(pattern) => {
            Some(lib::Filter::new(pattern).context("couldn't compile the `--match` pattern")?)
        }
        None => None,
    };

    let mut table = lib::StringTable::new();
    let stdout = io::stdout();
    let mut dump = stdout.lock();

    let mut walker = lib::Walker::new(&mut table);
    if let Some(filter) = &filter {
        walker = walker.with_filter(filter);
    }
    if args.dump {
        walker = walker.with_dump(&mut dump);
    }
    let entries = walker
        .walk(&args.root_dir)
        .with_context(|| format!("couldn't walk \"{}\"", args.root_dir.display()))?;
    debug!("Captured {} top-level entries", entries.len());

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(&args.out_file)
        .with_context(|| format!("couldn't open output file \"{}\"", args.out_file.display()))?;
    let mut out = BufWriter::new(file);
    lib::write_archive(&mut out, &entries, &mut table)
        .with_context(|| format!("couldn't write artifact \"{}\"", args.out_file.display()))?;
    out.flush()
        .with_context(|| format!("couldn't write artifact \"{}\"", args.out_file.display()))?;

    Ok(())
}
