use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use libxattrarc as lib;
use xattrarc::map_artifact;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Disassemble the artifact IN_FILE, tracing \
paths as if it were being restored beneath ROOT_DIR.", long_about = None)]
struct Args {
    /// Input artifact filename
    in_file: PathBuf,

    /// Root directory used to seed the traced paths
    root_dir: PathBuf,

    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let map = map_artifact(&args.in_file)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    lib::disasm(&map, &args.root_dir, &mut out)
        .with_context(|| format!("couldn't disassemble \"{}\"", args.in_file.display()))
}
