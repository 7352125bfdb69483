use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use libxattrarc as lib;
use xattrarc::map_artifact;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Reapply the extended attributes recorded in \
the artifact IN_FILE to the files beneath ROOT_DIR.

Attributes are applied in artifact order; a failure part-way through \
leaves the already-applied attributes in place.", long_about = None)]
struct Args {
    /// Input artifact filename
    in_file: PathBuf,

    /// Destination root directory
    root_dir: PathBuf,

    /// Dry run: print the would-be applications instead of performing them
    #[clap(short, long, action)]
    dry_run: bool,

    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let map = map_artifact(&args.in_file)?;

    let result = if args.dry_run {
        let stdout = io::stdout();
        lib::restore(&map, &args.root_dir, &mut lib::DryRun(stdout.lock()))
    } else {
        lib::restore(&map, &args.root_dir, &mut lib::SetXattrs)
    };
    result.with_context(|| format!("couldn't restore from \"{}\"", args.in_file.display()))
}
