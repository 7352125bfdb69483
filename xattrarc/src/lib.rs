//! CLI plumbing shared by the three xattrarc binaries.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::debug;
use memmap2::Mmap;

/// Open an artifact, refuse anything but a regular file, and map it
/// read-only. The mapping lives until the process exits.
pub fn map_artifact(path: &Path) -> Result<Mmap> {
    let file =
        File::open(path).with_context(|| format!("couldn't open artifact \"{}\"", path.display()))?;
    let metadata = file
        .metadata()
        .with_context(|| format!("couldn't stat artifact \"{}\"", path.display()))?;
    if !metadata.is_file() {
        bail!("\"{}\" should be a regular file", path.display());
    }

    // The mapping is private and read-only; a concurrent writer could still
    // change the bytes underneath us, which at worst ruins this one run
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("couldn't map artifact \"{}\"", path.display()))?;
    debug!("Mapped {} bytes of \"{}\"", map.len(), path.display());
    Ok(map)
}
