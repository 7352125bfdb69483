//! The library that powers the xattrarc tools. Handles everything other
//! than reading CLI arguments and mapping artifact files: recording a
//! tree's extended attributes, encoding them into the compact artifact
//! format, executing an artifact to reapply them, and disassembling one
//! for inspection.
//!
//! The artifact is a position-independent program: a magic identifier, a
//! stream of 32-bit instruction words whose string references are relative
//! to the word that carries them, and a deduplicated string table. See
//! [`format`] for the contract, [`walk`]/[`encode`] for the producing side
//! and [`restore`]/[`disasm`] for the consuming side.

pub mod disasm;
pub mod encode;
pub mod format;
pub mod restore;
pub mod strings;
pub mod tree;
pub mod walk;

pub use crate::disasm::{disasm, DisasmError};
pub use crate::encode::{write_archive, EncodeError};
pub use crate::restore::{restore, Apply, DryRun, RestoreError, SetXattrs};
pub use crate::strings::{StrId, StringTable};
pub use crate::tree::{Attr, Entry};
pub use crate::walk::{Filter, WalkError, Walker};

/// Ceiling on composed path lengths, matching the kernel's limit.
pub const PATH_MAX: usize = 4096;
