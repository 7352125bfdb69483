//! The restore interpreter: execute an artifact's instruction stream and
//! reapply the recorded attributes beneath a destination root.
//!
//! The artifact is handed in as a plain byte slice (the binaries map the
//! file read-only); every string and value reference is resolved as a
//! bounds-checked sub-slice, and anything out of range fails closed.
//!
//! Restore is not transactional: a failure mid-stream exits with every
//! previously applied attribute left in place.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::{debug, trace};
use thiserror::Error;

use crate::format::{self, FormatError, TAG_ATTR, TAG_FILE, TAG_SET, TAG_SUB, WORD_SIZE};
use crate::PATH_MAX;

/// All errors that can be encountered while restoring.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RestoreError {
    /// The artifact is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A composed path outgrew [`PATH_MAX`].
    #[error("path too long below {0:?}")]
    PathTooLong(String),

    /// A `TAG_SET` arrived before any `TAG_FILE` selected a file.
    #[error("set instruction at offset {0:#x} before any file")]
    SetWithoutFile(usize),

    /// A `TAG_SET` arrived before any `TAG_ATTR` selected a name.
    #[error("set instruction at offset {0:#x} before any attribute name")]
    SetWithoutAttr(usize),

    /// Applying an attribute failed.
    #[error("can't set {name:?} of {path:?}")]
    Apply {
        path: String,
        name: String,
        source: io::Error,
    },
}

/// Where decoded attributes go. The production implementation performs the
/// l-variant syscall; the dry-run one prints what would happen.
pub trait Apply {
    fn apply(&mut self, path: &Path, name: &OsStr, value: &[u8]) -> io::Result<()>;
}

/// Apply attributes for real, on the link itself when the path is a
/// symbolic link.
pub struct SetXattrs;

impl Apply for SetXattrs {
    fn apply(&mut self, path: &Path, name: &OsStr, value: &[u8]) -> io::Result<()> {
        xattr::set(path, name, value)
    }
}

/// Print each would-be application as `path\tname\tvalue` instead of
/// touching the filesystem. Values are written raw, on the assumption that
/// they are printable text.
pub struct DryRun<W: Write>(pub W);

impl<W: Write> Apply for DryRun<W> {
    fn apply(&mut self, path: &Path, name: &OsStr, value: &[u8]) -> io::Result<()> {
        self.0.write_all(path.as_os_str().as_bytes())?;
        self.0.write_all(b"\t")?;
        self.0.write_all(name.as_bytes())?;
        self.0.write_all(b"\t")?;
        self.0.write_all(value)?;
        self.0.write_all(b"\n")
    }
}

/// Interpreter state: the mapped artifact, the path buffer, and the current
/// attribute name, which deliberately spans the entire traversal (its twin
/// lives in the encoder).
struct Interpreter<'a> {
    data: &'a [u8],
    path: Vec<u8>,
    attr: Option<&'a [u8]>,
}

/// Execute the artifact in `data`, applying each recorded attribute under
/// `root` through `apply`, in exactly the order the stream dictates.
pub fn restore(data: &[u8], root: &Path, apply: &mut dyn Apply) -> Result<(), RestoreError> {
    format::check_magic(data)?;
    debug!("Restoring under {root:?}");

    let mut interpreter = Interpreter {
        data,
        path: Vec::new(),
        attr: None,
    };
    interpreter.process(format::MAGIC_V1.len(), 0, root.as_os_str().as_bytes(), apply)?;
    Ok(())
}

impl<'a> Interpreter<'a> {
    /// Interpret one directory level starting at instruction offset `pc`,
    /// returning the offset just past the sentinel that ended it.
    fn process(
        &mut self,
        mut pc: usize,
        dir_len: usize,
        subpath: &'a [u8],
        apply: &mut dyn Apply,
    ) -> Result<usize, RestoreError> {
        self.path.truncate(dir_len);
        self.push_path(subpath)?;
        if self.path.last() != Some(&b'/') {
            self.push_path(b"/")?;
        }
        let dir_len = self.path.len();
        trace!("Entering {:?}", String::from_utf8_lossy(&self.path));

        let mut file_len: Option<usize> = None;
        loop {
            let word_offset = pc;
            let word = format::word_at(self.data, pc)?;
            pc += WORD_SIZE;
            let str_offset = format::string_offset(word_offset, word);

            match format::tag(word) {
                TAG_SUB => {
                    if word == TAG_SUB {
                        return Ok(pc);
                    }
                    let name = self.str_at(str_offset)?;
                    pc = self.process(pc, dir_len, name, apply)?;
                    // The recursion reused the buffer beyond dir_len
                    file_len = None;
                }
                TAG_FILE => {
                    let name = self.str_at(str_offset)?;
                    self.path.truncate(dir_len);
                    self.push_path(name)?;
                    file_len = Some(self.path.len());
                }
                TAG_ATTR => {
                    self.attr = Some(self.str_at(str_offset)?);
                }
                TAG_SET => {
                    let file_len = file_len.ok_or(RestoreError::SetWithoutFile(word_offset))?;
                    let attr = self.attr.ok_or(RestoreError::SetWithoutAttr(word_offset))?;
                    let value = format::value_at(self.data, str_offset)?;

                    let file = Path::new(OsStr::from_bytes(&self.path[..file_len]));
                    trace!("Setting {:?} on {file:?}", String::from_utf8_lossy(attr));
                    apply
                        .apply(file, OsStr::from_bytes(attr), value)
                        .map_err(|source| RestoreError::Apply {
                            path: String::from_utf8_lossy(&self.path[..file_len]).into_owned(),
                            name: String::from_utf8_lossy(attr).into_owned(),
                            source,
                        })?;
                }
                _ => unreachable!("two-bit tag"),
            }
        }
    }

    fn str_at(&self, offset: usize) -> Result<&'a [u8], FormatError> {
        format::str_at(self.data, offset)
    }

    fn push_path(&mut self, bytes: &[u8]) -> Result<(), RestoreError> {
        if self.path.len() + bytes.len() > PATH_MAX {
            return Err(RestoreError::PathTooLong(
                String::from_utf8_lossy(&self.path).into_owned(),
            ));
        }
        self.path.extend_from_slice(bytes);
        Ok(())
    }
}
