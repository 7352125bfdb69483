//! The recorder: walk a directory tree and capture every extended attribute
//! into an entry tree backed by the string table.
//!
//! The walk is read-only on the source filesystem. All xattr calls are the
//! l-variants, so symbolic links are inspected themselves and never
//! followed. Sibling order is whatever `read_dir` returns and attribute
//! order is whatever `listxattr` returns; the encoder relies on that for
//! artifact reproducibility.

use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use regex::bytes::Regex;
use thiserror::Error;

use crate::strings::{StrId, StringTable};
use crate::tree::{find_or_add, Attr, Entry};
use crate::PATH_MAX;

/// Largest attribute value the artifact can carry: the value blob's length
/// prefix is a `u16`.
pub const MAX_VALUE_LEN: usize = 65535;

/// All errors that can be encountered while recording a tree.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WalkError {
    /// The `-m` pattern didn't compile.
    #[error("invalid attribute-name pattern {pattern:?}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    /// A composed path outgrew [`PATH_MAX`].
    #[error("path too long below {0:?}")]
    PathTooLong(String),

    /// A directory couldn't be opened or iterated.
    #[error("couldn't read directory {path:?}")]
    ReadDir { path: PathBuf, source: io::Error },

    /// `listxattr` failed.
    #[error("couldn't list attributes of {path:?}")]
    ListAttrs { path: PathBuf, source: io::Error },

    /// `getxattr` failed.
    #[error("couldn't get attribute {name:?} of {path:?}")]
    GetAttr {
        path: PathBuf,
        name: String,
        source: io::Error,
    },

    /// An attribute was listed but gone by the time its value was fetched.
    #[error("attribute {name:?} of {path:?} disappeared during the walk")]
    AttrVanished { path: PathBuf, name: String },

    /// An attribute value doesn't fit the format's 2-byte length prefix.
    #[error("attribute {name:?} of {path:?} is too big ({len} bytes)")]
    ValueTooBig {
        path: PathBuf,
        name: String,
        len: usize,
    },

    /// All other errors (dump output, mainly).
    #[error("I/O error")]
    IoError(#[from] io::Error),
}

/// A compiled attribute-name filter. Names are raw bytes, so this wraps
/// `regex::bytes`; matching is an unanchored search, as with the original's
/// POSIX `regexec`.
#[derive(Debug)]
pub struct Filter(Regex);

impl Filter {
    pub fn new(pattern: &str) -> Result<Self, WalkError> {
        let regex = Regex::new(pattern).map_err(|source| WalkError::BadPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self(regex))
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.0.is_match(name)
    }
}

/// The recorder context threaded down the recursive walk: the string table
/// being filled, the optional name filter, the optional dump writer, and
/// the growable path buffer.
pub struct Walker<'a> {
    table: &'a mut StringTable,
    filter: Option<&'a Filter>,
    dump: Option<&'a mut dyn Write>,
    path: Vec<u8>,
}

impl<'a> Walker<'a> {
    pub fn new(table: &'a mut StringTable) -> Self {
        Self {
            table,
            filter: None,
            dump: None,
            path: Vec::new(),
        }
    }

    /// Capture only attributes whose name matches `filter`.
    pub fn with_filter(mut self, filter: &'a Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Additionally write each captured `path\tname\tvalue` triple to
    /// `dump`, raw bytes and all.
    pub fn with_dump(mut self, dump: &'a mut dyn Write) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Walk `root` and return the captured top-level entries.
    pub fn walk(mut self, root: &Path) -> Result<Vec<Entry>, WalkError> {
        debug!("Walking {root:?}");
        self.push_path(root.as_os_str().as_bytes())?;

        let mut entries = Vec::new();
        self.walk_dir(&mut entries, true)?;

        debug!(
            "Walk of {root:?} captured {} top-level entries, {} strings",
            entries.len(),
            self.table.len()
        );
        Ok(entries)
    }

    /// Walk the directory currently in the path buffer, filling `entries`
    /// with what's found beneath it.
    fn walk_dir(&mut self, entries: &mut Vec<Entry>, is_root: bool) -> Result<(), WalkError> {
        trace!("Entering directory {:?}", self.path_buf());

        let dir = fs::read_dir(self.current_path()).map_err(|source| WalkError::ReadDir {
            path: self.path_buf(),
            source,
        })?;

        if self.path.last() != Some(&b'/') {
            self.push_path(b"/")?;
        }
        let dir_len = self.path.len();

        // read_dir never reports `.`, but at the topmost level the root
        // directory's own attributes belong in the artifact, recorded
        // under that name.
        if is_root {
            self.push_path(b".")?;
            self.record_entry(entries, b".")?;
            self.path.truncate(dir_len);
        }

        for dirent in dir {
            let dirent = dirent.map_err(|source| WalkError::ReadDir {
                path: self.path_buf(),
                source,
            })?;
            let file_name = dirent.file_name();
            let name = file_name.as_bytes();

            self.path.truncate(dir_len);
            self.push_path(name)?;
            self.record_entry(entries, name)?;

            let file_type = dirent.file_type().map_err(|source| WalkError::ReadDir {
                path: self.path_buf(),
                source,
            })?;
            // file_type comes from the dirent, so symlinks to directories
            // stay symlinks and are not descended into
            if file_type.is_dir() {
                let mut subs = Vec::new();
                self.walk_dir(&mut subs, false)?;
                self.path.truncate(dir_len + name.len());
                if !subs.is_empty() {
                    trace!("Attaching {} sub-entries under {name:?}", subs.len());
                    let id = self.intern_name(name);
                    let index = find_or_add(entries, id);
                    entries[index].subs = subs;
                }
            }
        }

        self.path.truncate(dir_len);
        Ok(())
    }

    /// List and fetch the attributes of the path currently in the buffer,
    /// creating an entry named `name` on the first one that survives the
    /// filter.
    fn record_entry(&mut self, entries: &mut Vec<Entry>, name: &[u8]) -> Result<(), WalkError> {
        let names = xattr::list(self.current_path()).map_err(|source| WalkError::ListAttrs {
            path: self.path_buf(),
            source,
        })?;

        let mut entry_index = None;
        for attr_name in names {
            let attr_bytes = attr_name.as_bytes();
            if let Some(filter) = self.filter {
                if !filter.matches(attr_bytes) {
                    trace!("Skipping filtered attribute {attr_name:?}");
                    continue;
                }
            }

            let value = xattr::get(self.current_path(), &attr_name)
                .map_err(|source| WalkError::GetAttr {
                    path: self.path_buf(),
                    name: attr_name.to_string_lossy().into_owned(),
                    source,
                })?
                .ok_or_else(|| WalkError::AttrVanished {
                    path: self.path_buf(),
                    name: attr_name.to_string_lossy().into_owned(),
                })?;
            if value.len() > MAX_VALUE_LEN {
                return Err(WalkError::ValueTooBig {
                    path: self.path_buf(),
                    name: attr_name.to_string_lossy().into_owned(),
                    len: value.len(),
                });
            }

            trace!(
                "Captured {:?} {attr_name:?} ({} bytes)",
                self.path_buf(),
                value.len()
            );
            if let Some(dump) = self.dump.as_deref_mut() {
                dump.write_all(&self.path)?;
                dump.write_all(b"\t")?;
                dump.write_all(attr_bytes)?;
                dump.write_all(b"\t")?;
                dump.write_all(&value)?;
                dump.write_all(b"\n")?;
            }

            let index = match entry_index {
                Some(index) => index,
                None => {
                    let id = self.intern_name(name);
                    let index = find_or_add(entries, id);
                    entry_index = Some(index);
                    index
                }
            };

            let name_id = self.intern_name(attr_bytes);
            let mut blob = Vec::with_capacity(2 + value.len());
            blob.extend_from_slice(&(value.len() as u16).to_le_bytes());
            blob.extend_from_slice(&value);
            let value_id = self.table.intern(&blob);
            entries[index].attrs.push(Attr {
                name: name_id,
                value: value_id,
            });
        }

        Ok(())
    }

    /// Intern `name` with its terminating NUL, the way every name string is
    /// stored in the table.
    fn intern_name(&mut self, name: &[u8]) -> StrId {
        let mut bytes = Vec::with_capacity(name.len() + 1);
        bytes.extend_from_slice(name);
        bytes.push(0);
        self.table.intern(&bytes)
    }

    fn push_path(&mut self, bytes: &[u8]) -> Result<(), WalkError> {
        if self.path.len() + bytes.len() > PATH_MAX {
            return Err(WalkError::PathTooLong(
                String::from_utf8_lossy(&self.path).into_owned(),
            ));
        }
        self.path.extend_from_slice(bytes);
        Ok(())
    }

    fn current_path(&self) -> &Path {
        Path::new(std::ffi::OsStr::from_bytes(&self.path))
    }

    fn path_buf(&self) -> PathBuf {
        self.current_path().to_path_buf()
    }
}
