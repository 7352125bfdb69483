//! The in-memory entry tree built by the walker and consumed by the encoder.
//!
//! An entry exists only for paths that carry at least one captured attribute
//! themselves or transitively contain a descendant that does. Sibling and
//! attribute order follow the order the filesystem reported them, which is
//! what makes artifacts reproducible for identical inputs.

use crate::strings::StrId;

/// One captured attribute: an interned NUL-terminated name and an interned
/// length-prefixed value blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Attr {
    pub name: StrId,
    pub value: StrId,
}

/// A named node for one path component, holding its attributes and, for
/// directories, the entries below it.
#[derive(Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: StrId,
    pub attrs: Vec<Attr>,
    pub subs: Vec<Entry>,
}

impl Entry {
    pub fn new(name: StrId) -> Self {
        Self {
            name,
            attrs: Vec::new(),
            subs: Vec::new(),
        }
    }
}

/// Find the entry named `name` in a sibling list, appending a fresh one if
/// absent, and return its index.
///
/// Keyed by interned handle, so a path component seen first as an attribute
/// carrier and later as a directory parent resolves to the same node.
pub fn find_or_add(entries: &mut Vec<Entry>, name: StrId) -> usize {
    match entries.iter().position(|entry| entry.name == name) {
        Some(index) => index,
        None => {
            entries.push(Entry::new(name));
            entries.len() - 1
        }
    }
}
