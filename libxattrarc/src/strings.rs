//! The deduplicating string table.
//!
//! Every byte string an artifact references — entry names, attribute names,
//! length-prefixed attribute values — is held exactly once, in insertion
//! order. File offsets are assigned late, once the encoder knows where the
//! instruction stream ends.

use std::collections::HashMap;
use std::io::{self, Write};

/// Handle to an interned string. Cheap to copy and compare; two handles are
/// equal iff the strings they denote are byte-equal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StrId(usize);

#[derive(Debug)]
struct Record {
    bytes: Vec<u8>,
    offset: usize,
}

/// An insertion-ordered table of deduplicated byte strings.
///
/// The vector is the authority on order (and therefore on the on-disk
/// layout); the map only accelerates the byte-equality lookup.
#[derive(Debug, Default)]
pub struct StringTable {
    records: Vec<Record>,
    index: HashMap<Vec<u8>, StrId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `bytes`, interning them at the tail of the
    /// table if no byte-equal record exists yet.
    pub fn intern(&mut self, bytes: &[u8]) -> StrId {
        if let Some(&id) = self.index.get(bytes) {
            return id;
        }
        let id = StrId(self.records.len());
        self.index.insert(bytes.to_vec(), id);
        self.records.push(Record {
            bytes: bytes.to_vec(),
            offset: 0,
        });
        id
    }

    /// The interned bytes behind a handle.
    pub fn bytes_of(&self, id: StrId) -> &[u8] {
        &self.records[id.0].bytes
    }

    /// Size in bytes of the record behind a handle.
    pub fn len_of(&self, id: StrId) -> usize {
        self.records[id.0].bytes.len()
    }

    /// File offset of the record behind a handle. Meaningless until
    /// [`StringTable::set_offsets`] has run.
    pub fn offset_of(&self, id: StrId) -> usize {
        self.records[id.0].offset
    }

    /// Assign file offsets sequentially in insertion order, the first record
    /// landing at `initial` and each next one right after its predecessor.
    pub fn set_offsets(&mut self, initial: usize) {
        let mut offset = initial;
        for record in &mut self.records {
            record.offset = offset;
            offset += record.bytes.len();
        }
    }

    /// File offset of the first record, if any.
    pub fn start_offset(&self) -> Option<usize> {
        self.records.first().map(|record| record.offset)
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total size in bytes of the serialized table.
    pub fn table_len(&self) -> usize {
        self.records.iter().map(|record| record.bytes.len()).sum()
    }

    /// Write all records back to back, in insertion order.
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for record in &self.records {
            out.write_all(&record.bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_intern_dedups() -> TestResult {
        let mut table = StringTable::new();
        let a = table.intern(b"user.x\0");
        let b = table.intern(b"value");
        let c = table.intern(b"user.x\0");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.bytes_of(a), b"user.x\0");
        Ok(())
    }

    #[test]
    fn test_intern_is_exact() -> TestResult {
        let mut table = StringTable::new();
        // A prefix is not the same string
        let long = table.intern(b"abc\0");
        let short = table.intern(b"abc");
        assert_ne!(long, short);
        Ok(())
    }

    #[test]
    fn test_set_offsets() -> TestResult {
        let mut table = StringTable::new();
        let a = table.intern(b"aa");
        let b = table.intern(b"bbbb");
        let c = table.intern(b"c");

        table.set_offsets(0x10);
        assert_eq!(table.offset_of(a), 0x10);
        assert_eq!(table.offset_of(b), 0x12);
        assert_eq!(table.offset_of(c), 0x16);
        assert_eq!(table.start_offset(), Some(0x10));
        assert_eq!(table.table_len(), 7);
        Ok(())
    }

    #[test]
    fn test_write_preserves_insertion_order() -> TestResult {
        let mut table = StringTable::new();
        table.intern(b"second-alphabetically\0");
        table.intern(b"first-alphabetically\0");
        table.intern(b"second-alphabetically\0");

        let mut out = Vec::new();
        table.write_to(&mut out)?;
        assert_eq!(
            out,
            b"second-alphabetically\0first-alphabetically\0".to_vec()
        );
        Ok(())
    }

    #[test]
    fn test_empty_table() -> TestResult {
        let table = StringTable::new();
        assert!(table.is_empty());
        assert_eq!(table.start_offset(), None);
        assert_eq!(table.table_len(), 0);

        let mut out = Vec::new();
        table.write_to(&mut out)?;
        assert!(out.is_empty());
        Ok(())
    }
}
