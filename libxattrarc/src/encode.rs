//! The artifact encoder.
//!
//! Encoding is two identical passes over the entry tree. The first pass has
//! no writer and only advances a byte cursor, which tells us how long the
//! instruction stream will be; string offsets are assigned from that point,
//! and the second pass writes the magic, the real instruction words and
//! finally the table. The passes must emit exactly the same ops, or the
//! displacements computed in the second pass would be wrong.

use std::io::{self, Write};

use log::{debug, trace};
use thiserror::Error;

use crate::format::{self, MAGIC_V1, TAG_ATTR, TAG_FILE, TAG_SET, TAG_SUB, WORD_SIZE};
use crate::strings::{StrId, StringTable};
use crate::tree::Entry;

/// All errors that can be encountered while encoding an artifact.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EncodeError {
    /// A string landed further from its instruction than the word's high
    /// bits can express. Takes an artifact beyond a gigabyte.
    #[error("string displacement out of range at instruction offset {0:#x}")]
    DisplacementOverflow(usize),

    /// A string landed before the instruction referencing it; the layout
    /// pass and the write pass disagreed.
    #[error("internal error: backward string reference at instruction offset {0:#x}")]
    BackwardReference(usize),

    /// The write cursor didn't meet the first string's assigned offset.
    #[error("internal error: string table starts at {actual:#x}, expected {expected:#x}")]
    LayoutMismatch { expected: usize, actual: usize },

    /// All other errors.
    #[error("I/O error")]
    IoError(#[from] io::Error),
}

/// Reborrow an `Option<&mut dyn Write>` for a single call without moving
/// the original binding out of scope, working around the lack of an
/// automatic reborrow for trait-object references.
fn reborrow<'a>(out: &'a mut Option<&mut dyn Write>) -> Option<&'a mut dyn Write> {
    match out {
        Some(w) => Some(&mut **w),
        None => None,
    }
}

/// One emission pass: the byte cursor and the current-attribute-name
/// tracker. The writer is threaded through the calls; the layout pass
/// passes `None` and only the cursor moves.
///
/// The tracker spans the entire pass on purpose: a file that reuses the
/// attribute name of the previously emitted file emits no `TAG_ATTR`, even
/// across directory boundaries. It is reset only when a pass starts.
struct Emitter<'a> {
    table: &'a StringTable,
    offset: usize,
    cur_attr: Option<StrId>,
}

impl<'a> Emitter<'a> {
    fn new(table: &'a StringTable) -> Self {
        Self {
            table,
            offset: MAGIC_V1.len(),
            cur_attr: None,
        }
    }

    /// Emit one instruction word referencing `arg` (or nothing, for the
    /// sentinel).
    fn putop(
        &mut self,
        tag: u32,
        arg: Option<StrId>,
        out: Option<&mut dyn Write>,
    ) -> Result<(), EncodeError> {
        let word_offset = self.offset;
        self.offset += WORD_SIZE;
        if let Some(out) = out {
            let mut word = tag;
            if let Some(id) = arg {
                let displacement = self
                    .table
                    .offset_of(id)
                    .checked_sub(self.offset)
                    .ok_or(EncodeError::BackwardReference(word_offset))?;
                let displacement = u32::try_from(displacement)
                    .ok()
                    .filter(|&d| d <= format::MAX_DISPLACEMENT)
                    .ok_or(EncodeError::DisplacementOverflow(word_offset))?;
                word = format::pack(tag, displacement);
            }
            out.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Emit the ops for one sibling list, then its terminating sentinel.
    ///
    /// Per entry: descend into sub-entries first, then emit the entry's own
    /// attributes. The decoder's path tracking depends on that order.
    fn emit_list(
        &mut self,
        entries: &[Entry],
        mut out: Option<&mut dyn Write>,
    ) -> Result<(), EncodeError> {
        for entry in entries {
            if !entry.subs.is_empty() {
                self.putop(TAG_SUB, Some(entry.name), reborrow(&mut out))?;
                self.emit_list(&entry.subs, reborrow(&mut out))?;
            }
            if !entry.attrs.is_empty() {
                self.putop(TAG_FILE, Some(entry.name), reborrow(&mut out))?;
                for attr in &entry.attrs {
                    if self.cur_attr != Some(attr.name) {
                        self.putop(TAG_ATTR, Some(attr.name), reborrow(&mut out))?;
                        self.cur_attr = Some(attr.name);
                    }
                    self.putop(TAG_SET, Some(attr.value), reborrow(&mut out))?;
                }
            }
        }
        self.putop(TAG_SUB, None, out)
    }
}

/// Encode the entry tree into a complete artifact: magic, instruction
/// stream, string table. Assigns the table's offsets as a side effect.
pub fn write_archive(
    out: &mut dyn Write,
    entries: &[Entry],
    table: &mut StringTable,
) -> Result<(), EncodeError> {
    // Layout pass: measure the instruction stream so the strings know
    // where they'll land
    let mut sizer = Emitter::new(table);
    sizer.emit_list(entries, None)?;
    let stream_end = sizer.offset;
    debug!(
        "Artifact layout: {} bytes of instructions, {} bytes of strings",
        stream_end - MAGIC_V1.len(),
        table.table_len()
    );
    table.set_offsets(stream_end);

    // Write pass
    out.write_all(MAGIC_V1)?;
    let mut emitter = Emitter::new(table);
    emitter.emit_list(entries, Some(&mut *out))?;
    let written = emitter.offset;
    if written != stream_end {
        return Err(EncodeError::LayoutMismatch {
            expected: stream_end,
            actual: written,
        });
    }
    if let Some(start) = table.start_offset() {
        if start != stream_end {
            return Err(EncodeError::LayoutMismatch {
                expected: stream_end,
                actual: start,
            });
        }
    }

    trace!("Appending {} interned strings", table.len());
    table.write_to(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tree::Attr;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn encode(entries: &[Entry], table: &mut StringTable) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        write_archive(&mut out, entries, table)?;
        Ok(out)
    }

    /// Collect the (tag, resolved string offset) of every word in the
    /// instruction stream.
    fn decode_words(artifact: &[u8]) -> Vec<(u32, usize)> {
        let mut words = Vec::new();
        let mut offset = MAGIC_V1.len();
        loop {
            let word = format::word_at(artifact, offset).expect("word");
            words.push((format::tag(word), format::string_offset(offset, word)));
            offset += WORD_SIZE;
            // The stream ends at the first top-level sentinel; nesting
            // doesn't matter for these flat inspections
            if word == TAG_SUB && words.iter().filter(|(t, _)| *t == TAG_SUB).count() == 1 {
                break;
            }
        }
        words
    }

    #[test]
    fn test_empty_tree() -> TestResult {
        // An artifact for nothing at all is the magic plus one sentinel
        let mut table = StringTable::new();
        let artifact = encode(&[], &mut table)?;

        let mut expected = MAGIC_V1.to_vec();
        expected.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(artifact, expected);
        Ok(())
    }

    #[test]
    fn test_single_attribute() -> TestResult {
        let mut table = StringTable::new();
        let a = table.intern(b"a\0");
        let name = table.intern(b"user.x\0");
        let value = table.intern(b"\x05\x00hello");

        let mut entry = Entry::new(a);
        entry.attrs.push(Attr { name, value });
        let artifact = encode(&[entry], &mut table)?;

        // magic, FILE "a", ATTR "user.x", SET value, sentinel, strings.
        // With a 12-byte magic the stream spans [12, 28) and the strings
        // land at 28 ("a\0"), 30 ("user.x\0") and 37 (the value blob).
        let mut expected = MAGIC_V1.to_vec();
        expected.extend_from_slice(&[0x31, 0, 0, 0]); // FILE, displacement 12
        expected.extend_from_slice(&[0x2a, 0, 0, 0]); // ATTR, displacement 10
        expected.extend_from_slice(&[0x37, 0, 0, 0]); // SET, displacement 13
        expected.extend_from_slice(&[0, 0, 0, 0]); // sentinel
        expected.extend_from_slice(b"a\0user.x\0\x05\x00hello");
        assert_eq!(artifact, expected);
        Ok(())
    }

    #[test]
    fn test_nested_directory() -> TestResult {
        let mut table = StringTable::new();
        let d = table.intern(b"d\0");
        let f = table.intern(b"f\0");
        let name = table.intern(b"user.k\0");
        let value = table.intern(b"\x01\x00v");

        let mut file = Entry::new(f);
        file.attrs.push(Attr { name, value });
        let mut dir = Entry::new(d);
        dir.subs.push(file);
        let artifact = encode(&[dir], &mut table)?;

        // SUB "d", FILE "f", ATTR, SET, inner sentinel, outer sentinel
        let mut expected = MAGIC_V1.to_vec();
        expected.extend_from_slice(&[0x50, 0, 0, 0]); // SUB, displacement 20
        expected.extend_from_slice(&[0x49, 0, 0, 0]); // FILE, displacement 18
        expected.extend_from_slice(&[0x42, 0, 0, 0]); // ATTR, displacement 16
        expected.extend_from_slice(&[0x4f, 0, 0, 0]); // SET, displacement 19
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.extend_from_slice(b"d\0f\0user.k\0\x01\x00v");
        assert_eq!(artifact, expected);
        Ok(())
    }

    #[test]
    fn test_attribute_name_compression() -> TestResult {
        // Two files carrying the same attribute: one table record for the
        // name, one for the value, one TAG_ATTR for both files
        let mut table = StringTable::new();
        let a = table.intern(b"a\0");
        let b = table.intern(b"b\0");
        let name = table.intern(b"user.x\0");
        let value = table.intern(b"\x0a\x00same_value");

        let mut first = Entry::new(a);
        first.attrs.push(Attr { name, value });
        let mut second = Entry::new(b);
        second.attrs.push(Attr { name, value });
        let artifact = encode(&[first, second], &mut table)?;

        let words = decode_words(&artifact);
        let tags: Vec<u32> = words.iter().map(|&(tag, _)| tag).collect();
        assert_eq!(tags, [TAG_FILE, TAG_ATTR, TAG_SET, TAG_FILE, TAG_SET, TAG_SUB]);

        // Both SETs resolve to the same table offset
        let sets: Vec<usize> = words
            .iter()
            .filter(|&&(tag, _)| tag == TAG_SET)
            .map(|&(_, offset)| offset)
            .collect();
        assert_eq!(sets[0], sets[1]);

        // And the string table holds the value bytes exactly once
        let count = artifact
            .windows(b"same_value".len())
            .filter(|window| *window == b"same_value")
            .count();
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn test_attr_emitted_again_on_change() -> TestResult {
        let mut table = StringTable::new();
        let a = table.intern(b"a\0");
        let x = table.intern(b"user.x\0");
        let y = table.intern(b"user.y\0");
        let value = table.intern(b"\x01\x00v");

        let mut entry = Entry::new(a);
        entry.attrs.push(Attr { name: x, value });
        entry.attrs.push(Attr { name: y, value });
        entry.attrs.push(Attr { name: x, value });
        let artifact = encode(&[entry], &mut table)?;

        let tags: Vec<u32> = decode_words(&artifact)
            .iter()
            .map(|&(tag, _)| tag)
            .collect();
        assert_eq!(
            tags,
            [
                TAG_FILE, TAG_ATTR, TAG_SET, TAG_ATTR, TAG_SET, TAG_ATTR, TAG_SET, TAG_SUB
            ]
        );
        Ok(())
    }

    #[test]
    fn test_self_relative_references_hit_interned_strings() -> TestResult {
        let mut table = StringTable::new();
        let d = table.intern(b"d\0");
        let f = table.intern(b"f\0");
        let name = table.intern(b"user.k\0");
        let value = table.intern(b"\x01\x00v");

        let mut file = Entry::new(f);
        file.attrs.push(Attr { name, value });
        let mut dir = Entry::new(d);
        dir.subs.push(file);
        let artifact = encode(&[dir], &mut table)?;

        let mut offset = MAGIC_V1.len();
        let mut interned: Vec<usize> = Vec::new();
        for id in [d, f, name, value] {
            interned.push(table.offset_of(id));
        }
        loop {
            let word = format::word_at(&artifact, offset)?;
            if word != TAG_SUB {
                let resolved = format::string_offset(offset, word);
                assert!(
                    interned.contains(&resolved),
                    "word at {offset:#x} resolves to {resolved:#x}, not a string start"
                );
            }
            offset += WORD_SIZE;
            if offset >= MAGIC_V1.len() + 6 * WORD_SIZE {
                break;
            }
        }
        Ok(())
    }

    #[test]
    fn test_sentinel_balance() -> TestResult {
        // Non-sentinel SUB count equals sentinel count minus one
        let mut table = StringTable::new();
        let d = table.intern(b"d\0");
        let e = table.intern(b"e\0");
        let f = table.intern(b"f\0");
        let name = table.intern(b"user.k\0");
        let value = table.intern(b"\x01\x00v");

        let mut leaf = Entry::new(f);
        leaf.attrs.push(Attr { name, value });
        let mut inner = Entry::new(e);
        inner.subs.push(leaf);
        let mut outer = Entry::new(d);
        outer.subs.push(inner);
        let artifact = encode(&[outer], &mut table)?;

        let stream_end = table.start_offset().expect("strings present");
        let mut offset = MAGIC_V1.len();
        let mut subs = 0;
        let mut sentinels = 0;
        while offset < stream_end {
            let word = format::word_at(&artifact, offset)?;
            if word == TAG_SUB {
                sentinels += 1;
            } else if format::tag(word) == TAG_SUB {
                subs += 1;
            }
            offset += WORD_SIZE;
        }
        assert_eq!(subs, sentinels - 1);
        Ok(())
    }
}
