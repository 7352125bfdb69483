//! The artifact format contract shared by the extract, restore and debug
//! tools: the identification magic, the four instruction opcodes, and the
//! self-relative offset arithmetic that ties the instruction stream to the
//! string table.
//!
//! An artifact is three regions back to back: the magic identifier, a
//! sequence of 32-bit little-endian instruction words, and the string table.
//! Each word packs an opcode into its low [`TAG_WIDTH`] bits and a byte
//! displacement into the rest; the referenced string lives at
//! `end_of_word + displacement`, so a mapped artifact can be interpreted at
//! any base address.

use thiserror::Error;

/// The identifier at the beginning of every version-1 artifact.
pub const MAGIC_V1: &[u8] = b"xattrarc-v1\n";

/// Number of low bits of an instruction word occupied by the opcode.
pub const TAG_WIDTH: u32 = 2;

/// Mask extracting the opcode from an instruction word.
pub const TAG_MASK: u32 = (1 << TAG_WIDTH) - 1;

/// Enter the sub-directory named by the referenced string. A word whose
/// whole value equals `TAG_SUB` (zero displacement) instead ends the
/// current directory.
pub const TAG_SUB: u32 = 0;

/// Switch the current file to the referenced name within the current
/// directory.
pub const TAG_FILE: u32 = 1;

/// Switch the current attribute name to the referenced string.
pub const TAG_ATTR: u32 = 2;

/// Apply the current attribute to the current file with the referenced
/// length-prefixed value.
pub const TAG_SET: u32 = 3;

/// Largest displacement representable in the high bits of a word.
pub const MAX_DISPLACEMENT: u32 = u32::MAX >> TAG_WIDTH;

/// Size in bytes of one instruction word.
pub const WORD_SIZE: usize = 4;

/// All errors that can be encountered while reading an artifact.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FormatError {
    /// The file does not start with [`MAGIC_V1`].
    #[error("not a version-1 xattrarc artifact")]
    BadMagic,

    /// An instruction word extends past the end of the artifact.
    #[error("truncated instruction word at offset {0:#x}")]
    TruncatedWord(usize),

    /// A string reference resolved outside the artifact.
    #[error("string reference to offset {0:#x} is outside the artifact")]
    StringOutOfRange(usize),

    /// A referenced string has no terminating NUL before the artifact ends.
    #[error("unterminated string at offset {0:#x}")]
    UnterminatedString(usize),

    /// A length-prefixed value overruns the end of the artifact.
    #[error("value at offset {0:#x} overruns the artifact")]
    ValueOutOfRange(usize),
}

/// Extract the opcode from an instruction word.
pub fn tag(word: u32) -> u32 {
    word & TAG_MASK
}

/// Extract the raw displacement from an instruction word.
pub fn displacement(word: u32) -> u32 {
    word >> TAG_WIDTH
}

/// Pack an opcode and a displacement into an instruction word.
pub fn pack(tag: u32, displacement: u32) -> u32 {
    debug_assert!(tag <= TAG_MASK);
    debug_assert!(displacement <= MAX_DISPLACEMENT);
    tag | (displacement << TAG_WIDTH)
}

/// Resolve the string offset referenced by the word at `word_offset`.
/// Displacements are relative to the end of the word that carries them.
pub fn string_offset(word_offset: usize, word: u32) -> usize {
    word_offset + WORD_SIZE + displacement(word) as usize
}

/// Check that `data` starts with the version-1 magic.
pub fn check_magic(data: &[u8]) -> Result<(), FormatError> {
    if data.len() < MAGIC_V1.len() || &data[..MAGIC_V1.len()] != MAGIC_V1 {
        return Err(FormatError::BadMagic);
    }
    Ok(())
}

/// Read the little-endian instruction word at `offset`.
pub fn word_at(data: &[u8], offset: usize) -> Result<u32, FormatError> {
    match data.get(offset..offset + WORD_SIZE) {
        Some(bytes) => {
            let mut word = [0; WORD_SIZE];
            word.copy_from_slice(bytes);
            Ok(u32::from_le_bytes(word))
        }
        None => Err(FormatError::TruncatedWord(offset)),
    }
}

/// Borrow the NUL-terminated string at `offset`, without its NUL.
pub fn str_at(data: &[u8], offset: usize) -> Result<&[u8], FormatError> {
    let tail = data
        .get(offset..)
        .ok_or(FormatError::StringOutOfRange(offset))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::UnterminatedString(offset))?;
    Ok(&tail[..len])
}

/// Borrow the length-prefixed value at `offset`: a 2-byte little-endian
/// length followed by exactly that many raw bytes. Returns the raw bytes.
pub fn value_at(data: &[u8], offset: usize) -> Result<&[u8], FormatError> {
    let prefix = data
        .get(offset..offset + 2)
        .ok_or(FormatError::ValueOutOfRange(offset))?;
    let len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
    data.get(offset + 2..offset + 2 + len)
        .ok_or(FormatError::ValueOutOfRange(offset))
}
