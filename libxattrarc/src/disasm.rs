//! The disassembler: the restore traversal, except every instruction is
//! printed instead of applied.
//!
//! Each line starts with the word's byte offset from the start of the
//! artifact and an indent proportional to the directory depth, then the
//! mnemonic, the raw displacement, the resolved absolute string offset and
//! the referenced string. Strings are rendered lossily; `SET` values are
//! assumed to be printable text, like the dry run.

use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::format::{self, FormatError, TAG_ATTR, TAG_FILE, TAG_SET, TAG_SUB, WORD_SIZE};
use crate::PATH_MAX;

/// All errors that can be encountered while disassembling.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DisasmError {
    /// The artifact is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A composed path outgrew [`PATH_MAX`].
    #[error("path too long below {0:?}")]
    PathTooLong(String),

    /// All other errors.
    #[error("I/O error")]
    IoError(#[from] io::Error),
}

struct Disassembler<'a> {
    data: &'a [u8],
    path: Vec<u8>,
}

/// Print the instruction stream of the artifact in `data`. `root` only
/// seeds the traced path buffer.
pub fn disasm(data: &[u8], root: &Path, out: &mut dyn Write) -> Result<(), DisasmError> {
    format::check_magic(data)?;
    debug!("Disassembling {} bytes", data.len());

    let mut disassembler = Disassembler {
        data,
        path: Vec::new(),
    };
    disassembler.process(
        format::MAGIC_V1.len(),
        0,
        0,
        root.as_os_str().as_bytes(),
        out,
    )?;
    Ok(())
}

impl<'a> Disassembler<'a> {
    fn process(
        &mut self,
        mut pc: usize,
        depth: usize,
        dir_len: usize,
        subpath: &[u8],
        out: &mut dyn Write,
    ) -> Result<usize, DisasmError> {
        self.path.truncate(dir_len);
        self.push_path(subpath)?;
        if self.path.last() != Some(&b'/') {
            self.push_path(b"/")?;
        }
        let dir_len = self.path.len();

        let indent = 3 * depth;
        writeln!(
            out,
            "{pc:06} {:indent$}ENTERING {}",
            "",
            String::from_utf8_lossy(&self.path)
        )?;

        loop {
            let word_offset = pc;
            let word = format::word_at(self.data, pc)?;
            pc += WORD_SIZE;
            let displacement = format::displacement(word);
            let str_offset = format::string_offset(word_offset, word);

            match format::tag(word) {
                TAG_SUB => {
                    if word == TAG_SUB {
                        writeln!(out, "{word_offset:06} {:indent$}END", "")?;
                        return Ok(pc);
                    }
                    let name = format::str_at(self.data, str_offset)?;
                    writeln!(
                        out,
                        "{word_offset:06} {:indent$}SUB {displacement}={str_offset} {}",
                        "",
                        String::from_utf8_lossy(name)
                    )?;
                    pc = self.process(pc, depth + 1, dir_len, name, out)?;
                }
                TAG_FILE => {
                    let name = format::str_at(self.data, str_offset)?;
                    self.path.truncate(dir_len);
                    self.push_path(name)?;
                    writeln!(
                        out,
                        "{word_offset:06} {:indent$}FILE {displacement}={str_offset} {}",
                        "",
                        String::from_utf8_lossy(name)
                    )?;
                    writeln!(
                        out,
                        "       {:indent$}  -> {}",
                        "",
                        String::from_utf8_lossy(&self.path)
                    )?;
                }
                TAG_ATTR => {
                    let name = format::str_at(self.data, str_offset)?;
                    writeln!(
                        out,
                        "{word_offset:06} {:indent$}ATTR {displacement}={str_offset} {}",
                        "",
                        String::from_utf8_lossy(name)
                    )?;
                }
                TAG_SET => {
                    let value = format::value_at(self.data, str_offset)?;
                    writeln!(
                        out,
                        "{word_offset:06} {:indent$}SET  {displacement}={str_offset} {} {}",
                        "",
                        value.len(),
                        String::from_utf8_lossy(value)
                    )?;
                }
                _ => unreachable!("two-bit tag"),
            }
        }
    }

    fn push_path(&mut self, bytes: &[u8]) -> Result<(), DisasmError> {
        if self.path.len() + bytes.len() > PATH_MAX {
            return Err(DisasmError::PathTooLong(
                String::from_utf8_lossy(&self.path).into_owned(),
            ));
        }
        self.path.extend_from_slice(bytes);
        Ok(())
    }
}
