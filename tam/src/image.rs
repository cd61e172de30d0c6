// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The persistent form of a compiled program.
//!
//! An [`Image`] is a dense instruction array (address = index) plus an ordered
//! pool of interned strings (string id = index). Debug symbols are persisted
//! in a separate sidecar so stripped images stay small.
//!
//! Binary layout (big-endian): instruction count, then `opcode id, register
//! id, n, d` per instruction; string count, then length-prefixed strings.
//! The sidecar holds the count of instructions carrying symbols, then
//! `instruction index, symbol count, symbols...` groups.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::debug::{DebugSymbol, SourceLocation};
use crate::error::{ErrorKind, ExecError};
use crate::format::{DecodeError, EncodeError, Reader, Writer};
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::register::Register;
use crate::value::ValueType;

/// A failure while reading or writing an image file.
#[derive(Debug)]
pub enum ImageFileError {
    /// The underlying file operation failed.
    Io(io::Error),
    /// The file contents were not a valid image or symbol table.
    Decode(DecodeError),
    /// The image could not be encoded.
    Encode(EncodeError),
}

impl fmt::Display for ImageFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for ImageFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

impl From<io::Error> for ImageFileError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for ImageFileError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<EncodeError> for ImageFileError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

/// A compiled program: instructions plus interned string constants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Image {
    /// Instructions; the code address of an instruction is its index.
    pub instructions: Vec<Instruction>,
    /// Interned strings; a string id is an index into this pool.
    pub strings: Vec<String>,
}

impl Image {
    /// Creates an image from parts.
    #[must_use]
    pub const fn new(instructions: Vec<Instruction>, strings: Vec<String>) -> Self {
        Self {
            instructions,
            strings,
        }
    }

    /// Returns the instruction at `address`.
    pub fn instruction(&self, address: i32) -> Result<&Instruction, ExecError> {
        usize::try_from(address)
            .ok()
            .and_then(|ix| self.instructions.get(ix))
            .ok_or_else(|| {
                ExecError::at(
                    ErrorKind::InvalidAddress,
                    format!("Unable to read instruction at address {address}"),
                    address,
                )
            })
    }

    /// Returns the string constant with the given id.
    pub fn string(&self, id: i32) -> Result<&str, ExecError> {
        usize::try_from(id)
            .ok()
            .and_then(|ix| self.strings.get(ix))
            .map(String::as_str)
            .ok_or_else(|| {
                ExecError::new(
                    ErrorKind::InternalError,
                    format!("Unable to resolve string constant {id}"),
                )
            })
    }

    /// Removes all debug symbols from all instructions.
    pub fn clear_symbols(&mut self) {
        for inst in &mut self.instructions {
            inst.debug.clear();
        }
    }

    // binary image

    /// Encodes the instructions and string pool.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        w.write_i32(self.instructions.len() as i32);
        for inst in &self.instructions {
            w.write_i32(inst.op.id());
            w.write_i32(if inst.op.has_r() { inst.r.id() } else { 0 });
            w.write_i32(inst.n);
            w.write_i32(inst.d);
        }
        w.write_i32(self.strings.len() as i32);
        for s in &self.strings {
            w.write_utf(s)?;
        }
        Ok(w.into_vec())
    }

    /// Decodes an image produced by [`Image::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let count = r.read_count()?;
        let mut instructions = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let op_id = r.read_i32()?;
            let op = Opcode::from_id(op_id).map_err(|_| DecodeError::BadOpcodeId(op_id))?;
            let reg_id = r.read_i32()?;
            let reg =
                Register::from_id(reg_id).map_err(|_| DecodeError::BadRegisterId(reg_id))?;
            let n = r.read_i32()?;
            let d = r.read_i32()?;
            instructions.push(Instruction::new(op, reg, n, d));
        }
        let count = r.read_count()?;
        let mut strings = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            strings.push(r.read_utf()?);
        }
        Ok(Self {
            instructions,
            strings,
        })
    }

    /// Writes the image to a file.
    pub fn save(&self, path: &Path) -> Result<(), ImageFileError> {
        let bytes = self.encode()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads an image from a file.
    pub fn load(path: &Path) -> Result<Self, ImageFileError> {
        let bytes = fs::read(path)?;
        Ok(Self::decode(&bytes)?)
    }

    // symbol sidecar

    /// Encodes the debug symbols of all instructions.
    ///
    /// Break points are transient debugger state and are never written.
    pub fn encode_symbols(&self) -> Result<Vec<u8>, EncodeError> {
        let persisted = |inst: &Instruction| {
            inst.debug
                .iter()
                .filter(|s| !matches!(s, DebugSymbol::BreakPoint))
                .count()
        };

        let carrying = self
            .instructions
            .iter()
            .filter(|inst| persisted(inst) > 0)
            .count();

        let mut w = Writer::new();
        w.write_i32(carrying as i32);
        for (ix, inst) in self.instructions.iter().enumerate() {
            if persisted(inst) == 0 {
                continue;
            }
            w.write_i32(ix as i32);
            w.write_i32(persisted(inst) as i32);
            for symbol in &inst.debug {
                if matches!(symbol, DebugSymbol::BreakPoint) {
                    continue;
                }
                w.write_i32(symbol.kind_id());
                match symbol {
                    DebugSymbol::Comment {
                        text,
                        show_in_disasm,
                    } => {
                        w.write_utf(text)?;
                        w.write_u8(u8::from(*show_in_disasm));
                    }
                    DebugSymbol::Location(loc) => {
                        w.write_i32(loc.line);
                        w.write_i32(loc.column);
                    }
                    DebugSymbol::Type(ty) => w.write_i32(ty.id()),
                    DebugSymbol::Name(s) | DebugSymbol::Label(s) => w.write_utf(s)?,
                    DebugSymbol::BreakPoint => {}
                }
            }
        }
        Ok(w.into_vec())
    }

    /// Replaces all debug symbols with the contents of a symbol sidecar.
    pub fn decode_symbols(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.clear_symbols();
        let mut r = Reader::new(bytes);
        let groups = r.read_count()?;
        for _ in 0..groups {
            let index = r.read_i32()?;
            let inst = usize::try_from(index)
                .ok()
                .and_then(|ix| self.instructions.get_mut(ix))
                .ok_or(DecodeError::BadInstructionIndex(index))?;
            let count = r.read_count()?;
            for _ in 0..count {
                let kind = r.read_i32()?;
                let symbol = match kind {
                    1 => DebugSymbol::Comment {
                        text: r.read_utf()?,
                        show_in_disasm: r.read_u8()? != 0,
                    },
                    2 => DebugSymbol::Location(SourceLocation::new(
                        r.read_i32()?,
                        r.read_i32()?,
                    )),
                    3 => {
                        let id = r.read_i32()?;
                        DebugSymbol::Type(
                            ValueType::from_id(id).ok_or(DecodeError::BadValueTypeId(id))?,
                        )
                    }
                    4 => DebugSymbol::Name(r.read_utf()?),
                    5 => DebugSymbol::Label(r.read_utf()?),
                    other => return Err(DecodeError::BadSymbolKind(other)),
                };
                inst.debug.add(symbol);
            }
        }
        Ok(())
    }

    /// Writes the symbol sidecar to a file.
    pub fn save_symbols(&self, path: &Path) -> Result<(), ImageFileError> {
        let bytes = self.encode_symbols()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads a symbol sidecar from a file, replacing all attached symbols.
    pub fn load_symbols(&mut self, path: &Path) -> Result<(), ImageFileError> {
        let bytes = fs::read(path)?;
        self.decode_symbols(&bytes)?;
        Ok(())
    }
}
