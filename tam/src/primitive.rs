// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The closed set of built-in operations.
//!
//! Primitives occupy the virtual address range `[PB, PT)` at the top of code
//! memory and are invoked by `CALL`ing into that region. A primitive is
//! identified by its displacement from PB; the table below is part of the
//! image format and new primitives must append.

use std::fmt;

use crate::error::{ErrorKind, ExecError};
use crate::machine;

/// A built-in operation, identified by its displacement from PB.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    /// No operation.
    Nop,
    /// Pop a string id and raise a runtime error carrying that string.
    Err,

    /// Boolean negation.
    Not,
    /// Boolean conjunction.
    And,
    /// Boolean disjunction.
    Or,

    /// Successor; keeps the operand's type tag.
    Succ,
    /// Predecessor; keeps the operand's type tag.
    Pred,

    /// Integer negation.
    NegI,
    /// Integer addition; propagates an address tag from either operand.
    AddI,
    /// Integer subtraction; keeps the left operand's tag.
    SubI,
    /// Integer multiplication.
    MulI,
    /// Integer division; fails on a zero divisor.
    DivI,
    /// Integer modulo; fails on a zero divisor.
    ModI,

    /// Integer equality.
    EqI,
    /// Integer inequality.
    NeI,
    /// Integer less-than.
    LtI,
    /// Integer less-or-equal.
    LeI,
    /// Integer greater-than.
    GtI,
    /// Integer greater-or-equal.
    GeI,

    /// Float negation.
    NegF,
    /// Float addition.
    AddF,
    /// Float subtraction.
    SubF,
    /// Float multiplication.
    MulF,
    /// Float division; fails on an exact zero divisor.
    DivF,

    /// Float equality.
    EqF,
    /// Float inequality.
    NeF,
    /// Float less-than.
    LtF,
    /// Float less-or-equal.
    LeF,
    /// Float greater-than.
    GtF,
    /// Float greater-or-equal.
    GeF,

    /// Reserved image-read slot; not implemented.
    ReadImage,
    /// Reserved image-write slot; not implemented.
    WriteImage,

    /// Read a 64x64 int matrix from a file.
    ReadIM64,
    /// Read a 16x16 int matrix from a file.
    ReadIM16,
    /// Read a 9x9 int matrix from a file.
    ReadIM9,
    /// Print and write a 64x64 int matrix to a file.
    WriteIM64,
    /// Print and write a 16x16 int matrix to a file.
    WriteIM16,
    /// Print and write a 9x9 int matrix to a file.
    WriteIM9,

    /// Read a 64x64 float matrix from a file.
    ReadFM64,
    /// Read a 16x16 float matrix from a file.
    ReadFM16,
    /// Read a 9x9 float matrix from a file.
    ReadFM9,
    /// Print and write a 64x64 float matrix to a file.
    WriteFM64,
    /// Print and write a 16x16 float matrix to a file.
    WriteFM16,
    /// Print and write a 9x9 float matrix to a file.
    WriteFM9,

    /// Integer exponentiation.
    PowInt,
    /// Float exponentiation.
    PowFloat,
    /// Integer square root (truncated).
    SqrtInt,
    /// Float square root.
    SqrtFloat,

    /// Print an integer.
    PrintInt,
    /// Print a float.
    PrintFloat,
    /// Print a boolean.
    PrintBool,
    /// Print a string constant.
    PrintString,
    /// Print a line break.
    PrintLine,

    /// Read an integer token from program input.
    ReadInt,
    /// Read a float token from program input.
    ReadFloat,
    /// Read a boolean token from program input.
    ReadBool,

    /// Convert int to float.
    Int2Float,
    /// Convert float to int (truncated).
    Float2Int,

    /// Integer matrix multiplication.
    MatMulI,
    /// Float matrix multiplication.
    MatMulF,
    /// Matrix transposition.
    MatTranspose,
}

impl Primitive {
    /// Number of primitives.
    pub const COUNT: usize = 61;

    /// The virtual address of displacement 0, i.e. the PB register value.
    pub const BASE_ADDRESS: i32 = machine::MAX_INSTRUCTIONS;

    /// All primitives in displacement order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Nop,
        Self::Err,
        Self::Not,
        Self::And,
        Self::Or,
        Self::Succ,
        Self::Pred,
        Self::NegI,
        Self::AddI,
        Self::SubI,
        Self::MulI,
        Self::DivI,
        Self::ModI,
        Self::EqI,
        Self::NeI,
        Self::LtI,
        Self::LeI,
        Self::GtI,
        Self::GeI,
        Self::NegF,
        Self::AddF,
        Self::SubF,
        Self::MulF,
        Self::DivF,
        Self::EqF,
        Self::NeF,
        Self::LtF,
        Self::LeF,
        Self::GtF,
        Self::GeF,
        Self::ReadImage,
        Self::WriteImage,
        Self::ReadIM64,
        Self::ReadIM16,
        Self::ReadIM9,
        Self::WriteIM64,
        Self::WriteIM16,
        Self::WriteIM9,
        Self::ReadFM64,
        Self::ReadFM16,
        Self::ReadFM9,
        Self::WriteFM64,
        Self::WriteFM16,
        Self::WriteFM9,
        Self::PowInt,
        Self::PowFloat,
        Self::SqrtInt,
        Self::SqrtFloat,
        Self::PrintInt,
        Self::PrintFloat,
        Self::PrintBool,
        Self::PrintString,
        Self::PrintLine,
        Self::ReadInt,
        Self::ReadFloat,
        Self::ReadBool,
        Self::Int2Float,
        Self::Float2Int,
        Self::MatMulI,
        Self::MatMulF,
        Self::MatTranspose,
    ];

    /// Returns this primitive's displacement from PB.
    #[must_use]
    pub const fn displacement(self) -> i32 {
        self as i32
    }

    /// Returns this primitive's virtual code address.
    #[must_use]
    pub const fn address(self) -> i32 {
        Self::BASE_ADDRESS + self.displacement()
    }

    /// Resolves a primitive from its displacement.
    pub fn from_displacement(displacement: i32) -> Result<Self, ExecError> {
        usize::try_from(displacement)
            .ok()
            .and_then(|ix| Self::ALL.get(ix).copied())
            .ok_or_else(|| {
                ExecError::new(
                    ErrorKind::InvalidAddress,
                    format!("Unable to call primitive with displacement {displacement}"),
                )
            })
    }

    /// Returns the primitive's mnemonic as used in disassembly.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Err => "err",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Succ => "succ",
            Self::Pred => "pred",
            Self::NegI => "negI",
            Self::AddI => "addI",
            Self::SubI => "subI",
            Self::MulI => "mulI",
            Self::DivI => "divI",
            Self::ModI => "modI",
            Self::EqI => "eqI",
            Self::NeI => "neI",
            Self::LtI => "ltI",
            Self::LeI => "leI",
            Self::GtI => "gtI",
            Self::GeI => "geI",
            Self::NegF => "negF",
            Self::AddF => "addF",
            Self::SubF => "subF",
            Self::MulF => "mulF",
            Self::DivF => "divF",
            Self::EqF => "eqF",
            Self::NeF => "neF",
            Self::LtF => "ltF",
            Self::LeF => "leF",
            Self::GtF => "gtF",
            Self::GeF => "geF",
            Self::ReadImage => "readImage",
            Self::WriteImage => "writeImage",
            Self::ReadIM64 => "readIM64",
            Self::ReadIM16 => "readIM16",
            Self::ReadIM9 => "readIM9",
            Self::WriteIM64 => "writeIM64",
            Self::WriteIM16 => "writeIM16",
            Self::WriteIM9 => "writeIM9",
            Self::ReadFM64 => "readFM64",
            Self::ReadFM16 => "readFM16",
            Self::ReadFM9 => "readFM9",
            Self::WriteFM64 => "writeFM64",
            Self::WriteFM16 => "writeFM16",
            Self::WriteFM9 => "writeFM9",
            Self::PowInt => "powInt",
            Self::PowFloat => "powFloat",
            Self::SqrtInt => "sqrtInt",
            Self::SqrtFloat => "sqrtFloat",
            Self::PrintInt => "printInt",
            Self::PrintFloat => "printFloat",
            Self::PrintBool => "printBool",
            Self::PrintString => "printString",
            Self::PrintLine => "printLine",
            Self::ReadInt => "readInt",
            Self::ReadFloat => "readFloat",
            Self::ReadBool => "readBool",
            Self::Int2Float => "int2float",
            Self::Float2Int => "float2int",
            Self::MatMulI => "matMulI",
            Self::MatMulF => "matMulF",
            Self::MatTranspose => "matTranspose",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
