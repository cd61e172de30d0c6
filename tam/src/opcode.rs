// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fifteen TAM opcodes.

use std::fmt;

use crate::error::{ErrorKind, ExecError};

/// An instruction opcode.
///
/// Each opcode uses a subset of the instruction fields `r`, `n`, and `d`;
/// unused fields are stored as zero and carry no semantics.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Copy `n` words from `d[r]` to the stack.
    Load,
    /// Push the address `d[r]`, tagged by the register class.
    LoadA,
    /// Pop an address, then copy `n` words from it to the stack.
    LoadI,
    /// Push the literal `d`.
    LoadL,
    /// Store `n` words from the stack top to `d[r]`.
    Store,
    /// Pop an address, then store `n` words below it to that address.
    StoreI,
    /// Call `d[r]`; a target in the primitive region invokes a primitive.
    Call,
    /// Pop the call target from the stack.
    CallI,
    /// Pop an `n`-word result over the frame and `d` words of arguments.
    Return,
    /// Reserve `d` zero-initialized words.
    Push,
    /// Copy the top `n` words `d` positions lower and shrink the stack.
    Pop,
    /// Jump to `d[r]`.
    Jump,
    /// Pop the jump target from the stack.
    JumpI,
    /// Pop a value; jump to `d[r]` if it equals `n`.
    JumpIf,
    /// Stop execution.
    Halt,
}

impl Opcode {
    /// Number of opcodes.
    pub const COUNT: usize = 15;

    /// All opcodes in id order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Load,
        Self::LoadA,
        Self::LoadI,
        Self::LoadL,
        Self::Store,
        Self::StoreI,
        Self::Call,
        Self::CallI,
        Self::Return,
        Self::Push,
        Self::Pop,
        Self::Jump,
        Self::JumpI,
        Self::JumpIf,
        Self::Halt,
    ];

    /// Returns the persistent id of this opcode.
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }

    /// Parses an opcode from its persistent id.
    pub fn from_id(id: i32) -> Result<Self, ExecError> {
        usize::try_from(id)
            .ok()
            .and_then(|ix| Self::ALL.get(ix).copied())
            .ok_or_else(|| {
                ExecError::new(
                    ErrorKind::MalformedInstruction,
                    format!("Invalid opcode id: {id}"),
                )
            })
    }

    /// Returns `true` if the `n` field carries semantics for this opcode.
    #[must_use]
    pub const fn has_n(self) -> bool {
        matches!(
            self,
            Self::Load | Self::LoadI | Self::Store | Self::StoreI | Self::Return | Self::Pop | Self::JumpIf
        )
    }

    /// Returns `true` if the `d` field carries semantics for this opcode.
    #[must_use]
    pub const fn has_d(self) -> bool {
        matches!(
            self,
            Self::Load
                | Self::LoadA
                | Self::LoadL
                | Self::Store
                | Self::Call
                | Self::Return
                | Self::Push
                | Self::Pop
                | Self::Jump
                | Self::JumpIf
        )
    }

    /// Returns `true` if the register field carries semantics for this opcode.
    #[must_use]
    pub const fn has_r(self) -> bool {
        matches!(
            self,
            Self::Load | Self::LoadA | Self::Store | Self::Call | Self::Jump | Self::JumpIf
        )
    }

    /// Returns the opcode's mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::LoadA => "LOADA",
            Self::LoadI => "LOADI",
            Self::LoadL => "LOADL",
            Self::Store => "STORE",
            Self::StoreI => "STOREI",
            Self::Call => "CALL",
            Self::CallI => "CALLI",
            Self::Return => "RETURN",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Jump => "JUMP",
            Self::JumpI => "JUMPI",
            Self::JumpIf => "JUMPIF",
            Self::Halt => "HALT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
