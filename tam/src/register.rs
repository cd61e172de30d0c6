// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fixed register file.

use std::fmt;

use crate::error::{ErrorKind, ExecError};

/// A machine register.
///
/// CB, CT, PB, and PT are immutable after an image is loaded; they describe the
/// code and primitive regions. SB, ST, and LB span the defined stack. CP is the
/// instruction pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    /// Code base, always 0.
    CB,
    /// Code top: the number of instructions.
    CT,
    /// Primitive base: the first primitive address.
    PB,
    /// Primitive top: the end of code memory.
    PT,
    /// Stack base, always 0.
    SB,
    /// Stack top: first undefined stack slot.
    ST,
    /// Local base of the current call frame.
    LB,
    /// Instruction pointer.
    CP,
}

impl Register {
    /// Number of registers.
    pub const COUNT: usize = 8;

    /// All registers in id order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::CB,
        Self::CT,
        Self::PB,
        Self::PT,
        Self::SB,
        Self::ST,
        Self::LB,
        Self::CP,
    ];

    /// Returns the persistent id of this register.
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }

    /// Parses a register from its persistent id.
    pub fn from_id(id: i32) -> Result<Self, ExecError> {
        usize::try_from(id)
            .ok()
            .and_then(|ix| Self::ALL.get(ix).copied())
            .ok_or_else(|| {
                ExecError::new(
                    ErrorKind::MalformedInstruction,
                    format!("Invalid register id: {id}"),
                )
            })
    }

    /// Returns `true` if this register addresses code memory.
    ///
    /// The classification decides the tag of addresses formed by `LOADA`.
    #[must_use]
    pub const fn is_code(self) -> bool {
        matches!(self, Self::CB | Self::CT | Self::PB | Self::PT | Self::CP)
    }

    /// Returns `true` if this register addresses stack memory.
    #[must_use]
    pub const fn is_stack(self) -> bool {
        matches!(self, Self::SB | Self::ST | Self::LB)
    }

    /// Returns the register's mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CB => "CB",
            Self::CT => "CT",
            Self::PB => "PB",
            Self::PT => "PT",
            Self::SB => "SB",
            Self::ST => "ST",
            Self::LB => "LB",
            Self::CP => "CP",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
