// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Execution statistics.
//!
//! The profiler is an explicit counters record owned by the machine state;
//! every register access, memory access, and executed opcode or primitive is
//! counted. There is no global state involved.

use std::fmt::Write as _;

use crate::opcode::Opcode;
use crate::primitive::Primitive;
use crate::register::Register;

/// Counters for one program run.
#[derive(Clone, Debug)]
pub struct Profiler {
    /// Reads per register.
    pub reg_read_count: [u64; Register::COUNT],
    /// Writes per register.
    pub reg_write_count: [u64; Register::COUNT],
    /// Executions per opcode.
    pub opcode_exec_count: [u64; Opcode::COUNT],
    /// Executions per primitive.
    pub primitive_exec_count: [u64; Primitive::COUNT],

    /// Single-word memory reads.
    pub mem_read_count: u64,
    /// Single-word memory writes.
    pub mem_write_count: u64,
    /// Block copy operations.
    pub mem_copy_count: u64,
    /// Block zero operations.
    pub mem_zero_count: u64,
}

impl Default for Profiler {
    fn default() -> Self {
        Self {
            reg_read_count: [0; Register::COUNT],
            reg_write_count: [0; Register::COUNT],
            opcode_exec_count: [0; Opcode::COUNT],
            primitive_exec_count: [0; Primitive::COUNT],
            mem_read_count: 0,
            mem_write_count: 0,
            mem_copy_count: 0,
            mem_zero_count: 0,
        }
    }
}

impl Profiler {
    /// Creates a zeroed profiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an opcode execution.
    pub fn exec_opcode(&mut self, op: Opcode) {
        self.opcode_exec_count[op.id() as usize] += 1;
    }

    /// Counts a primitive execution.
    pub fn exec_primitive(&mut self, prim: Primitive) {
        self.primitive_exec_count[prim.displacement() as usize] += 1;
    }

    /// Counts a register read.
    pub fn reg_read(&mut self, reg: Register) {
        self.reg_read_count[reg.id() as usize] += 1;
    }

    /// Counts a register write.
    pub fn reg_write(&mut self, reg: Register) {
        self.reg_write_count[reg.id() as usize] += 1;
    }

    /// Counts a memory read.
    pub fn mem_read(&mut self) {
        self.mem_read_count += 1;
    }

    /// Counts a memory write.
    pub fn mem_write(&mut self) {
        self.mem_write_count += 1;
    }

    /// Counts a block copy.
    pub fn mem_copy(&mut self) {
        self.mem_copy_count += 1;
    }

    /// Counts a block zero.
    pub fn mem_zero(&mut self) {
        self.mem_zero_count += 1;
    }

    /// Renders a human-readable report.
    ///
    /// In compact mode, rows with zero counts are elided.
    #[must_use]
    pub fn report(&self, compact: bool) -> String {
        const NAME_COL_WIDTH: usize = 15;

        let mut out = String::new();
        out.push_str("Opcode executions:\n");
        for op in Opcode::ALL {
            let count = self.opcode_exec_count[op.id() as usize];
            if compact && count == 0 {
                continue;
            }
            let _ = writeln!(out, "{:<NAME_COL_WIDTH$}{}", op.name(), fmt_count(count));
        }
        out.push('\n');
        out.push_str("Primitive executions:\n");
        for prim in Primitive::ALL {
            let count = self.primitive_exec_count[prim.displacement() as usize];
            if compact && count == 0 {
                continue;
            }
            let _ = writeln!(out, "{:<NAME_COL_WIDTH$}{}", prim.name(), fmt_count(count));
        }
        out.push('\n');
        out.push_str("Register reads / writes:\n");
        for reg in Register::ALL {
            let reads = self.reg_read_count[reg.id() as usize];
            let writes = self.reg_write_count[reg.id() as usize];
            if compact && reads == 0 && writes == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "{:<NAME_COL_WIDTH$}{} / {}",
                reg.name(),
                fmt_count(reads),
                fmt_count(writes)
            );
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "{:<NAME_COL_WIDTH$}{}",
            "Memory reads:",
            fmt_count(self.mem_read_count)
        );
        let _ = writeln!(
            out,
            "{:<NAME_COL_WIDTH$}{}",
            "Memory writes:",
            fmt_count(self.mem_write_count)
        );
        let _ = writeln!(
            out,
            "{:<NAME_COL_WIDTH$}{}",
            "Memory copies:",
            fmt_count(self.mem_copy_count)
        );
        let _ = writeln!(
            out,
            "{:<NAME_COL_WIDTH$}{}",
            "Memory clears:",
            fmt_count(self.mem_zero_count)
        );
        out
    }
}

fn fmt_count(count: u64) -> String {
    if count == 0 {
        format!("{:>5}", "-")
    } else if count > 9999 {
        ">9999".into()
    } else {
        format!("{count:>5}")
    }
}
