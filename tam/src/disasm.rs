// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Disassembly views of an image.
//!
//! The structured view ([`disassemble`]) is a read-only line sequence derived
//! from the instruction stream and its debug symbols; [`disassembly_text`]
//! renders it in the stable text format used by the driver's dump option.

use std::fmt::Write as _;

use crate::debug::DebugSymbol;
use crate::error::ExecError;
use crate::image::Image;
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::primitive::Primitive;
use crate::register::Register;

/// One line of a disassembly listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisasmLine {
    /// An empty spacer line (printed before labels).
    Blank,
    /// A comment carried by the instruction at `address`.
    Comment {
        /// Address of the instruction the comment is attached to.
        address: i32,
        /// A single comment line.
        text: String,
    },
    /// A label preceding the instruction at `address`.
    Label {
        /// Address of the labeled instruction.
        address: i32,
        /// Label text.
        text: String,
    },
    /// The instruction at `address` itself.
    Instruction {
        /// Code address (= index into the image).
        address: i32,
    },
}

/// Derives the structured disassembly view of `image`.
///
/// Comments marked as hidden are skipped; multi-line comments produce one line
/// each. Labels attached to an instruction precede it after a blank line.
#[must_use]
pub fn disassemble(image: &Image) -> Vec<DisasmLine> {
    let mut lines = Vec::new();
    for (ix, inst) in image.instructions.iter().enumerate() {
        let address = ix as i32;
        for symbol in &inst.debug {
            match symbol {
                DebugSymbol::Comment {
                    text,
                    show_in_disasm,
                } => {
                    if !show_in_disasm {
                        continue;
                    }
                    for part in text.split('\n') {
                        lines.push(DisasmLine::Comment {
                            address,
                            text: part.to_owned(),
                        });
                    }
                }
                DebugSymbol::Label(text) => {
                    lines.push(DisasmLine::Blank);
                    lines.push(DisasmLine::Label {
                        address,
                        text: text.clone(),
                    });
                }
                _ => {}
            }
        }
        lines.push(DisasmLine::Instruction { address });
    }
    lines
}

const COL_WIDTH_O: usize = 7;
const COL_WIDTH_N: usize = 7;
const COL_WIDTH_D: usize = 9;

/// Renders the disassembly as text.
///
/// Unless `explicit_primitive_calls` is set, a `CALL` into the primitive
/// region is rendered as the bare primitive name. Fails only if such a call
/// names a displacement outside the primitive table.
pub fn disassembly_text(image: &Image, explicit_primitive_calls: bool) -> Result<String, ExecError> {
    let mut out = String::new();
    for line in disassemble(image) {
        match line {
            DisasmLine::Blank => {}
            DisasmLine::Comment { text, .. } => {
                out.push_str("; ");
                out.push_str(&text);
            }
            DisasmLine::Label { text, .. } => {
                out.push_str(&text);
                out.push(':');
            }
            DisasmLine::Instruction { address } => {
                // The address is produced by disassemble() and always valid.
                let inst = image.instruction(address)?;
                let _ = write!(out, "{address:04x}: ");
                render_instruction(&mut out, inst, explicit_primitive_calls)?;
            }
        }
        out.push('\n');
    }
    Ok(out)
}

fn render_instruction(
    out: &mut String,
    inst: &Instruction,
    explicit_primitive_calls: bool,
) -> Result<(), ExecError> {
    if !explicit_primitive_calls && inst.op == Opcode::Call && inst.r == Register::PB {
        let name = Primitive::from_displacement(inst.d)?.name();
        out.push_str(name);
        let width = COL_WIDTH_O + COL_WIDTH_N + COL_WIDTH_D;
        for _ in name.len()..width {
            out.push(' ');
        }
    } else {
        let n_field = if inst.op.has_n() {
            format!("({})", inst.n)
        } else {
            String::new()
        };
        let d_field = if inst.op.has_d() {
            if inst.op.has_r() {
                format!("{}[{}]", inst.d, inst.r.name())
            } else {
                inst.d.to_string()
            }
        } else {
            String::new()
        };
        let _ = write!(
            out,
            "{:<COL_WIDTH_O$}{n_field:<COL_WIDTH_N$}{d_field:<COL_WIDTH_D$}",
            inst.op.name()
        );
    }

    if let Some(name) = inst.debug.name() {
        let _ = write!(out, " ; {name}");
    }
    Ok(())
}
