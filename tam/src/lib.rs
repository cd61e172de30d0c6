// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `tam`: the Triangle Abstract Machine variant targeted by the MAVL compiler.
//!
//! The crate covers the persistent form of a compiled program (an [`image::Image`]
//! holding instructions, interned strings, and optional debug symbols), the
//! interpreter executing it ([`interpreter::Interpreter`]), and the assembler
//! used by code generators to produce images ([`asm::Assembler`]).
//!
//! ## Example
//!
//! ```
//! use tam::asm::Assembler;
//! use tam::interpreter::{Interpreter, RunOutcome};
//! use tam::primitive::Primitive;
//!
//! let mut asm = Assembler::new();
//! asm.add_function(tam::asm::FuncId(0), "main", "function void main()");
//! asm.load_int(1);
//! asm.load_int(2);
//! asm.call_primitive(Primitive::AddI);
//! asm.call_primitive(Primitive::PrintInt);
//! asm.emit_return(0, 0);
//! let image = asm.finish().unwrap();
//!
//! let mut out = Vec::new();
//! let mut interp = Interpreter::new(std::io::empty(), &mut out);
//! interp.load_image(image);
//! assert_eq!(interp.run(), RunOutcome::Halted);
//! drop(interp);
//! assert_eq!(out, b"3");
//! ```

pub mod asm;
pub mod debug;
pub mod disasm;
pub mod error;
pub mod format;
pub mod image;
pub mod instruction;
pub mod interpreter;
pub mod machine;
pub mod opcode;
pub mod primitive;
pub mod profiler;
pub mod register;
pub mod value;
