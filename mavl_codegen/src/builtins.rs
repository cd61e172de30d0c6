// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The standard builtin-function environment.
//!
//! MAVL exposes a fixed set of runtime functions (console and matrix I/O,
//! conversions, powers and roots) that live in the primitive region of code
//! memory. The analysis stage resolves calls to them like any other function;
//! the code generator binds their function ids to primitive-region addresses,
//! so calls lower to `CALL` with the PB register.

use std::collections::HashMap;

use tam::asm::{Assembler, FuncId};
use tam::primitive::Primitive;

/// The primitives callable as MAVL functions, under their source-level names.
const STANDARD_FUNCTIONS: &[Primitive] = &[
    Primitive::PrintInt,
    Primitive::PrintFloat,
    Primitive::PrintBool,
    Primitive::PrintString,
    Primitive::PrintLine,
    Primitive::ReadInt,
    Primitive::ReadFloat,
    Primitive::ReadBool,
    Primitive::Int2Float,
    Primitive::Float2Int,
    Primitive::PowInt,
    Primitive::PowFloat,
    Primitive::SqrtInt,
    Primitive::SqrtFloat,
    Primitive::ReadIM64,
    Primitive::ReadIM16,
    Primitive::ReadIM9,
    Primitive::WriteIM64,
    Primitive::WriteIM16,
    Primitive::WriteIM9,
    Primitive::ReadFM64,
    Primitive::ReadFM16,
    Primitive::ReadFM9,
    Primitive::WriteFM64,
    Primitive::WriteFM16,
    Primitive::WriteFM9,
];

/// The builtin-function environment of a module.
#[derive(Clone, Debug)]
pub struct Builtins {
    by_name: HashMap<&'static str, (FuncId, Primitive)>,
}

impl Builtins {
    /// Creates the standard environment, allocating function ids starting at
    /// `*next_id` and advancing it past the allocated range.
    #[must_use]
    pub fn standard(next_id: &mut u32) -> Self {
        let mut by_name = HashMap::new();
        for &prim in STANDARD_FUNCTIONS {
            by_name.insert(prim.name(), (FuncId(*next_id), prim));
            *next_id += 1;
        }
        Self { by_name }
    }

    /// Resolves a builtin by its source-level name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(FuncId, Primitive)> {
        self.by_name.get(name).copied()
    }

    /// Binds every builtin's function id to its primitive-region address.
    pub fn bind(&self, asm: &mut Assembler) {
        for &(func, prim) in self.by_name.values() {
            asm.bind_function_address(func, prim.address());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_environment_is_complete_and_disjoint() {
        let mut next_id = 0;
        let builtins = Builtins::standard(&mut next_id);
        assert_eq!(next_id, STANDARD_FUNCTIONS.len() as u32);
        let (_, prim) = builtins.lookup("printInt").unwrap();
        assert_eq!(prim, Primitive::PrintInt);
        assert!(builtins.lookup("matTranspose").is_none());
        assert!(builtins.lookup("err").is_none());
    }

    #[test]
    fn binding_makes_builtins_callable() {
        let mut next_id = 0;
        let builtins = Builtins::standard(&mut next_id);
        let mut asm = Assembler::new();
        builtins.bind(&mut asm);
        let (func, prim) = builtins.lookup("printLine").unwrap();
        let call = asm.emit_function_call(func, "printLine");
        let inst = &asm.code()[call.address() as usize];
        assert_eq!(inst.r, tam::register::Register::PB);
        assert_eq!(inst.d, prim.displacement());
    }
}
