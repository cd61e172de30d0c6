// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The assembler used by code generators to build images.
//!
//! The assembler owns the growing instruction vector, interns string
//! constants into a dense pool, tracks the next free LB-relative local slot,
//! and back-patches forward jumps and forward calls. Functions are identified
//! by caller-assigned [`FuncId`]s; a call to a function whose body has not
//! been emitted yet produces a placeholder that is patched when
//! [`Assembler::add_function`] is invoked for the callee.

use std::collections::HashMap;
use std::fmt;

use crate::debug::{DebugSymbols, SourceLocation};
use crate::image::Image;
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::primitive::Primitive;
use crate::register::Register;
use crate::value::ValueType;

/// Literal payload of boolean `true`.
pub const TRUE_CONST: i32 = 1;
/// Literal payload of boolean `false`.
pub const FALSE_CONST: i32 = 0;

/// A stable identifier for a function, assigned by the frontend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// A handle to an emitted instruction, used for back-patching and for
/// attaching debug symbols after emission.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InstrId(usize);

impl InstrId {
    /// Returns the code address of the instruction.
    #[must_use]
    pub fn address(self) -> i32 {
        self.0 as i32
    }
}

/// A comparison operator, mapped onto the comparison primitives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

/// An assembler usage error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmError {
    /// [`Assembler::back_patch_jump`] was applied to a non-jump instruction.
    NotAJump {
        /// The offending opcode.
        op: Opcode,
    },
    /// A call was emitted to a function that was never added.
    UnresolvedCall {
        /// The unresolved callee.
        func: FuncId,
    },
    /// The string pool ids were not a dense prefix of the non-negative
    /// integers; indicates assembler-internal corruption.
    NonContiguousConstants,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAJump { op } => write!(f, "can only backpatch jump instructions, not {op}"),
            Self::UnresolvedCall { func } => {
                write!(f, "call to function #{} was never resolved", func.0)
            }
            Self::NonContiguousConstants => write!(f, "non consecutive string constant ids"),
        }
    }
}

impl std::error::Error for AsmError {}

/// An incremental image builder.
pub struct Assembler {
    code: Vec<Instruction>,
    constant_pool: HashMap<String, i32>,
    next_const_index: i32,
    next_offset: i32,

    functions: HashMap<FuncId, i32>,
    deferred_calls: HashMap<FuncId, Vec<InstrId>>,

    staged: DebugSymbols,
    context: Vec<SourceLocation>,
    initial_call: InstrId,
}

impl Assembler {
    /// Creates an assembler with the program entry scaffolding in place: a
    /// placeholder call to `main` followed by `HALT`.
    #[must_use]
    pub fn new() -> Self {
        let mut asm = Self {
            code: Vec::new(),
            constant_pool: HashMap::new(),
            next_const_index: 0,
            next_offset: 0,
            functions: HashMap::new(),
            deferred_calls: HashMap::new(),
            staged: DebugSymbols::new(),
            context: Vec::new(),
            initial_call: InstrId(0),
        };
        let initial = asm.add_instruction(Instruction::new(Opcode::Call, Register::CB, 0, -1));
        asm.attach_name(initial, "main");
        asm.initial_call = initial;
        asm.emit_halt();
        asm
    }

    // code access

    /// Returns the emitted instructions so far.
    #[must_use]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Returns the code address the next emitted instruction will get.
    #[must_use]
    pub fn next_instruction_address(&self) -> i32 {
        self.code.len() as i32
    }

    fn add_instruction(&mut self, mut inst: Instruction) -> InstrId {
        if let Some(loc) = self.context.last() {
            inst.debug.add_location(*loc);
        }
        inst.debug.append(&mut self.staged);
        self.code.push(inst);
        InstrId(self.code.len() - 1)
    }

    // debug symbols

    /// Pushes the source location of the AST node being compiled; emitted
    /// instructions are annotated with the innermost location.
    pub fn push_context(&mut self, location: SourceLocation) {
        self.context.push(location);
    }

    /// Pops the current source context.
    pub fn pop_context(&mut self) {
        self.context.pop();
    }

    /// Attaches a name symbol to an emitted instruction.
    pub fn attach_name(&mut self, inst: InstrId, name: impl Into<String>) {
        self.code[inst.0].debug.add_name(name);
    }

    /// Attaches a comment symbol to an emitted instruction.
    pub fn attach_comment(&mut self, inst: InstrId, text: impl Into<String>, show_in_disasm: bool) {
        self.code[inst.0].debug.add_comment(text, show_in_disasm);
    }

    /// Attaches a value type symbol to an emitted instruction.
    pub fn attach_type(&mut self, inst: InstrId, ty: ValueType) {
        self.code[inst.0].debug.add_type(ty);
    }

    /// Stages a comment for the next emitted instruction.
    pub fn stage_comment(&mut self, text: impl Into<String>, show_in_disasm: bool) {
        self.staged.add_comment(text, show_in_disasm);
    }

    // local offsets

    /// Returns the next free LB-relative slot.
    #[must_use]
    pub fn next_offset(&self) -> i32 {
        self.next_offset
    }

    /// Overwrites the next free LB-relative slot.
    pub fn set_next_offset(&mut self, next_offset: i32) {
        self.next_offset = next_offset;
    }

    /// Restores a previously saved offset, discarding any slack the block
    /// left on the stack.
    pub fn reset_next_offset(&mut self, old_offset: i32) {
        if self.next_offset > old_offset {
            self.emit_pop(0, self.next_offset - old_offset);
            self.next_offset = old_offset;
        }
    }

    /// Assigns the next free slot to a declaration of `word_size` words and
    /// returns its LB-relative offset.
    pub fn declare_local(&mut self, word_size: i32) -> i32 {
        let offset = self.next_offset;
        self.next_offset += word_size;
        offset
    }

    // functions

    /// Starts a new function at the current code address.
    ///
    /// Deferred calls to `func` are patched, the entry scaffolding is patched
    /// if this is `main`, and the local offset is reset to 2 (slots 0 and 1
    /// relative to LB hold the dynamic link and the return address).
    pub fn add_function(&mut self, func: FuncId, name: &str, signature: &str) {
        let addr = self.next_instruction_address();
        self.functions.insert(func, addr);
        if let Some(calls) = self.deferred_calls.remove(&func) {
            for call in calls {
                self.code[call.0].d = addr;
            }
        }
        if name == "main" {
            let initial = self.initial_call;
            self.code[initial.0].d = addr;
        }
        self.next_offset = 2;
        self.staged.add_comment(signature, false);
        self.staged.add_label(name);
    }

    /// Binds a function id to a known code address without emitting a body.
    ///
    /// This is how builtin functions living in the primitive region become
    /// callable; calls to them lower to `CALL` with the PB register.
    pub fn bind_function_address(&mut self, func: FuncId, address: i32) {
        self.functions.insert(func, address);
        if let Some(calls) = self.deferred_calls.remove(&func) {
            for call in calls {
                self.code[call.0].d = address;
            }
        }
    }

    /// Emits a call to `func`.
    ///
    /// If the callee's address is not yet known, a placeholder is emitted and
    /// patched once [`Assembler::add_function`] runs for the callee.
    pub fn emit_function_call(&mut self, func: FuncId, name: &str) -> InstrId {
        match self.functions.get(&func).copied() {
            None => {
                let call =
                    self.add_instruction(Instruction::new(Opcode::Call, Register::CB, 0, -1));
                self.deferred_calls.entry(func).or_default().push(call);
                call
            }
            Some(addr) if addr >= Primitive::BASE_ADDRESS => {
                let call = self.add_instruction(Instruction::new(
                    Opcode::Call,
                    Register::PB,
                    0,
                    addr - Primitive::BASE_ADDRESS,
                ));
                self.attach_name(call, name);
                call
            }
            Some(addr) => {
                let call =
                    self.add_instruction(Instruction::new(Opcode::Call, Register::CB, 0, addr));
                self.attach_name(call, name);
                call
            }
        }
    }

    /// Emits a `RETURN` with the given result and argument sizes.
    pub fn emit_return(&mut self, result_size: i32, arg_size: i32) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::Return, result_size, arg_size))
    }

    /// Emits a `HALT`.
    pub fn emit_halt(&mut self) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::Halt, 0, 0))
    }

    // loads and stores

    /// Pushes a boolean literal.
    pub fn load_bool(&mut self, value: bool) -> InstrId {
        let literal = if value { TRUE_CONST } else { FALSE_CONST };
        let inst = self.add_instruction(Instruction::plain(Opcode::LoadL, 0, literal));
        self.attach_type(inst, ValueType::Bool);
        inst
    }

    /// Pushes an integer literal.
    pub fn load_int(&mut self, value: i32) -> InstrId {
        let inst = self.add_instruction(Instruction::plain(Opcode::LoadL, 0, value));
        self.attach_type(inst, ValueType::Int);
        inst
    }

    /// Pushes a float literal.
    pub fn load_float(&mut self, value: f32) -> InstrId {
        let inst =
            self.add_instruction(Instruction::plain(Opcode::LoadL, 0, value.to_bits() as i32));
        self.attach_type(inst, ValueType::Float);
        inst
    }

    /// Interns a string constant and pushes its id.
    pub fn load_string(&mut self, value: &str) -> InstrId {
        let literal = self.intern_string(value);
        let inst = self.add_instruction(Instruction::plain(Opcode::LoadL, 0, literal));
        self.attach_type(inst, ValueType::Str);
        inst
    }

    /// Interns a string, returning its dense pool id.
    pub fn intern_string(&mut self, value: &str) -> i32 {
        if let Some(&id) = self.constant_pool.get(value) {
            return id;
        }
        let id = self.next_const_index;
        self.constant_pool.insert(value.to_owned(), id);
        self.next_const_index += 1;
        id
    }

    /// Loads `word_size` words of a function-local entity at `offset[LB]`.
    pub fn load_local(&mut self, word_size: i32, offset: i32) -> InstrId {
        self.load_value(Register::LB, word_size, offset)
    }

    /// Loads `word_size` words from `offset[register]`.
    pub fn load_value(&mut self, register: Register, word_size: i32, offset: i32) -> InstrId {
        self.add_instruction(Instruction::new(Opcode::Load, register, word_size, offset))
    }

    /// Pushes the address `offset[register]`.
    pub fn load_address(&mut self, register: Register, offset: i32) -> InstrId {
        self.add_instruction(Instruction::new(Opcode::LoadA, register, 0, offset))
    }

    /// Pops an address and loads `word_size` words from it.
    pub fn load_from_stack_address(&mut self, word_size: i32) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::LoadI, word_size, 0))
    }

    /// Pops an address and stores `word_size` words below it to that address.
    pub fn store_to_stack_address(&mut self, word_size: i32) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::StoreI, word_size, 0))
    }

    /// Stores `word_size` words to a function-local entity at `offset[LB]`.
    pub fn store_local(&mut self, word_size: i32, offset: i32) -> InstrId {
        self.store_value(Register::LB, word_size, offset)
    }

    /// Stores `word_size` words to `offset[register]`.
    pub fn store_value(&mut self, register: Register, word_size: i32, offset: i32) -> InstrId {
        self.add_instruction(Instruction::new(Opcode::Store, register, word_size, offset))
    }

    /// Pops a `result_size`-word result, discards `pop_size` more words, and
    /// pushes the result back.
    pub fn emit_pop(&mut self, result_size: i32, pop_size: i32) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::Pop, result_size, pop_size))
    }

    /// Reserves `size` zero-initialized words.
    pub fn emit_push(&mut self, size: i32) -> InstrId {
        self.add_instruction(Instruction::plain(Opcode::Push, 0, size))
    }

    // jumps

    /// Emits an unconditional jump to a code address (`-1` for "patch me").
    pub fn emit_jump(&mut self, address: i32) -> InstrId {
        self.add_instruction(Instruction::new(Opcode::Jump, Register::CB, 0, address))
    }

    /// Emits a jump taken when the popped value equals the boolean condition.
    pub fn emit_conditional_jump(&mut self, condition: bool, address: i32) -> InstrId {
        self.emit_conditional_jump_int(if condition { TRUE_CONST } else { FALSE_CONST }, address)
    }

    /// Emits a jump taken when the popped value equals `condition`.
    pub fn emit_conditional_jump_int(&mut self, condition: i32, address: i32) -> InstrId {
        self.add_instruction(Instruction::new(
            Opcode::JumpIf,
            Register::CB,
            condition,
            address,
        ))
    }

    /// Patches the target of a previously emitted jump.
    pub fn back_patch_jump(&mut self, inst: InstrId, new_address: i32) -> Result<(), AsmError> {
        let op = self.code[inst.0].op;
        if !matches!(op, Opcode::Jump | Opcode::JumpIf) {
            return Err(AsmError::NotAJump { op });
        }
        self.code[inst.0].d = new_address;
        Ok(())
    }

    fn patch_jump(&mut self, inst: InstrId, new_address: i32) {
        self.code[inst.0].d = new_address;
    }

    // primitives

    /// Emits a call to a primitive.
    pub fn call_primitive(&mut self, primitive: Primitive) -> InstrId {
        self.add_instruction(Instruction::new(
            Opcode::Call,
            Register::PB,
            0,
            primitive.displacement(),
        ))
    }

    /// Emits a call to the `err` primitive, which consumes a string id.
    pub fn emit_err(&mut self) -> InstrId {
        self.call_primitive(Primitive::Err)
    }

    /// Emits a call to the increment (`succ`) primitive.
    pub fn emit_increment(&mut self) -> InstrId {
        self.call_primitive(Primitive::Succ)
    }

    /// Emits a call to the decrement (`pred`) primitive.
    pub fn emit_decrement(&mut self) -> InstrId {
        self.call_primitive(Primitive::Pred)
    }

    /// Emits the integer comparison primitive for `comparison`.
    pub fn emit_integer_comparison(&mut self, comparison: Comparison) -> InstrId {
        self.call_primitive(match comparison {
            Comparison::Equal => Primitive::EqI,
            Comparison::NotEqual => Primitive::NeI,
            Comparison::Less => Primitive::LtI,
            Comparison::LessEqual => Primitive::LeI,
            Comparison::Greater => Primitive::GtI,
            Comparison::GreaterEqual => Primitive::GeI,
        })
    }

    /// Emits the float comparison primitive for `comparison`.
    pub fn emit_float_comparison(&mut self, comparison: Comparison) -> InstrId {
        self.call_primitive(match comparison {
            Comparison::Equal => Primitive::EqF,
            Comparison::NotEqual => Primitive::NeF,
            Comparison::Less => Primitive::LtF,
            Comparison::LessEqual => Primitive::LeF,
            Comparison::Greater => Primitive::GtF,
            Comparison::GreaterEqual => Primitive::GeF,
        })
    }

    /// Emits code that raises "Index out of bounds" unless the value on the
    /// stack top is in `[lower_bound, upper_bound)`; the value itself is left
    /// untouched.
    pub fn emit_bounds_check(&mut self, lower_bound: i32, upper_bound: i32) {
        // ..., value
        let first = self.load_value(Register::ST, 1, -1);
        self.attach_comment(
            first,
            format!("start of bounds check [{lower_bound}, {upper_bound})"),
            true,
        );
        // ..., value, value
        self.load_int(lower_bound);
        // ..., value, value, lower
        self.emit_integer_comparison(Comparison::Less);
        // ..., value, bool
        let jump_lt = self.emit_conditional_jump(true, -1);

        // ..., value
        self.load_value(Register::ST, 1, -1);
        // ..., value, value
        self.load_int(upper_bound);
        // ..., value, value, upper
        self.emit_integer_comparison(Comparison::GreaterEqual);
        // ..., value, bool
        let jump_ge = self.emit_conditional_jump(true, -1);
        // ..., value

        let jump_end = self.emit_jump(-1);
        let fail = self.next_instruction_address();
        self.patch_jump(jump_lt, fail);
        self.patch_jump(jump_ge, fail);
        self.load_string("Index out of bounds");
        self.emit_err();

        let success = self.next_instruction_address();
        self.patch_jump(jump_end, success);
        self.staged.add_comment(
            format!("end of bounds check [{lower_bound}, {upper_bound})"),
            true,
        );
    }

    // finalization

    /// Freezes the instruction vector and string pool into an [`Image`].
    ///
    /// Fails if any forward call was never resolved or the constant pool is
    /// not densely numbered.
    pub fn finish(self) -> Result<Image, AsmError> {
        if let Some(&func) = self.deferred_calls.keys().next() {
            return Err(AsmError::UnresolvedCall { func });
        }

        let mut entries: Vec<(String, i32)> = self.constant_pool.into_iter().collect();
        entries.sort_by_key(|(_, id)| *id);
        let mut strings = Vec::with_capacity(entries.len());
        for (expected, (string, id)) in entries.into_iter().enumerate() {
            if id != expected as i32 {
                return Err(AsmError::NonContiguousConstants);
            }
            strings.push(string);
        }

        Ok(Image::new(self.code, strings))
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_scaffolding_calls_main_then_halts() {
        let asm = Assembler::new();
        assert_eq!(asm.code().len(), 2);
        assert_eq!(asm.code()[0].op, Opcode::Call);
        assert_eq!(asm.code()[0].r, Register::CB);
        assert_eq!(asm.code()[0].d, -1);
        assert_eq!(asm.code()[0].debug.name(), Some("main"));
        assert_eq!(asm.code()[1].op, Opcode::Halt);
    }

    #[test]
    fn adding_main_patches_the_entry_call() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        assert_eq!(asm.code()[0].d, 2);
        assert_eq!(asm.next_offset(), 2);
    }

    #[test]
    fn forward_calls_are_patched_exactly_once() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        let call = asm.emit_function_call(FuncId(1), "helper");
        assert_eq!(call.address(), 2);
        assert_eq!(asm.code()[2].d, -1);
        asm.emit_return(0, 0);

        asm.add_function(FuncId(1), "helper", "function void helper()");
        let helper_addr = 4;
        assert_eq!(asm.code()[2].d, helper_addr);
        asm.emit_return(0, 0);

        // A later call to the now-known function is direct.
        let direct = asm.emit_function_call(FuncId(1), "helper");
        assert_eq!(asm.code()[direct.0].d, helper_addr);
        assert!(asm.finish().is_ok());
    }

    #[test]
    fn unresolved_calls_fail_finalization() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        asm.emit_function_call(FuncId(7), "ghost");
        asm.emit_return(0, 0);
        assert_eq!(
            asm.finish().unwrap_err(),
            AsmError::UnresolvedCall { func: FuncId(7) }
        );
    }

    #[test]
    fn builtin_addresses_lower_to_primitive_calls() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        asm.bind_function_address(FuncId(1), Primitive::PrintInt.address());
        let call = asm.emit_function_call(FuncId(1), "printInt");
        let inst = &asm.code()[call.0];
        assert_eq!(inst.op, Opcode::Call);
        assert_eq!(inst.r, Register::PB);
        assert_eq!(inst.d, Primitive::PrintInt.displacement());
        assert_eq!(inst.debug.name(), Some("printInt"));
    }

    #[test]
    fn string_interning_is_dense_and_reusing() {
        let mut asm = Assembler::new();
        assert_eq!(asm.intern_string("a"), 0);
        assert_eq!(asm.intern_string("b"), 1);
        assert_eq!(asm.intern_string("a"), 0);
        asm.add_function(FuncId(0), "main", "function void main()");
        asm.emit_return(0, 0);
        let image = asm.finish().unwrap();
        assert_eq!(image.strings, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn reset_next_offset_discards_slack() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        let before = asm.next_offset();
        assert_eq!(asm.declare_local(3), 2);
        assert_eq!(asm.next_offset(), 5);
        let code_len = asm.code().len();
        asm.reset_next_offset(before);
        assert_eq!(asm.next_offset(), before);
        let pop = &asm.code()[code_len];
        assert_eq!(pop.op, Opcode::Pop);
        assert_eq!(pop.n, 0);
        assert_eq!(pop.d, 3);
        // Resetting to the current offset emits nothing.
        let code_len = asm.code().len();
        asm.reset_next_offset(asm.next_offset());
        assert_eq!(asm.code().len(), code_len);
    }

    #[test]
    fn back_patching_rejects_non_jumps() {
        let mut asm = Assembler::new();
        let load = asm.load_int(1);
        assert_eq!(
            asm.back_patch_jump(load, 0).unwrap_err(),
            AsmError::NotAJump { op: Opcode::LoadL }
        );
        let jump = asm.emit_jump(-1);
        asm.back_patch_jump(jump, 1).unwrap();
        assert_eq!(asm.code()[jump.0].d, 1);
    }

    #[test]
    fn bounds_check_emits_the_guard_sequence() {
        let mut asm = Assembler::new();
        asm.add_function(FuncId(0), "main", "function void main()");
        let start = asm.next_instruction_address();
        asm.emit_bounds_check(0, 3);
        let ops: Vec<Opcode> = asm.code()[start as usize..]
            .iter()
            .map(|inst| inst.op)
            .collect();
        assert_eq!(
            ops,
            vec![
                Opcode::Load,   // dup value
                Opcode::LoadL,  // lower
                Opcode::Call,   // ltI
                Opcode::JumpIf, // to fail
                Opcode::Load,   // dup value
                Opcode::LoadL,  // upper
                Opcode::Call,   // geI
                Opcode::JumpIf, // to fail
                Opcode::Jump,   // to end
                Opcode::LoadL,  // message id
                Opcode::Call,   // err
            ]
        );
        let code = &asm.code()[start as usize..];
        let fail = start + 9;
        let end = start + 11;
        assert_eq!(code[3].d, fail);
        assert_eq!(code[7].d, fail);
        assert_eq!(code[8].d, end);
        // The failure path raises the canonical message.
        let image = {
            let mut asm = asm;
            asm.emit_return(0, 0);
            asm.finish().unwrap()
        };
        assert!(image.strings.contains(&"Index out of bounds".to_owned()));
    }

    #[test]
    fn context_locations_are_attached_to_emitted_instructions() {
        let mut asm = Assembler::new();
        asm.push_context(SourceLocation::new(4, 2));
        let inst = asm.load_int(1);
        asm.pop_context();
        let symbols: Vec<_> = asm.code()[inst.0].debug.iter().collect();
        assert!(matches!(
            symbols[0],
            crate::debug::DebugSymbol::Location(loc) if loc.line == 4 && loc.column == 2
        ));
        let after = asm.load_int(2);
        assert!(!asm.code()[after.0]
            .debug
            .iter()
            .any(|s| matches!(s, crate::debug::DebugSymbol::Location(_))));
    }
}
