// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The machine state: register file, linear memory, and the error latch.
//!
//! All memory and stack operations are word-granular and bounds-checked; the
//! first failure transitions the state to [`ExecutionState::Error`] and is
//! latched for the embedder. Every register and memory access is counted by
//! the state's [`Profiler`].

use crate::error::{ErrorKind, ExecError};
use crate::primitive::Primitive;
use crate::profiler::Profiler;
use crate::register::Register;
use crate::value::{Value, ValueType};

/// Words of data memory.
pub const MAX_MEMORY_SIZE: usize = 1 << 20;

/// Size of the virtual code address space, including the primitive region.
pub const MAX_CODE_MEM_SIZE: i32 = 1 << 15;

/// Maximum number of real instructions; code addresses at or above this value
/// name primitives.
pub const MAX_INSTRUCTIONS: i32 = MAX_CODE_MEM_SIZE - Primitive::COUNT as i32;

/// The run state of a machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    /// The fetch-execute loop may proceed.
    Running,
    /// The program executed `HALT`.
    Halted,
    /// The embedder stopped the program.
    Terminated,
    /// A runtime error is latched; all further operations are no-ops.
    Error,
}

/// Register file, linear memory, profiler, and error latch for one run.
#[derive(Clone, Debug)]
pub struct MachineState {
    /// Current run state.
    pub execution_state: ExecutionState,
    /// The latched error, once `execution_state` is [`ExecutionState::Error`].
    pub error: Option<ExecError>,
    /// Access counters for this run.
    pub profiler: Profiler,

    registers: [Value; Register::COUNT],
    memory: Vec<Value>,
}

impl MachineState {
    /// Creates a fresh machine with zeroed registers and memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            execution_state: ExecutionState::Running,
            error: None,
            profiler: Profiler::new(),
            registers: [Value::ZERO; Register::COUNT],
            memory: vec![Value::ZERO; MAX_MEMORY_SIZE],
        }
    }

    /// Initializes the register file for an image of `instruction_count`
    /// instructions. CB, CT, PB, and PT must not change afterwards.
    pub fn init_registers(&mut self, instruction_count: i32) {
        self.registers[Register::CB.id() as usize] = Value::new(ValueType::CodeAddr, 0);
        self.registers[Register::CT.id() as usize] = Value::int(instruction_count);
        self.registers[Register::PB.id() as usize] = Value::int(MAX_INSTRUCTIONS);
        self.registers[Register::PT.id() as usize] = Value::int(MAX_CODE_MEM_SIZE);
        self.registers[Register::SB.id() as usize] = Value::new(ValueType::StackAddr, 0);
        self.registers[Register::ST.id() as usize] = Value::new(ValueType::StackAddr, 0);
        self.registers[Register::LB.id() as usize] = Value::new(ValueType::StackAddr, 0);
        self.registers[Register::CP.id() as usize] = Value::new(ValueType::CodeAddr, 0);
    }

    /// Returns the memory size in words.
    #[must_use]
    pub fn memory_size(&self) -> i32 {
        self.memory.len() as i32
    }

    // uncounted register access for error locations and internal checks
    fn reg_bits(&self, reg: Register) -> i32 {
        self.registers[reg.id() as usize].bits
    }

    fn cp(&self) -> i32 {
        self.reg_bits(Register::CP)
    }

    /// Reads a register.
    pub fn get_reg(&mut self, reg: Register) -> Value {
        self.profiler.reg_read(reg);
        self.registers[reg.id() as usize]
    }

    /// Reads a register as an integer.
    pub fn get_reg_int(&mut self, reg: Register) -> Result<i32, ExecError> {
        self.get_reg(reg).as_int()
    }

    /// Writes a register.
    pub fn set_reg(&mut self, reg: Register, val: Value) {
        self.profiler.reg_write(reg);
        self.registers[reg.id() as usize] = val;
    }

    /// Writes an integer to a register.
    pub fn set_reg_int(&mut self, reg: Register, val: i32) {
        self.set_reg(reg, Value::int(val));
    }

    /// Reads the word at `address`.
    pub fn get_mem(&mut self, address: i32) -> Result<Value, ExecError> {
        self.profiler.mem_read();
        usize::try_from(address)
            .ok()
            .and_then(|ix| self.memory.get(ix))
            .copied()
            .ok_or_else(|| {
                ExecError::at(
                    ErrorKind::InvalidAddress,
                    "Read at invalid memory address",
                    self.cp(),
                )
            })
    }

    /// Reads the word at `address` as an integer.
    pub fn get_mem_int(&mut self, address: i32) -> Result<i32, ExecError> {
        self.get_mem(address)?.as_int()
    }

    /// Reads the word at `address` as a float.
    pub fn get_mem_float(&mut self, address: i32) -> Result<f32, ExecError> {
        self.get_mem(address)?.as_float()
    }

    /// Writes a word to `address`.
    pub fn set_mem(&mut self, address: i32, val: Value) -> Result<(), ExecError> {
        self.profiler.mem_write();
        let cp = self.cp();
        let slot = usize::try_from(address)
            .ok()
            .and_then(|ix| self.memory.get_mut(ix))
            .ok_or_else(|| {
                ExecError::at(ErrorKind::InvalidAddress, "Write at invalid memory address", cp)
            })?;
        *slot = val;
        Ok(())
    }

    /// Copies `count` words from `src` to `dst`.
    ///
    /// Overlapping regions are copied in forward order; `POP` and `RETURN`
    /// rely on this to move a result over the words below it.
    pub fn copy_mem(&mut self, src: i32, dst: i32, count: i32) -> Result<(), ExecError> {
        self.profiler.mem_copy();
        for i in 0..count {
            let val = self.get_mem(src.wrapping_add(i))?;
            self.set_mem(dst.wrapping_add(i), val)?;
        }
        Ok(())
    }

    /// Fills `count` words at `dst` with a typed zero value.
    pub fn zero_mem(&mut self, dst: i32, count: i32, ty: ValueType) -> Result<(), ExecError> {
        self.profiler.mem_zero();
        let zero = Value::new(ty, 0);
        for i in 0..count {
            self.set_mem(dst.wrapping_add(i), zero)?;
        }
        Ok(())
    }

    /// Increments CP, preserving the code-address tag.
    pub fn inc_cp(&mut self) {
        let cp = self.get_reg(Register::CP);
        self.set_reg(
            Register::CP,
            Value::new(ValueType::CodeAddr, cp.bits.wrapping_add(1)),
        );
    }

    /// Grows the stack by `n` words and returns the *previous* stack top.
    pub fn inc_stack(&mut self, n: i32) -> Result<i32, ExecError> {
        let st = self.get_reg_int(Register::ST)?;
        if i64::from(st) + i64::from(n) >= i64::from(self.memory_size()) {
            return Err(ExecError::at(
                ErrorKind::StackOverflow,
                "Stack overflow",
                self.cp(),
            ));
        }
        self.set_reg_int(Register::ST, st + n);
        Ok(st)
    }

    /// Shrinks the stack by `n` words and returns the *new* stack top.
    pub fn dec_stack(&mut self, n: i32) -> Result<i32, ExecError> {
        let st = self.get_reg_int(Register::ST)?.wrapping_sub(n);
        if st < self.reg_bits(Register::SB) {
            return Err(ExecError::at(
                ErrorKind::StackUnderflow,
                "Stack underflow",
                self.cp(),
            ));
        }
        self.set_reg_int(Register::ST, st);
        Ok(st)
    }

    /// Pushes a single word.
    pub fn push_stack(&mut self, val: Value) -> Result<(), ExecError> {
        let st = self.get_reg_int(Register::ST)?;
        if st + 1 >= self.memory_size() {
            return Err(ExecError::at(
                ErrorKind::StackOverflow,
                "Stack overflow",
                self.cp(),
            ));
        }
        self.set_mem(st, val)?;
        self.set_reg_int(Register::ST, st + 1);
        Ok(())
    }

    /// Pops a single word.
    pub fn pop_stack(&mut self) -> Result<Value, ExecError> {
        let st = self.get_reg_int(Register::ST)? - 1;
        if st < self.reg_bits(Register::SB) {
            return Err(ExecError::at(
                ErrorKind::StackUnderflow,
                "Stack underflow",
                self.cp(),
            ));
        }
        let val = self.get_mem(st)?;
        self.set_reg_int(Register::ST, st);
        Ok(val)
    }

    /// Latches an error and stops the machine.
    pub fn raise_error(&mut self, error: ExecError) {
        self.execution_state = ExecutionState::Error;
        self.error = Some(error);
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
