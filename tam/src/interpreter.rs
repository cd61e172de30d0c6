// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fetch-execute loop and the primitive library.
//!
//! The interpreter owns a [`MachineState`] plus the program's I/O: a
//! [`BufRead`] for `read*` primitives, a [`Write`] for `print*` primitives,
//! and an optional base path against which matrix file paths are resolved.
//!
//! Execution is strictly single-threaded: one instruction per [`Interpreter::advance`]
//! call, side effects in program order. A cycle budget can be imposed via
//! [`Interpreter::run_bounded`]; hitting it leaves the machine `Running`.

use std::fmt;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, ExecError};
use crate::image::Image;
use crate::machine::{ExecutionState, MachineState};
use crate::opcode::Opcode;
use crate::primitive::Primitive;
use crate::register::Register;
use crate::value::{Value, ValueType};

/// The result of a completed (or aborted) run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program executed `HALT`.
    Halted,
    /// A runtime error was latched; see [`MachineState::error`].
    Error,
    /// The embedder terminated the program.
    Terminated,
    /// The cycle budget was exhausted; the machine is still `Running`.
    CyclesExceeded,
}

/// An interpreter for TAM images.
pub struct Interpreter<In, Out> {
    /// Base directory for resolving matrix file paths.
    pub base_path: Option<PathBuf>,
    /// The machine state of the current run.
    pub state: MachineState,
    /// The loaded image, if any.
    pub image: Option<Image>,
    /// Executed instruction count.
    pub cycles: u64,

    input: In,
    output: Out,
}

impl<In: BufRead, Out: Write> Interpreter<In, Out> {
    /// Creates an interpreter reading program input from `input` and writing
    /// program output to `output`. No image is loaded yet.
    pub fn new(input: In, output: Out) -> Self {
        Self {
            base_path: None,
            state: MachineState::new(),
            image: None,
            cycles: 0,
            input,
            output,
        }
    }

    /// Discards the machine state; with `unload_image`, also drops the image.
    pub fn reset(&mut self, unload_image: bool) {
        if unload_image {
            self.image = None;
        }
        self.state = MachineState::new();
        self.cycles = 0;
        self.init();
    }

    /// Loads an image, replacing any previous one, and resets the machine.
    pub fn load_image(&mut self, image: Image) {
        self.reset(true);
        self.image = Some(image);
        self.init();
    }

    /// Loads an image from a file.
    ///
    /// On failure the error is latched into the machine state and `false` is
    /// returned, so the embedder reports it like any runtime failure.
    pub fn load_image_file(&mut self, path: &Path) -> bool {
        self.reset(true);
        match Image::load(path) {
            Ok(image) => {
                self.load_image(image);
                true
            }
            Err(e) => {
                self.state.raise_error(ExecError::new(
                    ErrorKind::IoError,
                    format!("Failed to load program image: {e}"),
                ));
                false
            }
        }
    }

    fn init(&mut self) {
        if let Some(image) = &self.image {
            let count = image.instructions.len() as i32;
            self.state.init_registers(count);
        }
    }

    /// Runs until the program halts or fails.
    pub fn run(&mut self) -> RunOutcome {
        self.run_bounded(0)
    }

    /// Runs for at most `max_cycles` instructions (0 = unbounded).
    pub fn run_bounded(&mut self, max_cycles: u64) -> RunOutcome {
        while self.state.execution_state == ExecutionState::Running
            && (max_cycles == 0 || self.cycles < max_cycles)
        {
            self.advance();
        }
        self.outcome()
    }

    /// Returns the outcome corresponding to the current machine state.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        match self.state.execution_state {
            ExecutionState::Running => RunOutcome::CyclesExceeded,
            ExecutionState::Halted => RunOutcome::Halted,
            ExecutionState::Terminated => RunOutcome::Terminated,
            ExecutionState::Error => RunOutcome::Error,
        }
    }

    /// Stops the program on behalf of the embedder.
    pub fn terminate(&mut self) {
        self.state.execution_state = ExecutionState::Terminated;
    }

    /// Renders the run status for the user.
    #[must_use]
    pub fn status_text(&self) -> String {
        match self.state.execution_state {
            ExecutionState::Running => "The program is running.".into(),
            ExecutionState::Halted => "The program has finished successfully.".into(),
            ExecutionState::Terminated => "The program was terminated by the user.".into(),
            ExecutionState::Error => match &self.state.error {
                Some(e) => format!(
                    "The program has finished with an error: {}\nError message: {}",
                    e.kind, e.message
                ),
                None => "The program has finished with an error.".into(),
            },
        }
    }

    /// Fetches and executes a single instruction.
    ///
    /// Returns `false` once the machine is no longer running. The cycle
    /// counter advances even for the faulting instruction.
    pub fn advance(&mut self) -> bool {
        if self.state.execution_state != ExecutionState::Running {
            return false;
        }

        let inst_addr = match self.state.get_reg_int(Register::CP) {
            Ok(addr) => addr,
            Err(e) => {
                self.cycles += 1;
                self.state.raise_error(e);
                return false;
            }
        };

        let result = self.fetch_execute(inst_addr);
        self.cycles += 1;

        match result {
            Ok(()) => true,
            Err(mut e) => {
                e.fill_location(inst_addr);
                self.state.raise_error(e);
                false
            }
        }
    }

    fn fetch_execute(&mut self, inst_addr: i32) -> Result<(), ExecError> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| ExecError::new(ErrorKind::InternalError, "No image loaded"))?;
        let inst = image.instruction(inst_addr)?;
        let (op, r, n, d) = (inst.op, inst.r, inst.n, inst.d);
        // LOADL and PUSH take the pushed value's type from the instruction's
        // debug info; without symbols this is Unknown.
        let lit_ty = inst.debug.value_type();

        self.state.profiler.exec_opcode(op);

        match op {
            Opcode::Load => self.exec_load(r, n, d),
            Opcode::LoadA => self.exec_load_a(r, d),
            Opcode::LoadI => self.exec_load_i(n),
            Opcode::LoadL => self.exec_load_l(d, lit_ty),
            Opcode::Store => self.exec_store(r, n, d),
            Opcode::StoreI => self.exec_store_i(n),
            Opcode::Call => {
                let target = self.address(r, d)?;
                self.perform_call(target)
            }
            Opcode::CallI => {
                let target = self.pop_int()?;
                self.perform_call(target)
            }
            Opcode::Return => self.exec_return(n, d),
            Opcode::Push => self.exec_push(d, lit_ty),
            Opcode::Pop => self.exec_pop(n, d),
            Opcode::Jump => self.exec_jump(r, d),
            Opcode::JumpI => self.exec_jump_i(),
            Opcode::JumpIf => self.exec_jump_if(r, n, d),
            Opcode::Halt => {
                self.state.execution_state = ExecutionState::Halted;
                Ok(())
            }
        }
    }

    fn address(&mut self, base: Register, offset: i32) -> Result<i32, ExecError> {
        Ok(self.state.get_reg_int(base)?.wrapping_add(offset))
    }

    fn reg_type(base: Register) -> ValueType {
        if base.is_code() {
            ValueType::CodeAddr
        } else {
            ValueType::StackAddr
        }
    }

    // instructions

    /// `... -> ..., [n]`: copy `n` words from `d[r]` to the stack.
    fn exec_load(&mut self, r: Register, n: i32, d: i32) -> Result<(), ExecError> {
        let src = self.address(r, d)?;
        let dst = self.state.inc_stack(n)?;
        self.state.copy_mem(src, dst, n)?;
        self.state.inc_cp();
        Ok(())
    }

    /// `... -> ..., addr`: push `d[r]`, tagged by the register class.
    fn exec_load_a(&mut self, r: Register, d: i32) -> Result<(), ExecError> {
        let addr = self.address(r, d)?;
        self.state
            .push_stack(Value::new(Self::reg_type(r), addr))?;
        self.state.inc_cp();
        Ok(())
    }

    /// `..., addr -> ..., [n]`: pop an address, copy `n` words from it.
    fn exec_load_i(&mut self, n: i32) -> Result<(), ExecError> {
        let src = self.pop_int()?;
        let dst = self.state.inc_stack(n)?;
        self.state.copy_mem(src, dst, n)?;
        self.state.inc_cp();
        Ok(())
    }

    /// `... -> ..., d`: push the literal `d`.
    fn exec_load_l(&mut self, d: i32, lit_ty: ValueType) -> Result<(), ExecError> {
        self.state.push_stack(Value::new(lit_ty, d))?;
        self.state.inc_cp();
        Ok(())
    }

    /// `..., [n] -> ...`: store `n` words to `d[r]`.
    fn exec_store(&mut self, r: Register, n: i32, d: i32) -> Result<(), ExecError> {
        let dst = self.address(r, d)?;
        let src = self.state.dec_stack(n)?;
        self.state.copy_mem(src, dst, n)?;
        self.state.inc_cp();
        Ok(())
    }

    /// `..., [n], addr -> ...`: pop an address, store `n` words to it.
    fn exec_store_i(&mut self, n: i32) -> Result<(), ExecError> {
        let dst = self.pop_int()?;
        let src = self.state.dec_stack(n)?;
        self.state.copy_mem(src, dst, n)?;
        self.state.inc_cp();
        Ok(())
    }

    /// `... -> ..., dynLink, retAddr` for real code; primitives leave the
    /// stack to the callee.
    fn perform_call(&mut self, addr: i32) -> Result<(), ExecError> {
        if addr >= self.state.get_reg_int(Register::PB)? {
            self.call_primitive(addr)?;
            self.state.inc_cp();
        } else {
            let st = self.state.inc_stack(2)?;
            let cp = self.state.get_reg(Register::CP);
            let lb = self.state.get_reg(Register::LB);
            self.state.set_mem(st, lb)?;
            self.state
                .set_mem(st + 1, Value::new(ValueType::CodeAddr, cp.bits.wrapping_add(1)))?;
            self.state.set_reg_int(Register::LB, st);
            self.state.set_reg_int(Register::ST, st + 2);
            self.state
                .set_reg(Register::CP, Value::new(ValueType::CodeAddr, addr));
        }
        Ok(())
    }

    /// `..., [d], dynLink, retAddr, [n] -> ..., [n]`: pop the result over the
    /// frame and `d` words of arguments.
    fn exec_return(&mut self, n: i32, d: i32) -> Result<(), ExecError> {
        let lb = self.state.get_reg_int(Register::LB)?;
        let st = self.state.get_reg_int(Register::ST)?;
        let dyn_link = self.state.get_mem(lb)?;
        let ret_addr = self.state.get_mem(lb + 1)?;

        let src = st - n;
        let dst = lb - d;
        self.state.copy_mem(src, dst, n)?;

        self.state.set_reg_int(Register::ST, dst + n);
        self.state.set_reg(Register::LB, dyn_link);
        self.state.set_reg(Register::CP, ret_addr);
        Ok(())
    }

    /// `... -> ..., [d]`: reserve `d` typed zero words.
    fn exec_push(&mut self, d: i32, lit_ty: ValueType) -> Result<(), ExecError> {
        let st = self.state.inc_stack(d)?;
        self.state.zero_mem(st, d, lit_ty)?;
        self.state.inc_cp();
        Ok(())
    }

    /// `..., [d], [n] -> ..., [n]`: move the top `n` words `d` positions down.
    fn exec_pop(&mut self, n: i32, d: i32) -> Result<(), ExecError> {
        let st = self.state.get_reg_int(Register::ST)?;
        let src = st - n;
        let dst = st - n - d;
        self.state.copy_mem(src, dst, n)?;
        self.state.set_reg_int(Register::ST, dst + n);
        self.state.inc_cp();
        Ok(())
    }

    fn exec_jump(&mut self, r: Register, d: i32) -> Result<(), ExecError> {
        let target = self.address(r, d)?;
        self.state
            .set_reg(Register::CP, Value::new(ValueType::CodeAddr, target));
        Ok(())
    }

    fn exec_jump_i(&mut self) -> Result<(), ExecError> {
        let target = self.pop_int()?;
        self.state
            .set_reg(Register::CP, Value::new(ValueType::CodeAddr, target));
        Ok(())
    }

    /// `..., cond -> ...`: jump to `d[r]` if the popped value equals `n`.
    fn exec_jump_if(&mut self, r: Register, n: i32, d: i32) -> Result<(), ExecError> {
        let value = self.pop_int()?;
        if value == n {
            let target = self.address(r, d)?;
            self.state
                .set_reg(Register::CP, Value::new(ValueType::CodeAddr, target));
        } else {
            self.state.inc_cp();
        }
        Ok(())
    }

    // primitives

    fn call_primitive(&mut self, addr: i32) -> Result<(), ExecError> {
        let pb = self.state.get_reg(Register::PB).bits;
        let prim = Primitive::from_displacement(addr.wrapping_sub(pb))?;
        self.state.profiler.exec_primitive(prim);

        match prim {
            Primitive::Nop => Ok(()),
            Primitive::Err => self.prim_err(),

            Primitive::Not => {
                let v = self.pop_bool()?;
                self.push_bool(!v)
            }
            Primitive::And => {
                let r = self.pop_bool()?;
                let l = self.pop_bool()?;
                self.push_bool(l & r)
            }
            Primitive::Or => {
                let r = self.pop_bool()?;
                let l = self.pop_bool()?;
                self.push_bool(l | r)
            }

            Primitive::Succ => {
                let v = self.pop()?;
                self.push(Value::new(v.ty, v.bits.wrapping_add(1)))
            }
            Primitive::Pred => {
                let v = self.pop()?;
                self.push(Value::new(v.ty, v.bits.wrapping_sub(1)))
            }

            Primitive::NegI => {
                let v = self.pop_int()?;
                self.push_int(v.wrapping_neg())
            }
            Primitive::AddI => self.prim_add_i(),
            Primitive::SubI => {
                let r = self.pop()?;
                let l = self.pop()?;
                self.push(Value::new(l.ty, l.bits.wrapping_sub(r.bits)))
            }
            Primitive::MulI => {
                let r = self.pop_int()?;
                let l = self.pop_int()?;
                self.push_int(l.wrapping_mul(r))
            }
            Primitive::DivI => {
                let r = self.pop_int()?;
                let l = self.pop_int()?;
                if r == 0 {
                    return Err(ExecError::new(ErrorKind::ZeroDivision, "Divided by zero"));
                }
                self.push_int(l.wrapping_div(r))
            }
            Primitive::ModI => {
                let r = self.pop_int()?;
                let l = self.pop_int()?;
                if r == 0 {
                    return Err(ExecError::new(ErrorKind::ZeroDivision, "Divided by zero"));
                }
                self.push_int(l.wrapping_rem(r))
            }

            Primitive::EqI => self.int_compare(|l, r| l == r),
            Primitive::NeI => self.int_compare(|l, r| l != r),
            Primitive::LtI => self.int_compare(|l, r| l < r),
            Primitive::LeI => self.int_compare(|l, r| l <= r),
            Primitive::GtI => self.int_compare(|l, r| l > r),
            Primitive::GeI => self.int_compare(|l, r| l >= r),

            Primitive::NegF => {
                let v = self.pop_float()?;
                self.push_float(-v)
            }
            Primitive::AddF => self.float_arith(|l, r| l + r),
            Primitive::SubF => self.float_arith(|l, r| l - r),
            Primitive::MulF => self.float_arith(|l, r| l * r),
            Primitive::DivF => {
                let r = self.pop_float()?;
                let l = self.pop_float()?;
                if r == 0.0 {
                    return Err(ExecError::new(ErrorKind::ZeroDivision, "Divided by zero"));
                }
                self.push_float(l / r)
            }

            Primitive::EqF => self.float_compare(|l, r| l == r),
            Primitive::NeF => self.float_compare(|l, r| l != r),
            Primitive::LtF => self.float_compare(|l, r| l < r),
            Primitive::LeF => self.float_compare(|l, r| l <= r),
            Primitive::GtF => self.float_compare(|l, r| l > r),
            Primitive::GeF => self.float_compare(|l, r| l >= r),

            Primitive::ReadImage => Err(ExecError::new(
                ErrorKind::InternalError,
                "readImage is not implemented yet",
            )),
            Primitive::WriteImage => Err(ExecError::new(
                ErrorKind::InternalError,
                "writeImage is not implemented yet",
            )),

            Primitive::ReadIM64 => self.matrix_read(64, 64, parse_int),
            Primitive::ReadIM16 => self.matrix_read(16, 16, parse_int),
            Primitive::ReadIM9 => self.matrix_read(9, 9, parse_int),
            Primitive::WriteIM64 => self.matrix_write(64, 64, false),
            Primitive::WriteIM16 => self.matrix_write(16, 16, false),
            Primitive::WriteIM9 => self.matrix_write(9, 9, false),

            Primitive::ReadFM64 => self.matrix_read(64, 64, parse_float),
            Primitive::ReadFM16 => self.matrix_read(16, 16, parse_float),
            Primitive::ReadFM9 => self.matrix_read(9, 9, parse_float),
            Primitive::WriteFM64 => self.matrix_write(64, 64, true),
            Primitive::WriteFM16 => self.matrix_write(16, 16, true),
            Primitive::WriteFM9 => self.matrix_write(9, 9, true),

            Primitive::PowInt => {
                let e = self.pop_int()?;
                let b = self.pop_int()?;
                self.push_int(f64::from(b).powf(f64::from(e)) as i32)
            }
            Primitive::PowFloat => {
                let e = self.pop_float()?;
                let b = self.pop_float()?;
                self.push_float(f64::from(b).powf(f64::from(e)) as f32)
            }
            Primitive::SqrtInt => {
                let v = self.pop_int()?;
                self.push_int(f64::from(v).sqrt() as i32)
            }
            Primitive::SqrtFloat => {
                let v = self.pop_float()?;
                self.push_float(f64::from(v).sqrt() as f32)
            }

            Primitive::PrintInt => {
                let v = self.pop_int()?;
                self.print(format_args!("{v}"))
            }
            Primitive::PrintFloat => {
                let v = self.pop_float()?;
                let text = format_float(v);
                self.print(format_args!("{text}"))
            }
            Primitive::PrintBool => {
                let v = self.pop_bool()?;
                self.print(format_args!("{v}"))
            }
            Primitive::PrintString => {
                let id = self.pop_int()?;
                let s = self.image()?.string(id)?.to_owned();
                self.print(format_args!("{s}"))
            }
            Primitive::PrintLine => self.print(format_args!("\n")),

            Primitive::ReadInt => {
                let token = self.next_token()?;
                let v: i32 = token.parse().map_err(|_| {
                    ExecError::new(ErrorKind::IoError, format!("Invalid int input '{token}'"))
                })?;
                self.push_int(v)
            }
            Primitive::ReadFloat => {
                let token = self.next_token()?;
                let v: f32 = token.parse().map_err(|_| {
                    ExecError::new(ErrorKind::IoError, format!("Invalid float input '{token}'"))
                })?;
                self.push_float(v)
            }
            Primitive::ReadBool => {
                let token = self.next_token()?;
                let v = if token.eq_ignore_ascii_case("true") {
                    true
                } else if token.eq_ignore_ascii_case("false") {
                    false
                } else {
                    return Err(ExecError::new(
                        ErrorKind::IoError,
                        format!("Invalid bool input '{token}'"),
                    ));
                };
                self.push_bool(v)
            }

            Primitive::Int2Float => {
                let v = self.pop_int()?;
                self.push_float(v as f32)
            }
            Primitive::Float2Int => {
                let v = self.pop_float()?;
                self.push_int(v as i32)
            }

            Primitive::MatMulI => self.mat_mul(|acc, l, r| {
                Ok(Value::int(
                    acc.as_int()?
                        .wrapping_add(l.as_int()?.wrapping_mul(r.as_int()?)),
                ))
            }),
            Primitive::MatMulF => self.mat_mul(|acc, l, r| {
                Ok(Value::float(acc.as_float()? + l.as_float()? * r.as_float()?))
            }),
            Primitive::MatTranspose => self.mat_transpose(),
        }
    }

    fn prim_err(&mut self) -> Result<(), ExecError> {
        let id = self.pop_int()?;
        let message = self.image()?.string(id)?.to_owned();
        Err(ExecError::new(ErrorKind::RuntimeError, message))
    }

    /// Integer addition with address-tag propagation: adding an int to an
    /// address yields an address of the same tag, in either argument order.
    fn prim_add_i(&mut self) -> Result<(), ExecError> {
        let r = self.pop()?;
        let l = self.pop()?;
        let sum = l.bits.wrapping_add(r.bits);
        if l.ty.is_address() && r.ty == ValueType::Int {
            self.push(Value::new(l.ty, sum))
        } else if r.ty.is_address() && l.ty == ValueType::Int {
            self.push(Value::new(r.ty, sum))
        } else {
            self.push_int(sum)
        }
    }

    fn int_compare(&mut self, cmp: fn(i32, i32) -> bool) -> Result<(), ExecError> {
        let r = self.pop_int()?;
        let l = self.pop_int()?;
        self.push_bool(cmp(l, r))
    }

    fn float_arith(&mut self, op: fn(f32, f32) -> f32) -> Result<(), ExecError> {
        let r = self.pop_float()?;
        let l = self.pop_float()?;
        self.push_float(op(l, r))
    }

    fn float_compare(&mut self, cmp: fn(f32, f32) -> bool) -> Result<(), ExecError> {
        let r = self.pop_float()?;
        let l = self.pop_float()?;
        self.push_bool(cmp(l, r))
    }

    // matrix primitives; matrices are rows x cols words in row-major order

    fn mat_mul(
        &mut self,
        combine: fn(Value, Value, Value) -> Result<Value, ExecError>,
    ) -> Result<(), ExecError> {
        // stack: lmat, rmat, lrows, dim, rcols
        let cols = self.pop_int()?;
        let dim = self.pop_int()?;
        let rows = self.pop_int()?;

        let rmat = self.pop_matrix(dim, cols)?;
        let lmat = self.pop_matrix(rows, dim)?;

        let (rows, dim, cols) = (rows.max(0), dim.max(0), cols.max(0));
        let mut result = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                let mut sum = Value::ZERO;
                for i in 0..dim {
                    let l = lmat[(r * dim + i) as usize];
                    let rv = rmat[(i * cols + c) as usize];
                    sum = combine(sum, l, rv)?;
                }
                result.push(sum);
            }
        }
        self.push_matrix(&result)
    }

    fn mat_transpose(&mut self) -> Result<(), ExecError> {
        // stack: mat, rows, cols
        let cols = self.pop_int()?;
        let rows = self.pop_int()?;
        let mat = self.pop_matrix(rows, cols)?;

        let (rows, cols) = (rows.max(0), cols.max(0));
        let mut result = vec![Value::ZERO; (rows * cols) as usize];
        for r in 0..rows {
            for c in 0..cols {
                result[(c * rows + r) as usize] = mat[(r * cols + c) as usize];
            }
        }
        self.push_matrix(&result)
    }

    fn pop_matrix(&mut self, rows: i32, cols: i32) -> Result<Vec<Value>, ExecError> {
        let count = rows.max(0) * cols.max(0);
        let base = self.state.dec_stack(count)?;
        let mut mat = Vec::with_capacity(count as usize);
        for i in 0..count {
            mat.push(self.state.get_mem(base + i)?);
        }
        Ok(mat)
    }

    fn push_matrix(&mut self, mat: &[Value]) -> Result<(), ExecError> {
        let base = self.state.inc_stack(mat.len() as i32)?;
        for (i, val) in mat.iter().enumerate() {
            self.state.set_mem(base + i as i32, *val)?;
        }
        Ok(())
    }

    fn resolve_path(&self, relative: &str) -> Option<PathBuf> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match &self.base_path {
            Some(base) => base.join(trimmed),
            None => PathBuf::from(trimmed),
        })
    }

    fn matrix_read(
        &mut self,
        rows: i32,
        cols: i32,
        parse: fn(&str) -> Option<Value>,
    ) -> Result<(), ExecError> {
        let id = self.pop_int()?;
        let path = self
            .resolve_path(self.image()?.string(id)?)
            .ok_or_else(|| ExecError::new(ErrorKind::IoError, "Unable to read matrix: Empty path"))?;

        let text = fs::read_to_string(&path).map_err(|e| {
            ExecError::new(ErrorKind::IoError, format!("Unable to read matrix: {e}"))
        })?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if (lines.len() as i32) < rows {
            return Err(ExecError::new(
                ErrorKind::IoError,
                "Unable to read matrix: Too few rows",
            ));
        }
        if (lines.len() as i32) > rows {
            return Err(ExecError::new(
                ErrorKind::IoError,
                "Unable to read matrix: Too many rows",
            ));
        }

        let mut values = Vec::with_capacity((rows * cols) as usize);
        for line in lines {
            let row: Vec<&str> = line.split(',').map(str::trim).collect();
            if (row.len() as i32) < cols {
                return Err(ExecError::new(
                    ErrorKind::IoError,
                    "Unable to read matrix: Too few columns",
                ));
            }
            if (row.len() as i32) > cols {
                return Err(ExecError::new(
                    ErrorKind::IoError,
                    "Unable to read matrix: Too many columns",
                ));
            }
            for token in row {
                let value = parse(token).ok_or_else(|| {
                    ExecError::new(
                        ErrorKind::IoError,
                        format!("Unable to read matrix: Invalid number '{token}'"),
                    )
                })?;
                values.push(value);
            }
        }
        self.push_matrix(&values)
    }

    /// Prints the matrix on the stack top, then pops it and the path below it
    /// and writes the file.
    fn matrix_write(&mut self, rows: i32, cols: i32, is_float: bool) -> Result<(), ExecError> {
        self.print_matrix(rows, cols, is_float)?;

        let mat = self.pop_matrix(rows, cols)?;
        let id = self.pop_int()?;
        let Some(path) = self.resolve_path(self.image()?.string(id)?) else {
            return Ok(());
        };

        let mut text = String::new();
        for r in 0..rows {
            for c in 0..cols {
                if c != 0 {
                    text.push(',');
                }
                let val = mat[(r * cols + c) as usize];
                if is_float {
                    text.push_str(&format_float(val.as_float()?));
                } else {
                    text.push_str(&val.as_int()?.to_string());
                }
            }
            text.push('\n');
        }
        fs::write(&path, text).map_err(|e| {
            ExecError::new(ErrorKind::IoError, format!("Unable to write matrix: {e}"))
        })
    }

    fn print_matrix(&mut self, rows: i32, cols: i32, is_float: bool) -> Result<(), ExecError> {
        let mbase = self.state.get_reg_int(Register::ST)? - rows * cols;
        for r in 0..rows {
            for c in 0..cols {
                let offset = mbase + r * cols + c;
                if c != 0 {
                    self.print(format_args!(", "))?;
                }
                if is_float {
                    let v = self.state.get_mem_float(offset)?;
                    let text = format_float(v);
                    self.print(format_args!("{text}"))?;
                } else {
                    let v = self.state.get_mem_int(offset)?;
                    self.print(format_args!("{v}"))?;
                }
            }
            self.print(format_args!("\n"))?;
        }
        Ok(())
    }

    // helpers

    fn image(&self) -> Result<&Image, ExecError> {
        self.image
            .as_ref()
            .ok_or_else(|| ExecError::new(ErrorKind::InternalError, "No image loaded"))
    }

    fn print(&mut self, args: fmt::Arguments<'_>) -> Result<(), ExecError> {
        self.output.write_fmt(args).map_err(|e| {
            ExecError::new(ErrorKind::IoError, format!("Unable to write output: {e}"))
        })
    }

    /// Reads the next whitespace-delimited token from program input.
    fn next_token(&mut self) -> Result<String, ExecError> {
        let mut token = String::new();
        'outer: loop {
            let buf = self.input.fill_buf().map_err(|e| {
                ExecError::new(ErrorKind::IoError, format!("Unable to read input: {e}"))
            })?;
            if buf.is_empty() {
                break;
            }
            let mut consumed = 0;
            for &byte in buf {
                if byte.is_ascii_whitespace() {
                    consumed += 1;
                    if !token.is_empty() {
                        self.input.consume(consumed);
                        break 'outer;
                    }
                } else {
                    token.push(byte as char);
                    consumed += 1;
                }
            }
            self.input.consume(consumed);
        }
        if token.is_empty() {
            return Err(ExecError::new(
                ErrorKind::IoError,
                "Unexpected end of input",
            ));
        }
        Ok(token)
    }

    fn push(&mut self, val: Value) -> Result<(), ExecError> {
        self.state.push_stack(val)
    }

    fn push_int(&mut self, val: i32) -> Result<(), ExecError> {
        self.push(Value::int(val))
    }

    fn push_float(&mut self, val: f32) -> Result<(), ExecError> {
        self.push(Value::float(val))
    }

    fn push_bool(&mut self, val: bool) -> Result<(), ExecError> {
        self.push(Value::boolean(val))
    }

    fn pop(&mut self) -> Result<Value, ExecError> {
        self.state.pop_stack()
    }

    fn pop_int(&mut self) -> Result<i32, ExecError> {
        self.pop()?.as_int()
    }

    fn pop_float(&mut self) -> Result<f32, ExecError> {
        self.pop()?.as_float()
    }

    fn pop_bool(&mut self) -> Result<bool, ExecError> {
        self.pop()?.as_bool()
    }
}

fn parse_int(token: &str) -> Option<Value> {
    token.parse::<i32>().ok().map(Value::int)
}

fn parse_float(token: &str) -> Option<Value> {
    token.parse::<f32>().ok().map(Value::float)
}

/// Formats a float the way the textual outputs have always looked: a decimal
/// point is always present (`1.0`, not `1`), and always a `.`.
#[must_use]
pub fn format_float(value: f32) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn loadl(d: i32, ty: ValueType) -> Instruction {
        let mut inst = Instruction::plain(Opcode::LoadL, 0, d);
        inst.debug.add_type(ty);
        inst
    }

    fn call_prim(prim: Primitive) -> Instruction {
        Instruction::new(Opcode::Call, Register::PB, 0, prim.displacement())
    }

    fn halt() -> Instruction {
        Instruction::plain(Opcode::Halt, 0, 0)
    }

    fn run_image(image: Image) -> (RunOutcome, MachineState, Vec<u8>) {
        let mut out = Vec::new();
        let mut interp = Interpreter::new(std::io::empty(), &mut out);
        interp.load_image(image);
        let outcome = interp.run();
        let state = std::mem::take(&mut interp.state);
        drop(interp);
        (outcome, state, out)
    }

    fn run_image_with_input(image: Image, input: &str) -> (RunOutcome, MachineState, Vec<u8>) {
        let mut out = Vec::new();
        let mut interp = Interpreter::new(std::io::Cursor::new(input.to_owned()), &mut out);
        interp.load_image(image);
        let outcome = interp.run();
        let state = std::mem::take(&mut interp.state);
        drop(interp);
        (outcome, state, out)
    }

    #[test]
    fn add_and_print() {
        let image = Image::new(
            vec![
                loadl(40, ValueType::Int),
                loadl(2, ValueType::Int),
                call_prim(Primitive::AddI),
                call_prim(Primitive::PrintInt),
                halt(),
            ],
            vec![],
        );
        let (outcome, state, out) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(out, b"42");
        let mut state = state;
        assert_eq!(state.get_reg_int(Register::ST).unwrap(), 0);
    }

    #[test]
    fn untyped_literals_still_run() {
        // No debug type symbols at all; the Unknown wildcard lets addI work.
        let image = Image::new(
            vec![
                Instruction::plain(Opcode::LoadL, 0, 1),
                Instruction::plain(Opcode::LoadL, 0, 2),
                call_prim(Primitive::AddI),
                halt(),
            ],
            vec![],
        );
        let (outcome, mut state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(state.get_mem_int(0).unwrap(), 3);
    }

    #[test]
    fn add_i_propagates_address_tags() {
        let image = Image::new(
            vec![
                Instruction::new(Opcode::LoadA, Register::LB, 0, 5),
                loadl(2, ValueType::Int),
                call_prim(Primitive::AddI),
                halt(),
            ],
            vec![],
        );
        let (outcome, mut state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        let top = state.get_mem(0).unwrap();
        assert_eq!(top.ty, ValueType::StackAddr);
        assert_eq!(top.bits, 7);
    }

    #[test]
    fn load_a_tags_by_register_class() {
        let image = Image::new(
            vec![
                Instruction::new(Opcode::LoadA, Register::CB, 0, 3),
                Instruction::new(Opcode::LoadA, Register::ST, 0, 0),
                halt(),
            ],
            vec![],
        );
        let (_, mut state, _) = run_image(image);
        assert_eq!(state.get_mem(0).unwrap().ty, ValueType::CodeAddr);
        assert_eq!(state.get_mem(1).unwrap().ty, ValueType::StackAddr);
        // LOADA ST pushed the pre-push stack top.
        assert_eq!(state.get_mem(1).unwrap().bits, 1);
    }

    #[test]
    fn jumpif_takes_the_branch_on_match() {
        // 0: LOADL 1; 1: JUMPIF(1) -> 3; 2: HALT (skipped); 3: LOADL 9; 4: HALT
        let image = Image::new(
            vec![
                loadl(1, ValueType::Bool),
                Instruction::new(Opcode::JumpIf, Register::CB, 1, 3),
                halt(),
                loadl(9, ValueType::Int),
                halt(),
            ],
            vec![],
        );
        let (outcome, mut state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(state.get_mem_int(0).unwrap(), 9);
        assert_eq!(state.get_reg_int(Register::ST).unwrap(), 1);
    }

    #[test]
    fn jumpif_falls_through_on_mismatch() {
        let image = Image::new(
            vec![
                loadl(0, ValueType::Bool),
                Instruction::new(Opcode::JumpIf, Register::CB, 1, 4),
                loadl(7, ValueType::Int),
                halt(),
                halt(),
            ],
            vec![],
        );
        let (outcome, mut state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(state.get_mem_int(0).unwrap(), 7);
    }

    #[test]
    fn call_and_return_manage_the_frame() {
        // 0: CALL 3; 1: CALL printInt; 2: HALT
        // 3: LOADL 7; 4: RETURN(1) 0
        let image = Image::new(
            vec![
                Instruction::new(Opcode::Call, Register::CB, 0, 3),
                call_prim(Primitive::PrintInt),
                halt(),
                loadl(7, ValueType::Int),
                Instruction::plain(Opcode::Return, 1, 0),
            ],
            vec![],
        );
        let (outcome, mut state, out) = run_image(image);
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(out, b"7");
        assert_eq!(state.get_reg_int(Register::ST).unwrap(), 0);
        assert_eq!(state.get_reg_int(Register::LB).unwrap(), 0);
    }

    #[test]
    fn division_by_zero_latches_the_faulting_address() {
        let image = Image::new(
            vec![
                loadl(1, ValueType::Int),
                loadl(0, ValueType::Int),
                call_prim(Primitive::DivI),
                halt(),
            ],
            vec![],
        );
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        let err = state.error.unwrap();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(err.location, Some(2));
    }

    #[test]
    fn modulo_by_zero_fails() {
        let image = Image::new(
            vec![
                loadl(5, ValueType::Int),
                loadl(0, ValueType::Int),
                call_prim(Primitive::ModI),
                halt(),
            ],
            vec![],
        );
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn float_division_by_exact_zero_fails() {
        let image = Image::new(
            vec![
                loadl(Value::float(1.0).bits, ValueType::Float),
                loadl(Value::float(0.0).bits, ValueType::Float),
                call_prim(Primitive::DivF),
                halt(),
            ],
            vec![],
        );
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn err_primitive_carries_the_string() {
        let image = Image::new(
            vec![
                loadl(0, ValueType::Str),
                call_prim(Primitive::Err),
                halt(),
            ],
            vec!["Index out of bounds".into()],
        );
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        let err = state.error.unwrap();
        assert_eq!(err.kind, ErrorKind::RuntimeError);
        assert_eq!(err.message, "Index out of bounds");
    }

    #[test]
    fn fetch_outside_code_fails() {
        let image = Image::new(vec![Instruction::plain(Opcode::LoadL, 0, 0)], vec![]);
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::InvalidAddress);
    }

    #[test]
    fn cycle_budget_aborts_while_running() {
        let image = Image::new(
            vec![Instruction::new(Opcode::Jump, Register::CB, 0, 0)],
            vec![],
        );
        let mut out = Vec::new();
        let mut interp = Interpreter::new(std::io::empty(), &mut out);
        interp.load_image(image);
        assert_eq!(interp.run_bounded(10), RunOutcome::CyclesExceeded);
        assert_eq!(interp.state.execution_state, ExecutionState::Running);
        assert_eq!(interp.cycles, 10);
    }

    #[test]
    fn read_primitives_scan_tokens() {
        let image = Image::new(
            vec![
                call_prim(Primitive::ReadInt),
                call_prim(Primitive::ReadInt),
                call_prim(Primitive::AddI),
                call_prim(Primitive::PrintInt),
                call_prim(Primitive::ReadBool),
                call_prim(Primitive::PrintBool),
                halt(),
            ],
            vec![],
        );
        let (outcome, _, out) = run_image_with_input(image, "  40\n\t2  TRUE ");
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(out, b"42true");
    }

    #[test]
    fn malformed_input_fails_with_io_error() {
        let image = Image::new(vec![call_prim(Primitive::ReadInt), halt()], vec![]);
        let (outcome, state, _) = run_image_with_input(image, "twelve");
        assert_eq!(outcome, RunOutcome::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::IoError);
    }

    #[test]
    fn succ_and_pred_keep_the_tag() {
        let image = Image::new(
            vec![
                Instruction::new(Opcode::LoadA, Register::LB, 0, 4),
                call_prim(Primitive::Succ),
                call_prim(Primitive::Pred),
                halt(),
            ],
            vec![],
        );
        let (_, mut state, _) = run_image(image);
        let top = state.get_mem(0).unwrap();
        assert_eq!(top.ty, ValueType::StackAddr);
        assert_eq!(top.bits, 4);
    }

    #[test]
    fn conversions_truncate() {
        let image = Image::new(
            vec![
                loadl(Value::float(2.9).bits, ValueType::Float),
                call_prim(Primitive::Float2Int),
                call_prim(Primitive::PrintInt),
                loadl(3, ValueType::Int),
                call_prim(Primitive::Int2Float),
                call_prim(Primitive::PrintFloat),
                halt(),
            ],
            vec![],
        );
        let (_, _, out) = run_image(image);
        assert_eq!(out, b"23.0");
    }

    #[test]
    fn mat_transpose_reorders_row_major_words() {
        // 2x3 matrix [[1,2,3],[4,5,6]] -> 3x2 [[1,4],[2,5],[3,6]]
        let mut code = Vec::new();
        for v in [1, 2, 3, 4, 5, 6] {
            code.push(loadl(v, ValueType::Int));
        }
        code.push(loadl(2, ValueType::Int));
        code.push(loadl(3, ValueType::Int));
        code.push(call_prim(Primitive::MatTranspose));
        code.push(halt());
        let (outcome, mut state, _) = run_image(Image::new(code, vec![]));
        assert_eq!(outcome, RunOutcome::Halted);
        let words: Vec<i32> = (0..6).map(|i| state.get_mem_int(i).unwrap()).collect();
        assert_eq!(words, [1, 4, 2, 5, 3, 6]);
        assert_eq!(state.get_reg_int(Register::ST).unwrap(), 6);
    }

    #[test]
    fn mat_mul_multiplies_row_major_operands() {
        // [[1,2],[3,4]] * [[5,6],[7,8]] = [[19,22],[43,50]]
        let mut code = Vec::new();
        for v in [1, 2, 3, 4, 5, 6, 7, 8] {
            code.push(loadl(v, ValueType::Int));
        }
        for v in [2, 2, 2] {
            code.push(loadl(v, ValueType::Int));
        }
        code.push(call_prim(Primitive::MatMulI));
        code.push(halt());
        let (outcome, mut state, _) = run_image(Image::new(code, vec![]));
        assert_eq!(outcome, RunOutcome::Halted);
        let words: Vec<i32> = (0..4).map(|i| state.get_mem_int(i).unwrap()).collect();
        assert_eq!(words, [19, 22, 43, 50]);
    }

    #[test]
    fn reserved_image_primitives_fail() {
        let image = Image::new(vec![call_prim(Primitive::ReadImage), halt()], vec![]);
        let (outcome, state, _) = run_image(image);
        assert_eq!(outcome, RunOutcome::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::InternalError);
    }

    #[test]
    fn float_formatting_always_has_a_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(2.25), "2.25");
    }

    #[test]
    fn status_text_reports_the_error() {
        let image = Image::new(
            vec![
                loadl(1, ValueType::Int),
                loadl(0, ValueType::Int),
                call_prim(Primitive::DivI),
                halt(),
            ],
            vec![],
        );
        let mut out = Vec::new();
        let mut interp = Interpreter::new(std::io::empty(), &mut out);
        interp.load_image(image);
        interp.run();
        let status = interp.status_text();
        assert!(status.contains("zero division"));
        assert!(status.contains("Divided by zero"));
    }
}
