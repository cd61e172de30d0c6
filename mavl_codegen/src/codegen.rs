// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The code generator: walks a typed AST and emits a linear TAM instruction
//! stream through the assembler.
//!
//! Stack discipline: at every statement boundary the stack top equals
//! `LB + next_offset`. Expressions leave exactly their result words on the
//! stack. Blocks snapshot the local offset on entry and discard any slack on
//! exit. The inline comments on the emission sequences track the stack layout
//! in the form `..., a, b` (top on the right).

use std::collections::HashMap;
use std::fmt;

use tam::asm::{AsmError, Assembler, Comparison, InstrId};
use tam::image::Image;
use tam::primitive::Primitive;
use tam::register::Register;

use crate::ast::{
    BinaryOp, Case, DeclId, ExprKind, Expression, Function, LhsAccess, LhsIdentifier, Module,
    Statement, StmtKind,
};
use crate::types::Type;

/// A code generation failure.
///
/// Well-typed input cannot produce these; they indicate a bug in the analysis
/// stage or in the code generator itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    /// An impossible-by-typing AST shape was encountered.
    Internal(String),
    /// The assembler rejected an operation.
    Asm(AsmError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal compiler error: {msg}"),
            Self::Asm(e) => write!(f, "internal compiler error: {e}"),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Asm(e) => Some(e),
            Self::Internal(_) => None,
        }
    }
}

impl From<AsmError> for CompileError {
    fn from(e: AsmError) -> Self {
        Self::Asm(e)
    }
}

fn internal(msg: impl Into<String>) -> CompileError {
    CompileError::Internal(msg.into())
}

/// Compiles a module into an executable image.
pub fn generate(module: &Module) -> Result<Image, CompileError> {
    let mut generator = CodeGenerator::new();
    module.builtins.bind(&mut generator.asm);
    for function in &module.functions {
        generator.visit_function(function)?;
    }
    Ok(generator.asm.finish()?)
}

struct CodeGenerator {
    asm: Assembler,
    offsets: HashMap<DeclId, i32>,
}

impl CodeGenerator {
    fn new() -> Self {
        Self {
            asm: Assembler::new(),
            offsets: HashMap::new(),
        }
    }

    fn offset_of(&self, decl: DeclId) -> Result<i32, CompileError> {
        self.offsets
            .get(&decl)
            .copied()
            .ok_or_else(|| internal(format!("no local base offset for declaration #{}", decl.0)))
    }

    // functions

    fn visit_function(&mut self, function: &Function) -> Result<(), CompileError> {
        self.asm.push_context(function.loc);
        let result = self.gen_function(function);
        self.asm.pop_context();
        result
    }

    fn gen_function(&mut self, function: &Function) -> Result<(), CompileError> {
        self.asm
            .add_function(function.id, &function.name, &function.signature());

        // Parameters sit below the frame: the last parameter ends at 0[LB].
        let mut arg_offset = 0;
        for param in function.params.iter().rev() {
            arg_offset -= param.ty.word_size();
            self.offsets.insert(param.id, arg_offset);
        }

        for statement in &function.body {
            self.visit_statement(statement)?;
        }

        // The return value, if any, was left on the stack by the last
        // statement; the argument size is needed here to drop the frame.
        self.asm
            .emit_return(function.return_type.word_size(), -arg_offset);
        Ok(())
    }

    // statements

    fn visit_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        self.asm.push_context(statement.loc);
        let result = self.gen_statement(statement);
        self.asm.pop_context();
        result
    }

    fn gen_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match &statement.kind {
            StmtKind::ValueDefinition { decl, value } => {
                // The initializer's words become the entity's storage.
                self.visit_expression(value)?;
                let offset = self.asm.declare_local(decl.ty.word_size());
                self.offsets.insert(decl.id, offset);
                Ok(())
            }
            StmtKind::VariableDeclaration { decl } => {
                let push = self.asm.emit_push(decl.ty.word_size());
                self.asm.attach_name(push, &decl.name);
                self.asm.attach_type(push, decl.ty.value_type());
                let offset = self.asm.declare_local(decl.ty.word_size());
                self.offsets.insert(decl.id, offset);
                Ok(())
            }
            StmtKind::Assignment { target, value } => {
                self.visit_expression(value)?;
                self.gen_lhs_address(target)?;
                // ..., value, address
                self.asm.store_to_stack_address(value.ty.word_size());
                Ok(())
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.gen_if(condition, then_branch, else_branch.as_deref()),
            StmtKind::For {
                init_decl,
                init,
                condition,
                incr_decl,
                increment,
                body,
            } => self.gen_for(*init_decl, init, condition, *incr_decl, increment, body),
            StmtKind::ForEach {
                iterator,
                iterator_is_variable,
                struct_expr,
                body,
            } => self.gen_for_each(iterator, *iterator_is_variable, struct_expr, body),
            StmtKind::Switch {
                condition,
                cases,
                default,
            } => self.gen_switch(condition, cases, default.as_deref()),
            StmtKind::Call { call } => {
                self.visit_expression(call)?;
                let result_size = call.ty.word_size();
                if result_size != 0 {
                    let pop = self.asm.emit_pop(0, result_size);
                    self.asm.attach_comment(pop, "discard return value", false);
                }
                Ok(())
            }
            StmtKind::Return { value } => {
                // The RETURN instruction itself is emitted once per function.
                self.visit_expression(value)
            }
            StmtKind::Compound { statements } => {
                let old_offset = self.asm.next_offset();
                for statement in statements {
                    self.visit_statement(statement)?;
                }
                self.asm.reset_next_offset(old_offset);
                Ok(())
            }
        }
    }

    fn gen_if(
        &mut self,
        condition: &Expression,
        then_branch: &Statement,
        else_branch: Option<&Statement>,
    ) -> Result<(), CompileError> {
        let next_offset = self.asm.next_offset();

        self.visit_expression(condition)?;
        let jump_over_then = self.asm.emit_conditional_jump(false, -1);

        self.visit_statement(then_branch)?;
        self.asm.reset_next_offset(next_offset);

        let jump_over_else = if else_branch.is_some() {
            Some(self.asm.emit_jump(-1))
        } else {
            None
        };

        let end_of_then = self.asm.next_instruction_address();
        self.asm.back_patch_jump(jump_over_then, end_of_then)?;

        if let Some(else_branch) = else_branch {
            self.visit_statement(else_branch)?;
            self.asm.reset_next_offset(next_offset);

            let end_of_else = self.asm.next_instruction_address();
            if let Some(jump) = jump_over_else {
                self.asm.back_patch_jump(jump, end_of_else)?;
            }
        }
        Ok(())
    }

    fn gen_for(
        &mut self,
        init_decl: DeclId,
        init: &Expression,
        condition: &Expression,
        incr_decl: DeclId,
        increment: &Expression,
        body: &Statement,
    ) -> Result<(), CompileError> {
        let init_offset = self.offset_of(init_decl)?;
        let incr_offset = self.offset_of(incr_decl)?;

        self.visit_expression(init)?;
        self.asm.store_local(init.ty.word_size(), init_offset);

        // The condition sits below the body; skip over the body on entry.
        let jump_to_condition = self.asm.emit_jump(-1);
        let body_start = self.asm.next_instruction_address();

        let next_offset = self.asm.next_offset();
        self.visit_statement(body)?;
        self.asm.reset_next_offset(next_offset);

        self.visit_expression(increment)?;
        self.asm.store_local(increment.ty.word_size(), incr_offset);

        let condition_start = self.asm.next_instruction_address();
        self.asm.back_patch_jump(jump_to_condition, condition_start)?;

        self.visit_expression(condition)?;
        self.asm.emit_conditional_jump(true, body_start);
        Ok(())
    }

    fn gen_for_each(
        &mut self,
        iterator: &crate::ast::Declaration,
        iterator_is_variable: bool,
        struct_expr: &Expression,
        body: &Statement,
    ) -> Result<(), CompileError> {
        let local_size = self.asm.next_offset();
        let element_count = struct_expr.ty.word_size();

        // Base address of the iterated aggregate: reuse the storage of a
        // plain identifier, otherwise evaluate it onto the stack.
        let (struct_base, pop_struct) = match &struct_expr.kind {
            ExprKind::IdentifierReference { decl, .. } => (self.offset_of(*decl)?, false),
            _ => {
                let base = self.asm.next_offset();
                self.visit_expression(struct_expr)?;
                self.asm
                    .set_next_offset(self.asm.next_offset() + element_count);
                (base, true)
            }
        };

        // Index counter i.
        self.asm.load_int(0);
        self.asm.set_next_offset(self.asm.next_offset() + 1);
        // The iterator slot lives directly above i.
        self.offsets.insert(iterator.id, self.asm.next_offset());
        self.asm.set_next_offset(self.asm.next_offset() + 1);

        // loop condition (i < element count)
        let loop_condition = self.asm.next_instruction_address();
        // ..., i
        self.asm.load_value(Register::ST, 1, -1);
        // ..., i, i
        self.asm.load_int(element_count);
        // ..., i, i, count
        self.asm.emit_integer_comparison(Comparison::Less);
        // ..., i, bool
        let jump_to_loop_end = self.asm.emit_conditional_jump(false, -1);
        // ..., i

        // populate the iterator (cur = struct[i])
        self.asm.load_value(Register::ST, 1, -1);
        // ..., i, i
        self.asm.load_address(Register::LB, struct_base);
        // ..., i, i, &struct
        self.asm.call_primitive(Primitive::AddI);
        // ..., i, &struct[i]
        self.asm.load_from_stack_address(1);
        // ..., i, cur

        let next_offset = self.asm.next_offset();
        self.visit_statement(body)?;
        self.asm.reset_next_offset(next_offset);

        if iterator_is_variable {
            // ..., i, cur
            self.asm.load_value(Register::ST, 1, -2);
            // ..., i, cur, i
            self.asm.load_address(Register::LB, struct_base);
            // ..., i, cur, i, &struct
            self.asm.call_primitive(Primitive::AddI);
            // ..., i, cur, &struct[i]
            self.asm.store_to_stack_address(1);
            // ..., i
        } else {
            // ..., i, cur
            self.asm.emit_pop(0, 1);
            // ..., i
        }
        // ..., i
        self.asm.emit_increment();
        // ..., i+1
        self.asm.emit_jump(loop_condition);

        let loop_end = self.asm.next_instruction_address();
        self.asm.back_patch_jump(jump_to_loop_end, loop_end)?;

        // drop the index counter, and the aggregate copy if one was made
        if pop_struct {
            self.asm.emit_pop(0, element_count + 1);
        } else {
            self.asm.emit_pop(0, 1);
        }
        self.asm.set_next_offset(local_size);
        Ok(())
    }

    fn gen_switch(
        &mut self,
        condition: &Expression,
        cases: &[Case],
        default: Option<&Statement>,
    ) -> Result<(), CompileError> {
        let local_size = self.asm.next_offset();
        let mut end_jumps = Vec::new();

        // Evaluate the discriminant once into a synthetic local.
        self.visit_expression(condition)?;
        self.asm
            .set_next_offset(local_size + condition.ty.word_size());

        for case in cases {
            // Reload the discriminant for this case's comparison.
            self.asm.load_local(1, local_size);
            end_jumps.push(self.gen_case(case)?);
        }

        if let Some(default) = default {
            let next_offset = self.asm.next_offset();
            self.visit_statement(default)?;
            self.asm.reset_next_offset(next_offset);
        }

        let switch_end = self.asm.next_instruction_address();
        for jump in end_jumps {
            self.asm.back_patch_jump(jump, switch_end)?;
        }

        self.asm.reset_next_offset(local_size);
        Ok(())
    }

    fn gen_case(&mut self, case: &Case) -> Result<InstrId, CompileError> {
        self.asm.push_context(case.loc);
        // ..., switchValue
        self.asm.load_int(case.condition);
        // ..., switchValue, caseValue
        self.asm.emit_integer_comparison(Comparison::Equal);
        // ..., bool
        let jump_next_case = self.asm.emit_conditional_jump(false, -1);

        let next_offset = self.asm.next_offset();
        let body = self.visit_statement(&case.body);
        self.asm.reset_next_offset(next_offset);

        let jump_switch_end = self.asm.emit_jump(-1);
        let next_case = self.asm.next_instruction_address();
        let patch = self.asm.back_patch_jump(jump_next_case, next_case);
        self.asm.pop_context();
        body?;
        patch?;
        Ok(jump_switch_end)
    }

    // assignment targets

    fn gen_lhs_address(&mut self, target: &LhsIdentifier) -> Result<(), CompileError> {
        self.asm.push_context(target.loc);
        let result = self.gen_lhs_address_inner(target);
        self.asm.pop_context();
        result
    }

    fn gen_lhs_address_inner(&mut self, target: &LhsIdentifier) -> Result<(), CompileError> {
        let offset = self.offset_of(target.decl)?;
        match &target.access {
            LhsAccess::Whole => {
                self.asm.load_address(Register::LB, offset);
                Ok(())
            }
            LhsAccess::VectorElement(index) => {
                let Type::Vector { dim, .. } = &target.decl_type else {
                    return Err(internal("vector element assignment to a non-vector"));
                };
                // ..., &vec
                self.asm.load_address(Register::LB, offset);
                self.visit_expression(index)?;
                // ..., &vec, index
                self.asm.emit_bounds_check(0, *dim);
                self.asm.call_primitive(Primitive::AddI);
                // ..., &vec[index]
                Ok(())
            }
            LhsAccess::MatrixElement { row, col } => {
                let Type::Matrix { rows, cols, .. } = &target.decl_type else {
                    return Err(internal("matrix element assignment to a non-matrix"));
                };
                // ..., &mat
                self.asm.load_address(Register::LB, offset);
                self.visit_expression(row)?;
                // ..., &mat, row
                self.asm.emit_bounds_check(0, *rows);
                self.asm.load_int(*cols);
                // ..., &mat, row, cols
                self.asm.call_primitive(Primitive::MulI);
                // ..., &mat, rowOffset
                self.asm.call_primitive(Primitive::AddI);
                // ..., &mat[row][0]
                self.visit_expression(col)?;
                // ..., &mat[row][0], col
                self.asm.emit_bounds_check(0, *cols);
                self.asm.call_primitive(Primitive::AddI);
                // ..., &mat[row][col]
                Ok(())
            }
            LhsAccess::RecordField(field) => {
                let Type::Record(decl) = &target.decl_type else {
                    return Err(internal("record field assignment to a non-record"));
                };
                let field_offset = decl
                    .field_offset(field)
                    .ok_or_else(|| internal(format!("unknown record field '{field}'")))?;
                self.asm.load_address(Register::LB, offset + field_offset);
                Ok(())
            }
        }
    }

    // expressions

    fn visit_expression(&mut self, expr: &Expression) -> Result<(), CompileError> {
        self.asm.push_context(expr.loc);
        let result = self.gen_expression(expr);
        self.asm.pop_context();
        result
    }

    fn gen_expression(&mut self, expr: &Expression) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::IntValue(value) => {
                self.asm.load_int(*value);
                Ok(())
            }
            ExprKind::FloatValue(value) => {
                self.asm.load_float(*value);
                Ok(())
            }
            ExprKind::BoolValue(value) => {
                self.asm.load_bool(*value);
                Ok(())
            }
            ExprKind::StringValue(value) => {
                self.asm.load_string(value);
                Ok(())
            }
            ExprKind::IdentifierReference { decl, name } => {
                let offset = self.offset_of(*decl)?;
                let load = self.asm.load_local(expr.ty.word_size(), offset);
                self.asm.attach_name(load, name);
                Ok(())
            }
            ExprKind::StructureInit(elements) => {
                for element in elements {
                    self.visit_expression(element)?;
                }
                Ok(())
            }
            ExprKind::Arithmetic { op, left, right } => {
                self.gen_arithmetic(*op, left, right, &expr.ty)
            }
            ExprKind::Compare {
                comparison,
                left,
                right,
            } => {
                self.visit_expression(left)?;
                self.visit_expression(right)?;
                if left.ty == Type::Int {
                    self.asm.emit_integer_comparison(*comparison);
                } else {
                    self.asm.emit_float_comparison(*comparison);
                }
                Ok(())
            }
            ExprKind::And { left, right } => {
                self.visit_expression(left)?;
                self.visit_expression(right)?;
                self.asm.call_primitive(Primitive::And);
                Ok(())
            }
            ExprKind::Or { left, right } => {
                self.visit_expression(left)?;
                self.visit_expression(right)?;
                self.asm.call_primitive(Primitive::Or);
                Ok(())
            }
            ExprKind::Not(operand) => {
                self.visit_expression(operand)?;
                self.asm.call_primitive(Primitive::Not);
                Ok(())
            }
            ExprKind::UnaryMinus(operand) => {
                self.visit_expression(operand)?;
                if expr.ty == Type::Int {
                    self.asm.call_primitive(Primitive::NegI);
                } else {
                    self.asm.call_primitive(Primitive::NegF);
                }
                Ok(())
            }
            ExprKind::MatrixMultiplication { left, right } => {
                self.gen_matrix_multiplication(left, right)
            }
            ExprKind::DotProduct { left, right } => self.gen_dot_product(left, right),
            ExprKind::MatrixTranspose(operand) => self.gen_matrix_transpose(operand),
            ExprKind::MatrixRows(operand) => {
                let Type::Matrix { rows, .. } = &operand.ty else {
                    return Err(internal("rows of a non-matrix"));
                };
                let load = self.asm.load_int(*rows);
                self.asm.attach_comment(load, "matrix rows", false);
                Ok(())
            }
            ExprKind::MatrixCols(operand) => {
                let Type::Matrix { cols, .. } = &operand.ty else {
                    return Err(internal("cols of a non-matrix"));
                };
                let load = self.asm.load_int(*cols);
                self.asm.attach_comment(load, "matrix cols", false);
                Ok(())
            }
            ExprKind::VectorDimension(operand) => {
                let Type::Vector { dim, .. } = &operand.ty else {
                    return Err(internal("dimension of a non-vector"));
                };
                let load = self.asm.load_int(*dim);
                self.asm.attach_comment(load, "vector dim", false);
                Ok(())
            }
            ExprKind::Call(call) => {
                for argument in &call.arguments {
                    self.visit_expression(argument)?;
                }
                self.asm.emit_function_call(call.callee, &call.name);
                Ok(())
            }
            ExprKind::ElementSelect { struct_expr, index } => {
                self.gen_element_select(expr, struct_expr, index)
            }
            ExprKind::RecordElementSelect { record, field } => {
                self.gen_record_element_select(expr, record, field)
            }
            ExprKind::SubVector {
                vector,
                base_index,
                start_offset,
            } => self.gen_sub_vector(expr, vector, base_index, *start_offset),
            ExprKind::SubMatrix {
                matrix,
                row_base_index,
                row_start_offset,
                col_base_index,
                col_start_offset,
            } => self.gen_sub_matrix(
                expr,
                matrix,
                row_base_index,
                *row_start_offset,
                col_base_index,
                *col_start_offset,
            ),
            ExprKind::Select {
                condition,
                true_case,
                false_case,
            } => {
                self.visit_expression(condition)?;
                // ..., cond
                let jump_to_false = self.asm.emit_conditional_jump(false, -1);
                // ...
                self.visit_expression(true_case)?;
                // ..., trueResult
                let jump_to_end = self.asm.emit_jump(-1);

                let false_start = self.asm.next_instruction_address();
                self.asm.back_patch_jump(jump_to_false, false_start)?;
                self.visit_expression(false_case)?;
                // ..., falseResult

                let end = self.asm.next_instruction_address();
                self.asm.back_patch_jump(jump_to_end, end)?;
                // ..., result
                Ok(())
            }
        }
    }

    fn scalar_primitive(
        op: BinaryOp,
    ) -> (&'static str, Primitive, Primitive) {
        match op {
            BinaryOp::Add => ("addition", Primitive::AddI, Primitive::AddF),
            BinaryOp::Sub => ("subtraction", Primitive::SubI, Primitive::SubF),
            BinaryOp::Mul => ("multiplication", Primitive::MulI, Primitive::MulF),
            BinaryOp::Div => ("division", Primitive::DivI, Primitive::DivF),
            BinaryOp::Pow => ("exponentiation", Primitive::PowInt, Primitive::PowFloat),
        }
    }

    /// Binary arithmetic, including the element-wise broadcast forms. The
    /// broadcast loops update the left operand (or its copy) in place using
    /// only ST-relative addressing, so no extra locals are needed.
    fn gen_arithmetic(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        result_type: &Type,
    ) -> Result<(), CompileError> {
        let (op_name, int_primitive, float_primitive) = Self::scalar_primitive(op);
        let (allow_left_struct, allow_right_struct, allow_both_struct) = match op {
            BinaryOp::Add | BinaryOp::Sub => (false, false, true),
            BinaryOp::Mul => (true, true, true),
            BinaryOp::Div | BinaryOp::Pow => (false, false, false),
        };

        let l_size = left.ty.word_size();
        let r_size = right.ty.word_size();

        self.visit_expression(left)?;
        self.visit_expression(right)?;

        if *result_type == Type::Int {
            self.asm.call_primitive(int_primitive);
            return Ok(());
        }
        if *result_type == Type::Float {
            self.asm.call_primitive(float_primitive);
            return Ok(());
        }

        if left.ty.is_struct() && right.ty.is_struct() {
            if !allow_both_struct {
                return Err(internal(format!(
                    "{op_name} does not support structures for both operands"
                )));
            }
            let primitive = if left.ty.element_type() == Some(crate::types::ScalarType::Int) {
                int_primitive
            } else {
                float_primitive
            };

            // ..., left, right
            self.asm.load_int(0);
            // ..., left, right, i (0)
            let loop_begin = self.asm.next_instruction_address();

            // load operands
            self.asm.load_value(Register::ST, 1, -1);
            // ..., left, right, i, i
            self.asm.load_address(Register::ST, -2 - l_size - r_size);
            // ..., left, right, i, i, &left
            self.asm.call_primitive(Primitive::AddI);
            // ..., left, right, i, &left[i]
            self.asm.load_from_stack_address(1);
            // ..., left, right, i, left[i]
            self.asm.load_value(Register::ST, 1, -2);
            // ..., left, right, i, left[i], i
            self.asm.load_address(Register::ST, -3 - r_size);
            // ..., left, right, i, left[i], i, &right
            self.asm.call_primitive(Primitive::AddI);
            // ..., left, right, i, left[i], &right[i]
            self.asm.load_from_stack_address(1);
            // ..., left, right, i, left[i], right[i]

            // combine and store
            self.asm.call_primitive(primitive);
            // ..., left, right, i, elem
            self.asm.load_value(Register::ST, 1, -2);
            // ..., left, right, i, elem, i
            self.asm.load_address(Register::ST, -3 - l_size - r_size);
            // ..., left, right, i, elem, i, &left
            self.asm.call_primitive(Primitive::AddI);
            // ..., left, right, i, elem, &left[i]
            self.asm.store_to_stack_address(1);
            // ..., left, right, i

            // increment and check
            self.asm.emit_increment();
            // ..., left, right, i+1
            self.asm.load_value(Register::ST, 1, -1);
            // ..., left, right, i+1, i+1
            self.asm.load_int(l_size);
            // ..., left, right, i+1, i+1, size
            self.asm.emit_integer_comparison(Comparison::Less);
            // ..., left, right, i+1, bool
            self.asm.emit_conditional_jump(true, loop_begin);
            // ..., left, right, i+1
            self.asm.emit_pop(0, 1 + r_size);
            // ..., result
            return Ok(());
        }

        if left.ty.is_struct() {
            if !allow_left_struct {
                return Err(internal(format!(
                    "{op_name} does not support structures for its left operand"
                )));
            }
            let primitive = if right.ty == Type::Int {
                int_primitive
            } else {
                float_primitive
            };

            // ..., struct, num
            self.asm.load_int(0);
            // ..., struct, num, i (0)
            let loop_start = self.asm.next_instruction_address();

            // load operands
            self.asm.load_value(Register::ST, 1, -1);
            // ..., struct, num, i, i
            self.asm.load_address(Register::ST, -3 - l_size);
            // ..., struct, num, i, i, &struct
            self.asm.call_primitive(Primitive::AddI);
            // ..., struct, num, i, &struct[i]
            self.asm.load_from_stack_address(1);
            // ..., struct, num, i, struct[i]
            self.asm.load_value(Register::ST, 1, -3);
            // ..., struct, num, i, struct[i], num

            // combine and store
            self.asm.call_primitive(primitive);
            // ..., struct, num, i, elem
            self.asm.load_value(Register::ST, 1, -2);
            // ..., struct, num, i, elem, i
            self.asm.load_address(Register::ST, -4 - l_size);
            // ..., struct, num, i, elem, i, &struct
            self.asm.call_primitive(Primitive::AddI);
            // ..., struct, num, i, elem, &struct[i]
            self.asm.store_to_stack_address(1);
            // ..., struct, num, i

            // increment and check
            self.asm.emit_increment();
            // ..., struct, num, i+1
            self.asm.load_value(Register::ST, 1, -1);
            // ..., struct, num, i+1, i+1
            self.asm.load_int(l_size);
            // ..., struct, num, i+1, i+1, size
            self.asm.emit_integer_comparison(Comparison::Less);
            // ..., struct, num, i+1, bool
            self.asm.emit_conditional_jump(true, loop_start);
            // ..., struct, num, i+1
            self.asm.emit_pop(0, 2);
            // ..., struct
            return Ok(());
        }

        if right.ty.is_struct() {
            if !allow_right_struct {
                return Err(internal(format!(
                    "{op_name} does not support structures for its right operand"
                )));
            }
            let primitive = if left.ty == Type::Int {
                int_primitive
            } else {
                float_primitive
            };

            // ..., num, struct
            self.asm.load_int(0);
            // ..., num, struct, i (0)
            let loop_start = self.asm.next_instruction_address();

            // load operands
            self.asm.load_value(Register::ST, 1, -1);
            // ..., num, struct, i, i
            self.asm.load_address(Register::ST, -2 - r_size);
            // ..., num, struct, i, i, &struct
            self.asm.call_primitive(Primitive::AddI);
            // ..., num, struct, i, &struct[i]
            self.asm.load_from_stack_address(1);
            // ..., num, struct, i, struct[i]
            self.asm.load_value(Register::ST, 1, -3 - r_size);
            // ..., num, struct, i, struct[i], num

            // combine and store
            self.asm.call_primitive(primitive);
            // ..., num, struct, i, elem
            self.asm.load_value(Register::ST, 1, -2);
            // ..., num, struct, i, elem, i
            self.asm.load_address(Register::ST, -3 - r_size);
            // ..., num, struct, i, elem, i, &struct
            self.asm.call_primitive(Primitive::AddI);
            // ..., num, struct, i, elem, &struct[i]
            self.asm.store_to_stack_address(1);
            // ..., num, struct, i

            // increment and check
            self.asm.emit_increment();
            // ..., num, struct, i+1
            self.asm.load_value(Register::ST, 1, -1);
            // ..., num, struct, i+1, i+1
            self.asm.load_int(r_size);
            // ..., num, struct, i+1, i+1, size
            self.asm.emit_integer_comparison(Comparison::Less);
            // ..., num, struct, i+1, bool
            self.asm.emit_conditional_jump(true, loop_start);
            // ..., num, struct, i+1
            self.asm.emit_pop(0, 1);
            // ..., num, struct
            self.asm.emit_pop(r_size, 1);
            // ..., struct
            return Ok(());
        }

        Err(internal(format!(
            "{op_name} with result type {result_type} is not scalar or element-wise"
        )))
    }

    fn gen_matrix_multiplication(
        &mut self,
        left: &Expression,
        right: &Expression,
    ) -> Result<(), CompileError> {
        self.visit_expression(left)?;
        self.visit_expression(right)?;

        let Type::Matrix {
            elem,
            rows: l_rows,
            cols: l_cols,
        } = &left.ty
        else {
            return Err(internal("matrix multiplication of a non-matrix"));
        };
        let Type::Matrix { cols: r_cols, .. } = &right.ty else {
            return Err(internal("matrix multiplication of a non-matrix"));
        };

        // ..., lmat, rmat
        self.asm.load_int(*l_rows);
        self.asm.load_int(*l_cols);
        self.asm.load_int(*r_cols);
        // ..., lmat, rmat, lrows, dim, rcols
        self.asm.call_primitive(if *elem == crate::types::ScalarType::Int {
            Primitive::MatMulI
        } else {
            Primitive::MatMulF
        });
        Ok(())
    }

    /// A dot product is a 1 x dim by dim x 1 matrix multiplication yielding a
    /// 1 x 1 result.
    fn gen_dot_product(
        &mut self,
        left: &Expression,
        right: &Expression,
    ) -> Result<(), CompileError> {
        let Type::Vector { elem, dim } = &left.ty else {
            return Err(internal("dot product of a non-vector"));
        };

        self.visit_expression(left)?;
        self.visit_expression(right)?;

        self.asm.load_int(1);
        self.asm.load_int(*dim);
        self.asm.load_int(1);
        self.asm.call_primitive(if *elem == crate::types::ScalarType::Int {
            Primitive::MatMulI
        } else {
            Primitive::MatMulF
        });
        Ok(())
    }

    fn gen_matrix_transpose(&mut self, operand: &Expression) -> Result<(), CompileError> {
        let Type::Matrix { rows, cols, .. } = &operand.ty else {
            return Err(internal("transpose of a non-matrix"));
        };
        self.visit_expression(operand)?;

        // A single row or column is its own transpose in row-major storage.
        if *cols <= 1 || *rows <= 1 {
            return Ok(());
        }
        self.asm.load_int(*rows);
        self.asm.load_int(*cols);
        self.asm.call_primitive(Primitive::MatTranspose);
        Ok(())
    }

    fn gen_element_select(
        &mut self,
        expr: &Expression,
        struct_expr: &Expression,
        index: &Expression,
    ) -> Result<(), CompileError> {
        let struct_size = struct_expr.ty.word_size();
        let result_size = expr.ty.word_size();
        let upper_bound = struct_size / result_size;

        // ...
        self.visit_expression(struct_expr)?;
        // ..., struct
        self.asm.load_address(Register::ST, -struct_size);
        // ..., struct, &struct
        self.visit_expression(index)?;
        self.asm.emit_bounds_check(0, upper_bound);
        // ..., struct, &struct, index
        if result_size != 1 {
            self.asm.load_int(result_size);
            self.asm.call_primitive(Primitive::MulI);
        }
        self.asm.call_primitive(Primitive::AddI);
        // ..., struct, &struct[index]
        self.asm.load_from_stack_address(result_size);
        // ..., struct, result
        self.asm.emit_pop(result_size, struct_size);
        // ..., result
        Ok(())
    }

    fn gen_record_element_select(
        &mut self,
        expr: &Expression,
        record: &Expression,
        field: &str,
    ) -> Result<(), CompileError> {
        let Type::Record(decl) = &record.ty else {
            return Err(internal("field selection on a non-record"));
        };
        let offset = decl
            .field_offset(field)
            .ok_or_else(|| internal(format!("unknown record field '{field}'")))?;
        let record_size = record.ty.word_size();
        let element_size = expr.ty.word_size();

        // ...
        self.visit_expression(record)?;
        // ..., record
        self.asm.load_address(Register::ST, -record_size + offset);
        // ..., record, &record[offset]
        self.asm.load_from_stack_address(element_size);
        // ..., record, result
        self.asm.emit_pop(element_size, record_size);
        // ..., result
        Ok(())
    }

    fn gen_sub_vector(
        &mut self,
        expr: &Expression,
        vector: &Expression,
        base_index: &Expression,
        start_offset: i32,
    ) -> Result<(), CompileError> {
        let result_size = expr.ty.word_size();
        let vector_size = vector.ty.word_size();

        // ...
        self.visit_expression(vector)?;
        // ..., vec
        self.asm.load_address(Register::ST, -vector_size);
        // ..., vec, &vec
        self.visit_expression(base_index)?;
        // ..., vec, &vec, base
        self.asm.load_int(start_offset);
        self.asm.call_primitive(Primitive::AddI);
        // ..., vec, &vec, base+start
        self.asm.emit_bounds_check(0, vector_size - result_size + 1);
        self.asm.call_primitive(Primitive::AddI);
        // ..., vec, &vec[base+start]
        self.asm.load_from_stack_address(result_size);
        // ..., vec, result
        self.asm.emit_pop(result_size, vector_size);
        // ..., result
        Ok(())
    }

    fn gen_sub_matrix(
        &mut self,
        expr: &Expression,
        matrix: &Expression,
        row_base_index: &Expression,
        row_start_offset: i32,
        col_base_index: &Expression,
        col_start_offset: i32,
    ) -> Result<(), CompileError> {
        let Type::Matrix {
            rows: mat_rows,
            cols: mat_cols,
            ..
        } = matrix.ty
        else {
            return Err(internal("sub-matrix of a non-matrix"));
        };
        let Type::Matrix {
            rows: res_rows,
            cols: res_cols,
            ..
        } = expr.ty
        else {
            return Err(internal("sub-matrix with a non-matrix result"));
        };
        let mat_size = matrix.ty.word_size();
        let res_size = expr.ty.word_size();

        // ...
        self.visit_expression(matrix)?;
        // ..., mat
        self.asm.emit_push(res_size);
        // ..., mat, res
        self.asm.load_address(Register::ST, -mat_size - res_size);
        // ..., mat, res, &mat
        self.visit_expression(row_base_index)?;
        if row_start_offset != 0 {
            self.asm.load_int(row_start_offset);
            self.asm.call_primitive(Primitive::AddI);
        }
        self.asm.emit_bounds_check(0, mat_rows - res_rows + 1);
        // ..., mat, res, &mat, minRow
        self.asm.load_int(mat_cols);
        self.asm.call_primitive(Primitive::MulI);
        self.asm.call_primitive(Primitive::AddI);
        // ..., mat, res, &mat[minRow][0]
        self.visit_expression(col_base_index)?;
        if col_start_offset != 0 {
            self.asm.load_int(col_start_offset);
            self.asm.call_primitive(Primitive::AddI);
        }
        self.asm.emit_bounds_check(0, mat_cols - res_cols + 1);
        // ..., mat, res, &mat[minRow][0], minCol
        self.asm.call_primitive(Primitive::AddI);
        // ..., mat, res, &mat[minRow][minCol]
        self.asm.load_address(Register::ST, -res_size - 1);
        // ..., mat, res, srcPtr, &res
        self.asm.load_int(0);
        // ..., mat, res, srcPtr, dstPtr, i (0)

        // copy the sub-matrix row by row
        let loop_start = self.asm.next_instruction_address();
        // ..., mat, res, srcPtr, dstPtr, i
        self.asm.load_value(Register::ST, 1, -1);
        // ..., mat, res, srcPtr, dstPtr, i, i
        let jump_end = self.asm.emit_conditional_jump_int(res_rows, -1);
        // ..., mat, res, srcPtr, dstPtr, i

        // copy one row
        self.asm.load_value(Register::ST, 1, -3);
        // ..., mat, res, srcPtr, dstPtr, i, srcPtr
        self.asm.load_from_stack_address(res_cols);
        // ..., mat, res, srcPtr, dstPtr, i, row
        self.asm.load_value(Register::ST, 1, -2 - res_cols);
        // ..., mat, res, srcPtr, dstPtr, i, row, dstPtr
        self.asm.store_to_stack_address(res_cols);
        // ..., mat, res, srcPtr, dstPtr, i

        // advance both pointers
        self.asm.load_value(Register::ST, 1, -3);
        // ..., mat, res, srcPtr, dstPtr, i, srcPtr
        self.asm.load_int(mat_cols);
        // ..., mat, res, srcPtr, dstPtr, i, srcPtr, matCols
        self.asm.call_primitive(Primitive::AddI);
        // ..., mat, res, srcPtr, dstPtr, i, srcPtr'
        self.asm.store_value(Register::ST, 1, -4);
        // ..., mat, res, srcPtr', dstPtr, i
        self.asm.load_value(Register::ST, 1, -2);
        // ..., mat, res, srcPtr', dstPtr, i, dstPtr
        self.asm.load_int(res_cols);
        // ..., mat, res, srcPtr', dstPtr, i, dstPtr, resCols
        self.asm.call_primitive(Primitive::AddI);
        // ..., mat, res, srcPtr', dstPtr, i, dstPtr'
        self.asm.store_value(Register::ST, 1, -3);
        // ..., mat, res, srcPtr', dstPtr', i
        self.asm.emit_increment();
        // ..., mat, res, srcPtr', dstPtr', i'

        self.asm.emit_jump(loop_start);
        let loop_end = self.asm.next_instruction_address();
        self.asm.back_patch_jump(jump_end, loop_end)?;

        // ..., mat, res, srcPtr, dstPtr, i
        self.asm.emit_pop(0, 3);
        // ..., mat, res
        self.asm.emit_pop(res_size, mat_size);
        // ..., res
        Ok(())
    }
}
