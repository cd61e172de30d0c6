// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The type-annotated MAVL AST consumed by the code generator.
//!
//! The analysis stage produces these nodes: every expression carries its
//! resolved [`Type`], every identifier its resolved declaration id, and every
//! call its resolved callee. Node kinds are plain tagged variants; the code
//! generator pattern-matches over them.

use tam::asm::{Comparison, FuncId};
use tam::debug::SourceLocation;

use crate::builtins::Builtins;
use crate::types::Type;

/// A stable identifier for a declaration, assigned by the analysis stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeclId(pub u32);

/// A resolved value, variable, parameter, or iterator declaration.
#[derive(Clone, Debug)]
pub struct Declaration {
    /// Declaration id; unique within the module.
    pub id: DeclId,
    /// Declared name.
    pub name: String,
    /// Resolved type.
    pub ty: Type,
}

/// A compilation unit.
#[derive(Clone, Debug)]
pub struct Module {
    /// The builtin-function environment calls may resolve to.
    pub builtins: Builtins,
    /// User-defined functions in source order.
    pub functions: Vec<Function>,
}

/// A user-defined function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Function id; unique within the module, disjoint from builtin ids.
    pub id: FuncId,
    /// Function name; the function named `main` is the program entry.
    pub name: String,
    /// Resolved return type.
    pub return_type: Type,
    /// Formal parameters in source order.
    pub params: Vec<Declaration>,
    /// Body statements.
    pub body: Vec<Statement>,
    /// Position of the function header.
    pub loc: SourceLocation,
}

impl Function {
    /// Renders the source-level signature, used as a debug comment on the
    /// function label.
    #[must_use]
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("function {} {}({})", self.return_type, self.name, params)
    }
}

/// A statement with its source position.
#[derive(Clone, Debug)]
pub struct Statement {
    /// Statement kind.
    pub kind: StmtKind,
    /// Source position.
    pub loc: SourceLocation,
}

/// Statement kinds.
#[derive(Clone, Debug)]
pub enum StmtKind {
    /// `val T name = value;`
    ValueDefinition {
        /// The declared entity.
        decl: Declaration,
        /// Initializer expression.
        value: Expression,
    },
    /// `var T name;`
    VariableDeclaration {
        /// The declared entity.
        decl: Declaration,
    },
    /// `target = value;`
    Assignment {
        /// Left-hand side.
        target: LhsIdentifier,
        /// Right-hand side.
        value: Expression,
    },
    /// `if (condition) then else else`
    If {
        /// Condition.
        condition: Expression,
        /// Then branch.
        then_branch: Box<Statement>,
        /// Optional else branch.
        else_branch: Option<Box<Statement>>,
    },
    /// `for (init; condition; increment) body`, where the init and increment
    /// target previously declared variables.
    For {
        /// Variable receiving the init expression.
        init_decl: DeclId,
        /// Init expression.
        init: Expression,
        /// Loop condition.
        condition: Expression,
        /// Variable receiving the increment expression.
        incr_decl: DeclId,
        /// Increment expression.
        increment: Expression,
        /// Loop body.
        body: Box<Statement>,
    },
    /// `foreach (iterator : struct) body`
    ForEach {
        /// The iterator declaration.
        iterator: Declaration,
        /// Whether the iterator is a variable (writes are copied back).
        iterator_is_variable: bool,
        /// The iterated vector, matrix, or record.
        struct_expr: Expression,
        /// Loop body.
        body: Box<Statement>,
    },
    /// `switch (condition) { cases... default }`
    Switch {
        /// Discriminant.
        condition: Expression,
        /// Cases in source order.
        cases: Vec<Case>,
        /// At most one default.
        default: Option<Box<Statement>>,
    },
    /// An expression statement; the call's result, if any, is discarded.
    Call {
        /// The call expression (kind must be [`ExprKind::Call`]).
        call: Expression,
    },
    /// `return value;`
    Return {
        /// Return value expression.
        value: Expression,
    },
    /// `{ statements }`
    Compound {
        /// Block statements.
        statements: Vec<Statement>,
    },
}

/// One case of a switch statement.
#[derive(Clone, Debug)]
pub struct Case {
    /// The constant case value.
    pub condition: i32,
    /// Case body.
    pub body: Statement,
    /// Source position.
    pub loc: SourceLocation,
}

/// The left-hand side of an assignment.
#[derive(Clone, Debug)]
pub struct LhsIdentifier {
    /// The assigned declaration.
    pub decl: DeclId,
    /// The declaration's resolved type.
    pub decl_type: Type,
    /// How the declaration is accessed.
    pub access: LhsAccess,
    /// Source position.
    pub loc: SourceLocation,
}

/// Access paths on an assignment target.
#[derive(Clone, Debug)]
pub enum LhsAccess {
    /// The whole entity.
    Whole,
    /// One element of a vector.
    VectorElement(Box<Expression>),
    /// One element of a matrix.
    MatrixElement {
        /// Row index.
        row: Box<Expression>,
        /// Column index.
        col: Box<Expression>,
    },
    /// One field of a record.
    RecordField(String),
}

/// An expression with its resolved type and source position.
#[derive(Clone, Debug)]
pub struct Expression {
    /// Expression kind.
    pub kind: ExprKind,
    /// Resolved result type.
    pub ty: Type,
    /// Source position.
    pub loc: SourceLocation,
}

/// Binary arithmetic operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+` (element-wise on two structures)
    Add,
    /// `-` (element-wise on two structures)
    Sub,
    /// `*` (element-wise; also structure-scalar broadcast)
    Mul,
    /// `/` (scalars only)
    Div,
    /// `^` (scalars only)
    Pow,
}

/// A resolved function call.
#[derive(Clone, Debug)]
pub struct CallExpr {
    /// Resolved callee (user function or builtin).
    pub callee: FuncId,
    /// Callee name, for debug symbols.
    pub name: String,
    /// Actual parameters in source order.
    pub arguments: Vec<Expression>,
}

/// Expression kinds.
#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Integer literal.
    IntValue(i32),
    /// Float literal.
    FloatValue(f32),
    /// Boolean literal.
    BoolValue(bool),
    /// String literal.
    StringValue(String),
    /// A reference to a declared entity.
    IdentifierReference {
        /// The referenced declaration.
        decl: DeclId,
        /// The referenced name, for debug symbols.
        name: String,
    },
    /// A vector/matrix/record constructor; elements are pushed in order.
    StructureInit(Vec<Expression>),
    /// Binary arithmetic, including element-wise broadcast over structures.
    Arithmetic {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Comparison of two ints or two floats.
    Compare {
        /// Comparison operator.
        comparison: Comparison,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Logical conjunction (both operands are evaluated).
    And {
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Logical disjunction (both operands are evaluated).
    Or {
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Logical negation.
    Not(Box<Expression>),
    /// Arithmetic negation.
    UnaryMinus(Box<Expression>),
    /// Matrix product.
    MatrixMultiplication {
        /// Left matrix.
        left: Box<Expression>,
        /// Right matrix.
        right: Box<Expression>,
    },
    /// Dot product of two vectors.
    DotProduct {
        /// Left vector.
        left: Box<Expression>,
        /// Right vector.
        right: Box<Expression>,
    },
    /// Matrix transposition.
    MatrixTranspose(Box<Expression>),
    /// `.rows` of a matrix; a compile-time constant.
    MatrixRows(Box<Expression>),
    /// `.cols` of a matrix; a compile-time constant.
    MatrixCols(Box<Expression>),
    /// `.dimension` of a vector; a compile-time constant.
    VectorDimension(Box<Expression>),
    /// A function call.
    Call(CallExpr),
    /// Indexing a vector or a matrix row.
    ElementSelect {
        /// The indexed structure.
        struct_expr: Box<Expression>,
        /// Index expression.
        index: Box<Expression>,
    },
    /// Selecting a record field.
    RecordElementSelect {
        /// The record expression.
        record: Box<Expression>,
        /// Field name.
        field: String,
    },
    /// A contiguous sub-vector with a compile-time extent.
    SubVector {
        /// Source vector.
        vector: Box<Expression>,
        /// Runtime base index.
        base_index: Box<Expression>,
        /// Compile-time offset added to the base index.
        start_offset: i32,
    },
    /// A contiguous sub-matrix with compile-time extents.
    SubMatrix {
        /// Source matrix.
        matrix: Box<Expression>,
        /// Runtime row base index.
        row_base_index: Box<Expression>,
        /// Compile-time offset added to the row base.
        row_start_offset: i32,
        /// Runtime column base index.
        col_base_index: Box<Expression>,
        /// Compile-time offset added to the column base.
        col_start_offset: i32,
    },
    /// The ternary select expression `condition ? trueCase : falseCase`.
    Select {
        /// Condition.
        condition: Box<Expression>,
        /// Value if the condition holds.
        true_case: Box<Expression>,
        /// Value otherwise.
        false_case: Box<Expression>,
    },
}

impl Expression {
    /// Creates an expression node.
    #[must_use]
    pub fn new(kind: ExprKind, ty: Type, loc: SourceLocation) -> Self {
        Self { kind, ty, loc }
    }
}

impl Statement {
    /// Creates a statement node.
    #[must_use]
    pub fn new(kind: StmtKind, loc: SourceLocation) -> Self {
        Self { kind, loc }
    }
}
