// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolved MAVL types.
//!
//! The analysis stage resolves every declaration and expression to one of
//! these types before code generation. Word sizes are fixed: primitives take
//! one word, a vector takes its dimension, a matrix `rows * cols`, a record
//! the sum of its field sizes.

use std::fmt;
use std::rc::Rc;

use tam::value::ValueType;

/// The element type of a vector or matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarType {
    /// 32-bit integer elements.
    Int,
    /// 32-bit float elements.
    Float,
    /// Boolean elements.
    Bool,
}

impl ScalarType {
    /// Returns the machine-level tag for this element type.
    #[must_use]
    pub const fn value_type(self) -> ValueType {
        match self {
            Self::Int => ValueType::Int,
            Self::Float => ValueType::Float,
            Self::Bool => ValueType::Bool,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// One field of a record type.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: Type,
}

/// A named record type declaration.
///
/// Field offsets are computed from the declaration order: a field starts at
/// the sum of the word sizes of the fields preceding it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordTypeDecl {
    /// Record type name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<RecordField>,
}

impl RecordTypeDecl {
    /// Returns the total word size of the record.
    #[must_use]
    pub fn word_size(&self) -> i32 {
        self.fields.iter().map(|f| f.ty.word_size()).sum()
    }

    /// Returns the word offset of the named field within the record.
    #[must_use]
    pub fn field_offset(&self, name: &str) -> Option<i32> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some(offset);
            }
            offset += field.ty.word_size();
        }
        None
    }

    /// Returns the named field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A resolved MAVL type.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    /// The absent result type of procedures.
    Void,
    /// 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// Boolean.
    Bool,
    /// String constant (one word: the string id).
    Str,
    /// Fixed-size vector.
    Vector {
        /// Element type.
        elem: ScalarType,
        /// Number of elements.
        dim: i32,
    },
    /// Fixed-size matrix, stored row-major.
    Matrix {
        /// Element type.
        elem: ScalarType,
        /// Row count.
        rows: i32,
        /// Column count.
        cols: i32,
    },
    /// A record; shared so many expressions can reference one declaration.
    Record(Rc<RecordTypeDecl>),
}

impl Type {
    /// Returns the number of machine words a value of this type occupies.
    #[must_use]
    pub fn word_size(&self) -> i32 {
        match self {
            Self::Void => 0,
            Self::Int | Self::Float | Self::Bool | Self::Str => 1,
            Self::Vector { dim, .. } => *dim,
            Self::Matrix { rows, cols, .. } => rows * cols,
            Self::Record(decl) => decl.word_size(),
        }
    }

    /// Returns the machine-level tag used when reserving stack space for a
    /// value of this type. Vectors and matrices use their element tag;
    /// records carry no single tag.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int => ValueType::Int,
            Self::Float => ValueType::Float,
            Self::Bool => ValueType::Bool,
            Self::Str => ValueType::Str,
            Self::Vector { elem, .. } | Self::Matrix { elem, .. } => elem.value_type(),
            Self::Void | Self::Record(_) => ValueType::Unknown,
        }
    }

    /// Returns `true` for vectors and matrices.
    #[must_use]
    pub const fn is_struct(&self) -> bool {
        matches!(self, Self::Vector { .. } | Self::Matrix { .. })
    }

    /// Returns the element type of a vector or matrix.
    #[must_use]
    pub const fn element_type(&self) -> Option<ScalarType> {
        match self {
            Self::Vector { elem, .. } | Self::Matrix { elem, .. } => Some(*elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Str => write!(f, "string"),
            Self::Vector { elem, dim } => write!(f, "vector<{elem}>[{dim}]"),
            Self::Matrix { elem, rows, cols } => write!(f, "matrix<{elem}>[{rows}][{cols}]"),
            Self::Record(decl) => write!(f, "{}", decl.name),
        }
    }
}
