// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `mavl_codegen`: lowering type-annotated MAVL ASTs to TAM images.
//!
//! The crate defines the typed AST surface handed over by the analysis stage
//! ([`ast`], [`types`]), the standard builtin-function environment mapping
//! MAVL-callable names onto the primitive region ([`builtins`]), and the code
//! generator itself ([`codegen`]).
//!
//! The code generator assumes its input is well-typed: every declaration and
//! expression carries a resolved type with a fixed word size, every call names
//! a resolved callee, and no implicit conversions remain. Shapes that cannot
//! occur in a well-typed program are reported as internal errors.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod types;
