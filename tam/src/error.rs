// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The runtime error taxonomy shared by the interpreter and the machine state.
//!
//! Errors are never recovered inside the VM: the first failure is latched into
//! the [`crate::machine::MachineState`] and execution stops.

use std::fmt;

/// The kind of a runtime failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A memory or code address was out of range.
    InvalidAddress,
    /// An instruction could not be decoded (bad opcode or register id).
    MalformedInstruction,
    /// The stack grew past the end of memory.
    StackOverflow,
    /// The stack shrank below the stack base.
    StackUnderflow,
    /// Integer or float division (or modulo) by zero.
    ZeroDivision,
    /// A value was read with an incompatible type tag.
    TypeMismatch,
    /// A user program raised an error via the `err` primitive.
    RuntimeError,
    /// Console or file I/O failed.
    IoError,
    /// An internal invariant was violated; indicates a compiler or VM bug.
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::MalformedInstruction => write!(f, "malformed instruction"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::ZeroDivision => write!(f, "zero division"),
            Self::TypeMismatch => write!(f, "type mismatch"),
            Self::RuntimeError => write!(f, "runtime error"),
            Self::IoError => write!(f, "io error"),
            Self::InternalError => write!(f, "internal error"),
        }
    }
}

/// A runtime failure with its message and, once known, the faulting code address.
///
/// The location is filled in by the dispatcher if the failing operation did not
/// provide one itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Faulting code address, if known.
    pub location: Option<i32>,
}

impl ExecError {
    /// Creates an error without location information.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Creates an error at a known code address.
    pub fn at(kind: ErrorKind, message: impl Into<String>, location: i32) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Some(location),
        }
    }

    /// Sets the location unless one is already present.
    pub fn fill_location(&mut self, location: i32) {
        if self.location.is_none() {
            self.location = Some(location);
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} at {:04x}: {}", self.kind, loc, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ExecError {}
