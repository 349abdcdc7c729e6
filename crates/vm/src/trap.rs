//! Trap classification and reporting
//!
//! A trap is a precise runtime fault: the reported instruction is the
//! one that faulted. `VmError` carries the classification, the faulting
//! opcode, and the source location when the module recorded one; it
//! converts into the shared `Diagnostic` type for the driver to print.

use std::fmt;

use viper_il::diag::{Diagnostic, SourceLoc};
use viper_il::opcode::Opcode;

/// Classification of a runtime fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    DivideByZero,
    SignedOverflow,
    InvalidCast,
    NullPointer,
    OutOfBounds,
    UseAfterRelease,
    DoubleRelease,
    StepLimit,
    UnknownCallee,
    Explicit,
    InvalidModule,
}

impl TrapKind {
    pub fn message(&self) -> &'static str {
        match self {
            TrapKind::DivideByZero => "division by zero",
            TrapKind::SignedOverflow => "signed overflow",
            TrapKind::InvalidCast => "invalid cast",
            TrapKind::NullPointer => "null pointer",
            TrapKind::OutOfBounds => "out of bounds",
            TrapKind::UseAfterRelease => "use after release",
            TrapKind::DoubleRelease => "double release",
            TrapKind::StepLimit => "step limit exceeded",
            TrapKind::UnknownCallee => "unknown callee",
            TrapKind::Explicit => "trap executed",
            TrapKind::InvalidModule => "invalid module",
        }
    }
}

/// A runtime fault with the faulting instruction's context.
#[derive(Debug, Clone)]
pub struct VmError {
    pub kind: TrapKind,
    /// Extra runtime-provided detail appended to the classification.
    pub detail: Option<String>,
    pub opcode: Option<Opcode>,
    pub loc: Option<SourceLoc>,
}

impl VmError {
    pub fn new(kind: TrapKind) -> VmError {
        VmError {
            kind,
            detail: None,
            opcode: None,
            loc: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> VmError {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, opcode: Opcode, loc: Option<SourceLoc>) -> VmError {
        self.opcode = Some(opcode);
        self.loc = loc;
        self
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap: {}", self.kind.message())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(opcode) = self.opcode {
            write!(f, " (in '{}')", opcode)?;
        }
        Ok(())
    }
}

impl std::error::Error for VmError {}

impl From<VmError> for Diagnostic {
    fn from(error: VmError) -> Diagnostic {
        let mut diag = Diagnostic::error(error.to_string());
        if let Some(loc) = error.loc {
            diag = diag.at(loc);
        }
        diag
    }
}
