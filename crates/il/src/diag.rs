//! Diagnostics shared by the parser, verifier, and VM
//!
//! A single `Diagnostic` type flows through every layer: the parser and
//! verifier return `Result<_, Diagnostic>` and stop at the first fatal
//! error, while VM traps are diagnostics augmented with the faulting
//! opcode. Library code never prints or exits; rendering and exit codes
//! belong to the CLI driver.

use std::fmt;

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Position in a source text, 1-indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLoc { line, column }
    }
}

/// A single diagnostic with optional location and attached notes
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub loc: Option<SourceLoc>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            loc: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            loc: None,
            notes: Vec::new(),
        }
    }

    /// Attach a source location (builder pattern)
    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    /// Attach a location given only a line number
    pub fn at_line(self, line: u32) -> Self {
        self.at(SourceLoc::new(line, 1))
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "line {}: {}: {}", loc.line, self.severity, self.message)?,
            None => write!(f, "{}: {}", self.severity, self.message)?,
        }
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Policy controlling which warnings are surfaced and whether they
/// escalate to errors.
#[derive(Debug, Clone, Default)]
pub struct WarningPolicy {
    /// Enable every warning (corresponds to `-Wall`)
    pub enable_all: bool,
    /// Warning names suppressed via `-Wno-XXX`
    pub disabled: Vec<String>,
    /// Treat surfaced warnings as errors (corresponds to `-Werror`)
    pub as_errors: bool,
}

impl WarningPolicy {
    /// Apply the policy to a warning, returning the diagnostic to emit
    /// (possibly escalated) or `None` when suppressed.
    pub fn filter(&self, name: &str, diag: Diagnostic) -> Option<Diagnostic> {
        if self.disabled.iter().any(|d| d == name) {
            return None;
        }
        if diag.severity == Severity::Warning && self.as_errors {
            let mut escalated = diag;
            escalated.severity = Severity::Error;
            return Some(escalated);
        }
        Some(diag)
    }
}
