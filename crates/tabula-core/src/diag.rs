//! Definition-time diagnostics
//!
//! Schema and rule authoring mistakes are not exceptions: every `check_*`
//! method returns a boolean and appends human-readable diagnostics to a
//! [`DiagnosticSink`], naming the offending entity. Callers inspect the
//! boolean, show the diagnostics, and may fix and re-check.
//!
//! Contract violations (misusing a compiled artifact) are panics, not
//! diagnostics; runtime missing data is a sentinel value, not a diagnostic.

use serde::Serialize;
use std::fmt;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Suspicious but compilable
    Warning,
    /// Blocks compilation
    Error,
}

/// One diagnostic against a named entity.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Human-readable path of the offending object
    /// (`class Person`, `rule TableSum operand 2`)
    pub entity: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", tag, self.entity, self.message)
    }
}

/// Accumulating list of diagnostics for one check or compile run.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error diagnostic.
    pub fn error(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            entity: entity.into(),
            message: message.into(),
        });
    }

    /// Append a warning diagnostic.
    pub fn warning(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            entity: entity.into(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drain all accumulated diagnostics.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

impl fmt::Display for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diag in &self.diagnostics {
            writeln!(f, "{diag}")?;
        }
        Ok(())
    }
}
