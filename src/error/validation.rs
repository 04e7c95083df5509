//! Rule graph validation diagnostics.

use std::fmt;

use thiserror::Error;

use crate::externs::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// No chain of rules produces the product from the available params.
    Unsatisfiable,
    /// More than one equally preferred chain remains after disambiguation.
    Ambiguous,
    /// Every chain re-requests itself through static selectors only.
    Cyclic,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::Unsatisfiable => "unsatisfiable",
            DiagnosticKind::Ambiguous => "ambiguous",
            DiagnosticKind::Cyclic => "cyclic",
        };
        f.write_str(s)
    }
}

/// One failed query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub product: TypeId,
    pub params: Vec<TypeId>,
    pub reason: String,
    /// Nested causes, one line each.
    pub details: Vec<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|t| t.name()).collect();
        write!(
            f,
            "[{}] {} for ({}): {}",
            self.kind,
            self.product,
            params.join(", "),
            self.reason
        )?;
        for detail in &self.details {
            write!(f, "\n    {}", detail)?;
        }
        Ok(())
    }
}

/// Every diagnostic found while building the rule graph.
#[derive(Clone, Debug, Error)]
#[error("Rule graph validation failed with {} error(s):\n{}", .diagnostics.len(), render(.diagnostics))]
pub struct ValidationError {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationError {
    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("  {}", d))
        .collect::<Vec<_>>()
        .join("\n")
}
