//! Node-level failures.

use thiserror::Error;

use crate::externs::{Externs, Value};

/// The terminal failure of a node.
///
/// `Throw` and `Cycle` are memoized like successful values. `Timeout`,
/// `Cancelled` and `Invalidated` describe the run rather than the inputs, so a
/// later request runs the node again.
#[derive(Clone, Debug, Error)]
pub enum Failure {
    #[error("{message}")]
    Throw {
        value: Value,
        message: String,
        traceback: Vec<String>,
    },
    #[error("Dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("Cancelled")]
    Cancelled,
    #[error("Timeout: {description}")]
    Timeout { description: String },
    #[error("Invalidated while running")]
    Invalidated,
}

impl Failure {
    /// Raise a new exception created in the host.
    pub fn throw(externs: &Externs, message: impl Into<String>) -> Self {
        let message = message.into();
        Failure::Throw {
            value: externs.create_exception(&message),
            message,
            traceback: Vec::new(),
        }
    }

    /// Wrap an exception raised by a rule body.
    pub fn from_exception(value: Value) -> Self {
        Failure::Throw {
            message: value.to_string(),
            value,
            traceback: Vec::new(),
        }
    }

    /// Whether a rule body may observe and handle this failure.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            Failure::Throw { .. } | Failure::Cycle { .. } | Failure::Timeout { .. }
        )
    }

    pub fn is_memoizable(&self) -> bool {
        matches!(self, Failure::Throw { .. } | Failure::Cycle { .. })
    }

    /// Record that the failure propagated through `rule`.
    pub fn with_frame(self, rule: &str) -> Self {
        match self {
            Failure::Throw {
                value,
                message,
                mut traceback,
            } => {
                traceback.push(rule.to_string());
                Failure::Throw {
                    value,
                    message,
                    traceback,
                }
            }
            other => other,
        }
    }

    /// The failure as an exception value that can be raised inside a rule body.
    pub fn to_exception(&self, externs: &Externs) -> Value {
        match self {
            Failure::Throw { value, .. } => value.clone(),
            other => externs.create_exception(&other.to_string()),
        }
    }

    /// Multi-line rendering with the engine traceback, outermost rule first.
    pub fn render(&self) -> String {
        match self {
            Failure::Throw {
                message, traceback, ..
            } if !traceback.is_empty() => {
                let mut out = String::from("Engine traceback:\n");
                for rule in traceback.iter().rev() {
                    out.push_str("  in ");
                    out.push_str(rule);
                    out.push('\n');
                }
                out.push_str(message);
                out
            }
            other => other.to_string(),
        }
    }
}
