//! Error types for the rule engine.
//!
//! - [`Failure`]: the terminal failure of a single node, delivered to whoever awaits it.
//! - [`ValidationError`]: static rule graph problems found at startup.
//! - [`EngineError`]: top-level errors for registration, configuration and execution requests.
//! - [`StoreError`]: errors raised by a content store.

pub mod engine_error;
pub mod failure;
pub mod validation;

pub use engine_error::{EngineError, StoreError};
pub use failure::Failure;
pub use validation::{Diagnostic, DiagnosticKind, ValidationError};

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, Failure>;
/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
