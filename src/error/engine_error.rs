//! Engine-level and store error types.

use super::ValidationError;
use thiserror::Error;

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Registration error: {0}")]
    Registration(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No query registered for {product} given params ({params})")]
    NoQuery { product: String, params: String },
    #[error("Config parse error: {0}")]
    ConfigParseError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Digest not found: {0}")]
    NotFound(String),
    #[error("Conflicting entries for path {path}: {existing} vs {incoming}")]
    MergeConflict {
        path: String,
        existing: String,
        incoming: String,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}
