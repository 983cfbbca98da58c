//! Error types for the retrieval pipeline.
//!
//! Every fallible operation below the CLI returns [`Result`], so a failure carries a tag
//! the orchestrator can turn into an error envelope instead of unwinding.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while loading, indexing, retrieving or answering.
#[derive(Debug, Error)]
pub enum RagError {
    /// Filesystem failure that the caller chose not to swallow.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The embedding model failed to load or run.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The generation model failed to load or run.
    #[error("generation error ({model}): {message}")]
    Generation {
        /// Model or backend that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// The nearest-neighbor index rejected an operation.
    #[error("index error: {0}")]
    Index(String),

    /// `search` was called before `build`.
    #[error("index not built, call build() first")]
    IndexNotBuilt,

    /// A vector did not have the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding cache could not be encoded or decoded.
    #[error("cache error: {0}")]
    Cache(String),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Shorthand for a [`RagError::Generation`] tagged with a model name.
    pub fn generation(model: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RagError::Generation {
            model: model.into(),
            message: message.to_string(),
        }
    }
}
