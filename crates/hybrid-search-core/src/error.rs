//! Error types for the `hybrid-search-core` crate.
//!
//! Every fallible core operation returns [`EngineError`]. The variants map
//! one-to-one onto the outcome kinds a transport layer needs to distinguish:
//! caller mistakes ([`Validation`](EngineError::Validation)), degraded
//! collaborators ([`Embedding`](EngineError::Embedding),
//! [`Answer`](EngineError::Answer)), persistence failures
//! ([`Store`](EngineError::Store)) and fatal index inconsistencies
//! ([`SnapshotCorruption`](EngineError::SnapshotCorruption)).

use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller supplied an invalid argument (unknown feedback label,
    /// out-of-range weights, zero `k`, ...). No state was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedding provider failed.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A freshly built snapshot failed its consistency check and was not
    /// published. Indicates a programming or data bug.
    #[error("Snapshot corruption: {0}")]
    SnapshotCorruption(String),

    /// The persistence backend failed.
    #[error("Store error ({backend}): {message}")]
    Store {
        /// The store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The answer generator failed.
    #[error("Answer generator error ({generator}): {message}")]
    Answer {
        /// The generator that produced the error.
        generator: String,
        /// A description of the failure.
        message: String,
    },

    /// Invalid engine parameters.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Short machine-readable kind, used by transports for error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Embedding { .. } => "embedding",
            Self::SnapshotCorruption(_) => "snapshot_corruption",
            Self::Store { .. } => "store",
            Self::Answer { .. } => "answer",
            Self::Config(_) => "config",
        }
    }

    /// Whether the error indicates a bug that must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SnapshotCorruption(_))
    }

    pub fn store(backend: &str, message: impl Into<String>) -> Self {
        Self::Store {
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}

/// A convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
