//! Error types for the pulse pipeline.

use thiserror::Error;

/// Result type alias using the pipeline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Intake not found
    #[error("Intake not found: {0}")]
    IntakeNotFound(uuid::Uuid),

    /// Another worker claimed the intake first
    #[error("Claim conflict: intake {0} is no longer ready")]
    ClaimConflict(uuid::Uuid),

    /// Downloaded content does not match the recorded checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Content store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Graph store operation failed
    #[error("Graph error: {0}")]
    Graph(String),

    /// Vector store operation failed
    #[error("Vector store error: {0}")]
    Vector(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Validation, lookup and claim failures are final for the caller;
    /// everything that talks to an external system is considered transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::NotFound(_)
                | Error::IntakeNotFound(_)
                | Error::ClaimConflict(_)
                | Error::InvalidInput(_)
                | Error::Config(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
