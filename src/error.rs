//! Error types for nl2sql-core.

use thiserror::Error;

/// Result type alias using nl2sql-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a generation workflow.
#[derive(Error, Debug)]
pub enum Error {
    /// Collaborator configuration error, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// LLM transport error surfaced before sentinel degradation
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// No extractable region exists in the model output
    #[error("no extractable content: {0}")]
    NotFound(String),

    /// The candidate region could not be parsed even after relaxed repair
    #[error("JSON repair failed: {0}")]
    RepairFailed(String),

    /// Response key set or enum value does not match the expected schema
    #[error("response schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A stage exhausted its attempts in a way that is fatal to the workflow
    #[error("stage failed: {0}")]
    StageFailed(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint or sink I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch(message.into())
    }
}
