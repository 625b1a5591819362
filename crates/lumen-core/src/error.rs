use thiserror::Error;

/// Top-level error type for the Lumen system.
///
/// Subsystem crates either return this type directly or wrap it (see
/// `lumen_worker::WorkerError`) so that the `?` operator works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LumenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Blob store error: {0}")]
    BlobStore(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for LumenError {
    fn from(err: toml::de::Error) -> Self {
        LumenError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LumenError {
    fn from(err: toml::ser::Error) -> Self {
        LumenError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        LumenError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Lumen operations.
pub type Result<T> = std::result::Result<T, LumenError>;
