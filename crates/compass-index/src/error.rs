//! Error types for compass-index.

/// Errors raised by the ingestion, build, and retrieval pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Clone or snapshot filesystem failure.
    #[error("ingest failed: {0}")]
    Ingest(String),

    /// Neither a per-user key nor a default key is configured.
    #[error("no API key configured")]
    MissingCredential,

    /// Provider failure while answering a question.
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] compass_llm::LlmError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("project not found")]
    ProjectNotFound,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] compass_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
