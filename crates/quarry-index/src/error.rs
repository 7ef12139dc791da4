//! Error types for quarry-index.

/// Errors that can occur during indexing and search operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or snapshots.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider error (embedding or summarization).
    #[error("LLM error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    /// JSON serialization/deserialization error (snapshots).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No published index generation exists yet.
    #[error("no index available")]
    Unavailable,

    /// Every leaf embedding failed, leaving nothing to index.
    #[error("index build produced no embeddable chunks")]
    EmptyBuild,

    /// Query embedding dimensionality does not match the index generation.
    #[error("embedding dimension mismatch: index {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Text extraction failed for a document.
    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
