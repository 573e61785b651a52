use thiserror::Error;

/// The 8 error kinds the core recognizes, each with its own retry/terminal
/// policy. Mirrors the teacher's `ApiError`, which maps its own error kinds
/// onto HTTP status + log level; here the mapping is onto JobQueue retry
/// policy instead, since this core has no HTTP surface of its own.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("extraction failed for document {document_id}: {message}")]
    ExtractionFailed { document_id: i64, message: String },

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("vector index transient error: {0}")]
    VectorIndexTransient(String),

    /// Never surfaced past the VectorIndex wrapper: callers fall back to
    /// id-based deletion internally when they see this.
    #[error("vector index does not support filter-delete")]
    VectorFilterDeleteUnsupported,

    #[error("llm call failed: {0}")]
    LlmFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A status-guarded update observed a status other than the expected
    /// precondition; treated as "another worker already claimed this",
    /// never retried.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the JobQueue's retry policy should re-attempt the task on
    /// this error. PreconditionFailed and Cancelled are final by
    /// definition; NotFound on the root entity is terminal; everything
    /// touching an external service is retried up to max_retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::ExtractionFailed { .. } => false,
            CoreError::EmbeddingFailed(_) => true,
            CoreError::VectorIndexTransient(_) => true,
            CoreError::VectorFilterDeleteUnsupported => false,
            CoreError::LlmFailed(_) => true,
            CoreError::NotFound(_) => false,
            CoreError::PreconditionFailed(_) => false,
            CoreError::Cancelled => false,
            CoreError::Internal(_) => true,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
