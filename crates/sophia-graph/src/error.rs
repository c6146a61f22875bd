use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] sophia_llm::LlmError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;
