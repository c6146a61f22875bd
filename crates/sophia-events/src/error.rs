use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Adapter error ({adapter}): {reason}")]
    Adapter { adapter: String, reason: String },

    #[error("Memory error: {0}")]
    Memory(#[from] sophia_memory::MemoryError),
}

pub type Result<T> = std::result::Result<T, EventError>;
