use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Graph error: {0}")]
    Graph(#[from] sophia_graph::GraphError),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
