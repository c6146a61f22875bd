pub mod error;
pub mod graph;
pub mod store;
pub mod types;

pub use error::{GraphError, Result};
pub use graph::VectorKnowledgeGraph;
pub use store::{
    NamedVectors, PayloadFilter, PointPayload, ScoredPoint, SqliteStore, StorePoint, VectorField,
    VectorStore,
};
pub use types::{GoalStatus, GoalType, JournalEntry, Triple, TripleMetadata};
