pub mod error;
pub mod goals;
pub mod memory;
pub mod procedures;

pub use error::{MemoryError, Result};
pub use goals::{CreateGoalOptions, GoalProgress, GoalQuery, GoalSuggestion, GoalUpdate};
pub use memory::{AssociativeSemanticMemory, Recall, RecallOptions};
pub use procedures::{ProcedureOptions, ProcedureRecall};
