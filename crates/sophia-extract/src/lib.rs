pub mod extractor;
pub mod procedural;
pub mod prompts;
pub mod types;

pub use extractor::TripleExtractor;
pub use procedural::{abstraction_level_for, is_procedural_predicate, procedural_weight};
pub use types::{ExtractMode, ExtractedTriple, Extraction};
