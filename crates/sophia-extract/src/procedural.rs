//! Procedural predicate recognition.
//!
//! Triples whose predicate names a method, dependency, step or example are
//! tagged "procedure" at extraction time so the procedural retrieval path
//! can find them; the same table supplies the retrieval-time score weights.

/// Procedural predicates with their retrieval score weights.
pub const PROCEDURAL_PREDICATES: &[(&str, f32)] = &[
    ("accomplished_by", 2.0),
    ("is_method_for", 1.8),
    ("alternatively_by", 1.5),
    ("requires", 1.3),
    ("requires_prior", 1.3),
    ("enables", 1.2),
    ("example_usage", 1.5),
    ("has_step", 1.4),
    ("followed_by", 1.2),
];

pub fn is_procedural_predicate(predicate: &str) -> bool {
    procedural_weight(predicate).is_some()
}

/// Score weight for a procedural predicate; `None` for everything else.
pub fn procedural_weight(predicate: &str) -> Option<f32> {
    let p = predicate.to_lowercase();
    PROCEDURAL_PREDICATES
        .iter()
        .find(|(name, _)| *name == p)
        .map(|(_, w)| *w)
}

/// Heuristic abstraction level for a procedural predicate:
/// 1 = atomic step/example, 2 = basic procedure, 3 = high-level orchestration.
pub fn abstraction_level_for(predicate: &str) -> u8 {
    match predicate.to_lowercase().as_str() {
        "has_step" | "followed_by" | "example_usage" => 1,
        "enables" => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_match_table() {
        assert_eq!(procedural_weight("accomplished_by"), Some(2.0));
        assert_eq!(procedural_weight("is_method_for"), Some(1.8));
        assert_eq!(procedural_weight("followed_by"), Some(1.2));
        assert_eq!(procedural_weight("likes"), None);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(is_procedural_predicate("Accomplished_By"));
    }

    #[test]
    fn abstraction_levels() {
        assert_eq!(abstraction_level_for("has_step"), 1);
        assert_eq!(abstraction_level_for("example_usage"), 1);
        assert_eq!(abstraction_level_for("accomplished_by"), 2);
        assert_eq!(abstraction_level_for("requires"), 2);
        assert_eq!(abstraction_level_for("enables"), 3);
    }
}
