//! Procedural knowledge retrieval: "how do I accomplish X" queries.
//!
//! Procedural triples use a fixed predicate vocabulary (accomplished_by,
//! requires, has_step, …) weighted by how directly they answer a how-to
//! question. Results are bucketed by predicate role.

use sophia_extract::{is_procedural_predicate, procedural_weight};
use sophia_graph::{Triple, TripleMetadata};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::memory::{AssociativeSemanticMemory, Combiner};

const CHANNEL_THRESHOLD: f32 = 0.3;
const TOPIC_CHANNEL_BOOST: f32 = 1.05;
const DEPENDENCY_THRESHOLD: f32 = 0.7;
const DEPENDENCY_DECAY: f32 = 0.8;
/// How many top methods have their `requires` chains followed.
const DEPENDENCY_FOLLOW_METHODS: usize = 3;

/// Baseline procedural topic labels searched alongside the goal's own topics.
const PROCEDURAL_TOPICS: &[&str] = &["procedure", "method", "how-to", "usage", "implementation"];

#[derive(Debug, Clone)]
pub struct ProcedureOptions {
    pub include_alternatives: bool,
    pub include_examples: bool,
    pub include_dependencies: bool,
    pub limit: usize,
}

impl Default for ProcedureOptions {
    fn default() -> Self {
        Self {
            include_alternatives: true,
            include_examples: true,
            include_dependencies: true,
            limit: 20,
        }
    }
}

/// Procedural recall bucketed by predicate role.
#[derive(Debug, Clone, Default)]
pub struct ProcedureRecall {
    pub goal: String,
    pub methods: Vec<(Triple, TripleMetadata)>,
    pub alternatives: Vec<(Triple, TripleMetadata)>,
    pub dependencies: Vec<(Triple, TripleMetadata)>,
    pub examples: Vec<(Triple, TripleMetadata)>,
    pub steps: Vec<(Triple, TripleMetadata)>,
    pub total_found: usize,
}

impl AssociativeSemanticMemory {
    /// Query for procedural knowledge to accomplish `goal`.
    pub fn query_procedure(&self, goal: &str, opts: &ProcedureOptions) -> Result<ProcedureRecall> {
        info!(goal, "querying procedures");

        let mut combiner = Combiner::new(usize::MAX);
        let channel_limit = std::cmp::max(50, opts.limit * 3);

        // Channel 1: full-text similarity, filtered to procedural triples.
        match self
            .kgraph()
            .find_triples_by_text_similarity(goal, CHANNEL_THRESHOLD, channel_limit)
        {
            Ok(results) => {
                for (triple, mut meta) in results {
                    if let Some(weight) = procedural_entry_weight(&triple, &meta) {
                        meta.confidence = Some(meta.confidence() * weight);
                        meta.is_procedural = Some(true);
                        combiner.add(vec![(triple, meta)]);
                    }
                }
            }
            Err(e) => error!("procedural text search failed: {e}"),
        }

        // Channel 2: topic search over procedural labels plus goal topics.
        let mut topics: Vec<String> = PROCEDURAL_TOPICS.iter().map(|t| t.to_string()).collect();
        topics.extend(self.candidate_topics(goal, 3));
        match self
            .kgraph()
            .find_triples_by_vectorized_topics(&topics, CHANNEL_THRESHOLD, channel_limit)
        {
            Ok(results) => {
                for (triple, mut meta) in results {
                    if let Some(weight) = procedural_entry_weight(&triple, &meta) {
                        meta.confidence =
                            Some(meta.confidence() * weight * TOPIC_CHANNEL_BOOST);
                        meta.is_procedural = Some(true);
                        combiner.add(vec![(triple, meta)]);
                    }
                }
            }
            Err(e) => error!("procedural topic search failed: {e}"),
        }

        // Bucket by predicate role.
        let mut recall = ProcedureRecall {
            goal: goal.to_string(),
            ..Default::default()
        };
        for (triple, meta) in combiner.combined.clone() {
            let verb = triple.relationship.to_lowercase();
            let entry = (triple, meta);
            match verb.as_str() {
                "accomplished_by" | "is_method_for" => recall.methods.push(entry),
                "alternatively_by" => recall.alternatives.push(entry),
                "requires" | "requires_prior" => recall.dependencies.push(entry),
                "example_usage" => recall.examples.push(entry),
                "has_step" | "followed_by" => recall.steps.push(entry),
                _ => recall.methods.push(entry),
            }
        }

        for bucket in [
            &mut recall.methods,
            &mut recall.alternatives,
            &mut recall.dependencies,
            &mut recall.examples,
            &mut recall.steps,
        ] {
            bucket.sort_by(|a, b| b.1.confidence().total_cmp(&a.1.confidence()));
        }

        // Follow `requires` chains for the best methods.
        if opts.include_dependencies && !recall.methods.is_empty() {
            let method_objects: Vec<String> = recall
                .methods
                .iter()
                .take(DEPENDENCY_FOLLOW_METHODS)
                .map(|(t, _)| t.object.clone())
                .collect();
            for method_object in method_objects {
                match self.kgraph().build_graph_from_subject_relationship(
                    &method_object,
                    "requires",
                    DEPENDENCY_THRESHOLD,
                    10,
                ) {
                    Ok(deps) => {
                        for (dep_triple, mut dep_meta) in deps {
                            if combiner.combined.contains_key(&dep_triple) {
                                continue;
                            }
                            dep_meta.confidence =
                                Some(dep_meta.confidence() * DEPENDENCY_DECAY);
                            recall.dependencies.push((dep_triple, dep_meta));
                        }
                    }
                    Err(e) => {
                        debug!(method = %method_object, "dependency search failed: {e}");
                    }
                }
            }
        }

        recall.total_found = recall.methods.len()
            + recall.alternatives.len()
            + recall.dependencies.len()
            + recall.examples.len()
            + recall.steps.len();

        recall.methods.truncate(opts.limit);
        recall.steps.truncate(opts.limit);
        if opts.include_alternatives {
            recall.alternatives.truncate(opts.limit);
        } else {
            recall.alternatives.clear();
        }
        if opts.include_dependencies {
            recall.dependencies.truncate(opts.limit);
        } else {
            recall.dependencies.clear();
        }
        if opts.include_examples {
            recall.examples.truncate(opts.limit);
        } else {
            recall.examples.clear();
        }

        info!(
            methods = recall.methods.len(),
            alternatives = recall.alternatives.len(),
            dependencies = recall.dependencies.len(),
            examples = recall.examples.len(),
            steps = recall.steps.len(),
            "procedure query complete"
        );
        Ok(recall)
    }
}

/// A triple qualifies as procedural when tagged with the "procedure" topic
/// or when its predicate is in the procedural vocabulary. Returns the score
/// weight to apply, or None for non-procedural triples.
fn procedural_entry_weight(triple: &Triple, meta: &TripleMetadata) -> Option<f32> {
    let tagged = meta.topics.iter().any(|t| t == "procedure");
    let by_predicate = is_procedural_predicate(&triple.relationship);
    if !tagged && !by_predicate {
        return None;
    }
    Some(procedural_weight(&triple.relationship).unwrap_or(1.0))
}
