//! Associative semantic memory: ingestion and blended retrieval over the
//! vector knowledge graph.
//!
//! Retrieval blends two channels (whole-triple similarity and topic
//! similarity), boosts entries whose predicate appears in the query, expands
//! one hop from high-confidence seeds, and applies an elastic confidence
//! cut-off that guarantees a minimum number of results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sophia_extract::{ExtractMode, ExtractedTriple, TripleExtractor};
use sophia_graph::{Triple, TripleMetadata, VectorKnowledgeGraph};
use sophia_llm::{ChatApi, ChatMessage, ChatRequest};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Channel thresholds and boosts for blended retrieval.
const CHANNEL_THRESHOLD: f32 = 0.3;
const TOPIC_CHANNEL_BOOST: f32 = 1.05;
const PREDICATE_BOOST: f32 = 1.15;
/// Hop expansion: seed selection and decay.
const HOP_SEED_MIN_CONFIDENCE: f32 = 0.65;
const HOP_SEED_COUNT: usize = 3;
const HOP_THRESHOLD: f32 = 0.8;
const HOP_MAX_RESULTS: usize = 10;
const HOP_DECAY: f32 = 0.6;
/// A single subject may contribute at most this many triples to a recall.
const MAX_PER_SUBJECT: usize = 6;

const SUMMARY_ERROR_SENTINEL: &str = "Summary unavailable due to error.";

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub entity_name: Option<String>,
    pub speaker: Option<String>,
    pub limit: usize,
    pub min_confidence: Option<f32>,
    pub include_summary_triples: bool,
    pub hop_depth: u32,
    pub return_summary: bool,
    pub include_triples: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            entity_name: None,
            speaker: None,
            limit: 20,
            min_confidence: Some(0.5),
            include_summary_triples: true,
            hop_depth: 1,
            return_summary: true,
            include_triples: true,
        }
    }
}

/// Result of a blended recall.
#[derive(Debug, Clone)]
pub struct Recall {
    pub summary: Option<String>,
    pub triple_count: usize,
    pub triples: Vec<(Triple, TripleMetadata)>,
}

pub struct AssociativeSemanticMemory {
    kgraph: Arc<VectorKnowledgeGraph>,
    extractor: TripleExtractor,
    chat: Arc<dyn ChatApi>,
    summarization_model: String,
    summary_max_tokens: u32,
}

impl AssociativeSemanticMemory {
    pub fn new(
        kgraph: Arc<VectorKnowledgeGraph>,
        extractor: TripleExtractor,
        chat: Arc<dyn ChatApi>,
        summarization_model: impl Into<String>,
        summary_max_tokens: u32,
    ) -> Self {
        Self {
            kgraph,
            extractor,
            chat,
            summarization_model: summarization_model.into(),
            summary_max_tokens,
        }
    }

    pub fn kgraph(&self) -> &VectorKnowledgeGraph {
        &self.kgraph
    }

    /// Extract triples from `text` and store them with full metadata.
    ///
    /// Triples are extracted from the original text with no intermediate
    /// summarization step, so every stored fact stays grounded in a
    /// verbatim `source_text` span. Extraction failure yields zero triples
    /// but is not an error.
    pub fn ingest_text(
        &self,
        text: &str,
        source: &str,
        timestamp: Option<f64>,
        speaker: Option<&str>,
        episode_id: Option<&str>,
    ) -> Result<Vec<ExtractedTriple>> {
        info!(source, "ingesting text ({} chars)", text.len());

        let mode = if source.to_lowercase().contains("conversation") {
            ExtractMode::Conversation
        } else {
            ExtractMode::Document
        };

        let extraction = self
            .extractor
            .extract(text, mode, Some(source), timestamp, speaker);
        if let Some(err) = &extraction.error {
            warn!(source, "extraction failed: {err}");
        }

        let mut triples = Vec::with_capacity(extraction.triples.len());
        let mut metadata = Vec::with_capacity(extraction.triples.len());
        for t in &extraction.triples {
            triples.push(Triple::new(&t.subject, &t.verb, &t.object));
            metadata.push(TripleMetadata {
                source: Some(source.to_string()),
                timestamp: Some(extraction.timestamp),
                is_from_summary: Some(false),
                source_text: Some(t.source_text.clone()),
                speaker: t.speaker.clone().or_else(|| extraction.speaker.clone()),
                topics: t.topics.clone(),
                episode_id: episode_id.map(String::from),
                abstraction_level: t.abstraction_level,
                ..Default::default()
            });
        }

        if !triples.is_empty() {
            self.kgraph.add_triples(&triples, metadata)?;
            info!(count = triples.len(), "stored extracted triples");
        }

        Ok(extraction.triples)
    }

    /// Lightweight topic extraction: meaningful non-stopword tokens longer
    /// than 3 chars, order-preserving deduplicated.
    pub fn candidate_topics(&self, text: &str, max_topics: usize) -> Vec<String> {
        const STOPWORDS: &[&str] = &[
            "the", "and", "for", "with", "that", "this", "about", "what", "where", "when", "how",
            "why", "who", "are", "is", "was", "were", "does", "did", "do",
        ];
        let mut seen = HashSet::new();
        let mut topics = Vec::new();
        for raw in text.split_whitespace() {
            let token = raw
                .trim_matches(|c: char| ".,!?()'\" ".contains(c))
                .to_lowercase();
            if token.len() > 3 && !STOPWORDS.contains(&token.as_str()) && seen.insert(token.clone())
            {
                topics.push(token);
                if topics.len() >= max_topics {
                    break;
                }
            }
        }
        topics
    }

    /// Blended retrieval over both channels with hop expansion and the
    /// elastic confidence cut-off.
    pub fn query_related_information(&self, text: &str, opts: &RecallOptions) -> Result<Recall> {
        info!(query = text, "querying related information");

        let mut combiner = Combiner::new(MAX_PER_SUBJECT);
        let channel_limit = std::cmp::max(50, opts.limit * 5);

        // Channel 1: full-text similarity over triple content.
        match self
            .kgraph
            .find_triples_by_text_similarity(text, CHANNEL_THRESHOLD, channel_limit)
        {
            Ok(results) => combiner.add(results),
            Err(e) => error!("text similarity channel failed: {e}"),
        }

        // Channel 2: topic similarity, boosted to mark channel origin.
        let topics = self.candidate_topics(text, 5);
        if !topics.is_empty() {
            match self
                .kgraph
                .find_triples_by_vectorized_topics(&topics, CHANNEL_THRESHOLD, channel_limit)
            {
                Ok(mut results) => {
                    for (_, meta) in results.iter_mut() {
                        meta.confidence = Some(meta.confidence() * TOPIC_CHANNEL_BOOST);
                    }
                    combiner.add(results);
                }
                Err(e) => error!("topic similarity channel failed: {e}"),
            }
        }

        // Predicate boost: the query literally mentions the relationship.
        let query_lc = text.to_lowercase();
        for (triple, meta) in combiner.combined.iter_mut() {
            let rel = triple.relationship.to_lowercase();
            if !rel.is_empty() && query_lc.contains(&rel) {
                meta.confidence = Some(meta.confidence() * PREDICATE_BOOST);
            }
        }

        // Hop expansion from high-confidence seeds.
        if opts.hop_depth >= 1 {
            let mut seeds: Vec<(Triple, f32)> = combiner
                .combined
                .iter()
                .map(|(t, m)| (t.clone(), m.confidence()))
                .collect();
            seeds.sort_by(|a, b| b.1.total_cmp(&a.1));
            seeds.truncate(HOP_SEED_COUNT);

            for (seed, seed_confidence) in seeds {
                if seed_confidence < HOP_SEED_MIN_CONFIDENCE {
                    continue;
                }
                match self.kgraph.build_graph_from_subject_relationship(
                    &seed.object,
                    &seed.relationship,
                    HOP_THRESHOLD,
                    HOP_MAX_RESULTS,
                ) {
                    Ok(hops) => {
                        for (hop_triple, mut hop_meta) in hops {
                            hop_meta.confidence = Some(seed_confidence * HOP_DECAY);
                            hop_meta.is_hop = Some(true);
                            combiner.add(vec![(hop_triple, hop_meta)]);
                        }
                    }
                    Err(e) => {
                        debug!(object = %seed.object, "hop expansion failed: {e}");
                    }
                }
            }
        }

        // Filters.
        let mut filtered: Vec<(Triple, TripleMetadata)> = combiner
            .combined
            .into_iter()
            .filter(|(_, meta)| opts.include_summary_triples || !meta.is_from_summary())
            .filter(|(_, meta)| {
                // Entries with the field missing are kept.
                if let Some(entity) = &opts.entity_name {
                    if meta.entity.as_deref().is_some_and(|e| e != entity) {
                        return false;
                    }
                }
                if let Some(speaker) = &opts.speaker {
                    if meta.speaker.as_deref().is_some_and(|s| s != speaker) {
                        return false;
                    }
                }
                true
            })
            .collect();

        filtered.sort_by(|a, b| b.1.confidence().total_cmp(&a.1.confidence()));

        // Elastic cut-off: prefer entries above the confidence floor but
        // guarantee a minimum number of results.
        let guarantee_k = std::cmp::max(3, std::cmp::min(opts.limit / 2, 10));
        if let Some(min_confidence) = opts.min_confidence {
            let above_count = filtered
                .iter()
                .take_while(|(_, m)| m.confidence() >= min_confidence)
                .count();
            if above_count >= guarantee_k {
                filtered.truncate(above_count);
            } else {
                filtered.truncate(guarantee_k);
            }
        }
        filtered.truncate(opts.limit);

        info!(count = filtered.len(), limit = opts.limit, "recall complete");

        let summary = if opts.return_summary {
            Some(self.summarize_results(text, &filtered))
        } else {
            None
        };

        Ok(Recall {
            summary,
            triple_count: filtered.len(),
            triples: if opts.include_triples { filtered } else { vec![] },
        })
    }

    /// Summarize recalled facts into a paragraph with the LLM. Never fails:
    /// any error yields a sentinel string instead.
    pub fn summarize_results(
        &self,
        input_text: &str,
        results: &[(Triple, TripleMetadata)],
    ) -> String {
        if results.is_empty() {
            return "No relevant information found.".to_string();
        }

        let mut seen = HashSet::new();
        let mut facts = Vec::new();
        for (triple, meta) in results {
            let line = format!("Fact: {} (Confidence: {:.2})", triple, meta.confidence());
            if seen.insert(line.clone()) {
                facts.push(line);
            }
        }

        let prompt = format!(
            "Synthesize a concise, relevant paragraph in response to the following input text, using only the provided facts.\n\
             The facts are sorted by relevance. Prioritize the most relevant ones to form a coherent response that directly addresses the input text.\n\
             If one fact clearly and directly answers the input text, include that fact verbatim in the response before adding any supporting context.\n\n\
             Input Text:\n{}\n\nFacts:\n{}\n\nResponse:",
            input_text,
            facts.join("\n")
        );

        let req = ChatRequest {
            model: self.summarization_model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.7,
            max_tokens: self.summary_max_tokens,
        };

        match self.chat.chat(&req) {
            Ok(summary) if !summary.is_empty() => summary,
            Ok(_) => SUMMARY_ERROR_SENTINEL.to_string(),
            Err(e) => {
                error!("summary generation failed: {e}");
                SUMMARY_ERROR_SENTINEL.to_string()
            }
        }
    }

    /// Memories from the last N hours with full metadata.
    pub fn query_recent_memories(
        &self,
        hours: f64,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        Ok(self.kgraph.query_recent(hours, limit)?)
    }

    pub fn query_memories_by_time_range(
        &self,
        start: f64,
        end: f64,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        Ok(self.kgraph.query_by_time_range(start, end, limit)?)
    }

    /// All semantic triples linked to one conversation episode.
    pub fn query_episodic_context(
        &self,
        episode_id: &str,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        Ok(self.kgraph.query_by_episode(episode_id, limit)?)
    }

    pub(crate) fn now(&self) -> f64 {
        unix_now()
    }
}

/// Merges channel results by triple identity, keeping the best confidence
/// per triple and capping how many triples a single subject contributes.
pub(crate) struct Combiner {
    pub combined: HashMap<Triple, TripleMetadata>,
    subject_counts: HashMap<String, usize>,
    max_per_subject: usize,
}

impl Combiner {
    pub fn new(max_per_subject: usize) -> Self {
        Self {
            combined: HashMap::new(),
            subject_counts: HashMap::new(),
            max_per_subject,
        }
    }

    pub fn add(&mut self, results: Vec<(Triple, TripleMetadata)>) {
        for (triple, meta) in results {
            let count = self
                .subject_counts
                .get(triple.subject.as_str())
                .copied()
                .unwrap_or(0);
            if !self.combined.contains_key(&triple) && count >= self.max_per_subject {
                continue;
            }
            match self.combined.get(&triple) {
                Some(existing) if existing.confidence() >= meta.confidence() => {}
                Some(_) => {
                    self.combined.insert(triple, meta);
                }
                None => {
                    self.subject_counts
                        .insert(triple.subject.clone(), count + 1);
                    self.combined.insert(triple, meta);
                }
            }
        }
    }
}
