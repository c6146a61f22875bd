//! The Vector Knowledge Graph: triples with five named embeddings each.
//!
//! Graph structure is implicit: a "graph" is whatever set of triples a
//! query assembles. Traversals carry a confidence that decays with distance
//! from the query, and all node references are text keys, so cyclic goal
//! structures cannot produce dangling pointers.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use sophia_llm::Embedder;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{
    NamedVectors, PayloadFilter, PointPayload, StorePoint, VectorField, VectorStore,
};
use crate::types::{GoalStatus, Triple, TripleMetadata};

/// Search breadth used for traversal steps.
const TRAVERSAL_SEARCH_LIMIT: usize = 100;

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

pub struct VectorKnowledgeGraph {
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl VectorKnowledgeGraph {
    pub fn new(store: Box<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn points_count(&self) -> Result<u64> {
        self.store.points_count()
    }

    /// Upsert a batch of triples with their five embeddings and metadata.
    ///
    /// A metadata list whose length does not match the triple list is
    /// replaced with empty metadata for every triple (logged). Individual
    /// malformed entries never abort the batch.
    pub fn add_triples(&self, triples: &[Triple], metadata: Vec<TripleMetadata>) -> Result<()> {
        if triples.is_empty() {
            debug!("add_triples called with no triples");
            return Ok(());
        }

        let metadata = if metadata.is_empty() {
            vec![TripleMetadata::default(); triples.len()]
        } else if metadata.len() != triples.len() {
            warn!(
                triples = triples.len(),
                metadata = metadata.len(),
                "triple/metadata length mismatch, using empty metadata"
            );
            vec![TripleMetadata::default(); triples.len()]
        } else {
            metadata
        };

        let subjects: Vec<String> = triples.iter().map(|t| t.subject.clone()).collect();
        let relationships: Vec<String> = triples.iter().map(|t| t.relationship.clone()).collect();
        let objects: Vec<String> = triples.iter().map(|t| t.object.clone()).collect();
        let contents: Vec<String> = triples.iter().map(triple_content_text).collect();

        let subject_embs = self.embedder.encode(&subjects)?;
        let relationship_embs = self.embedder.encode(&relationships)?;
        let object_embs = self.embedder.encode(&objects)?;
        let content_embs = self.embedder.encode(&contents)?;

        let mut points = Vec::with_capacity(triples.len());
        for (i, (triple, meta)) in triples.iter().zip(metadata).enumerate() {
            let topic_vec = match self.topic_embedding(&meta.topics) {
                Ok(v) => v,
                Err(e) => {
                    debug!(triple = %triple, "topic embedding failed, using zero vector: {e}");
                    vec![0.0; self.embedder.dim()]
                }
            };
            points.push(StorePoint {
                id: triple.point_id(),
                vectors: NamedVectors {
                    subject: subject_embs[i].clone(),
                    relationship: relationship_embs[i].clone(),
                    object: object_embs[i].clone(),
                    topic_vector: topic_vec,
                    triple_content: content_embs[i].clone(),
                },
                payload: PointPayload::new(triple, meta),
            });
        }

        let count = points.len();
        self.store.upsert(points)?;
        info!(count, "upserted triples");
        Ok(())
    }

    /// Zero vector when the topic list is absent or contains only blanks.
    fn topic_embedding(&self, topics: &[String]) -> Result<Vec<f32>> {
        let joined = topics
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.trim().is_empty() {
            return Ok(vec![0.0; self.embedder.dim()]);
        }
        Ok(self.embedder.encode_one(&joined)?)
    }

    /// Semantic search over the whole-triple content embedding. Each hit's
    /// similarity is attached to its metadata as `confidence`.
    pub fn find_triples_by_text_similarity(
        &self,
        query_text: &str,
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        if self.store.points_count()? == 0 {
            return Ok(vec![]);
        }
        let query_emb = self.embedder.encode_one(query_text)?;
        let hits = self.store.search(
            VectorField::TripleContent,
            &query_emb,
            limit,
            Some(similarity_threshold),
        )?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let triple = hit.payload.triple();
                let mut meta = hit.payload.metadata;
                meta.confidence = Some(hit.score);
                (triple, meta)
            })
            .collect())
    }

    /// Search the stored topic vectors with the concatenation of the query
    /// topics. Empty or all-blank topic lists return no results. The
    /// similarity is attached both as `topic_similarity_score` and as the
    /// entry's base `confidence` for downstream channel blending.
    pub fn find_triples_by_vectorized_topics(
        &self,
        query_topics: &[String],
        similarity_threshold: f32,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        let joined = query_topics
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.trim().is_empty() {
            debug!("topic query is empty, returning no results");
            return Ok(vec![]);
        }
        if self.store.points_count()? == 0 {
            return Ok(vec![]);
        }

        let query_emb = self.embedder.encode_one(&joined)?;
        let hits = self.store.search(
            VectorField::TopicVector,
            &query_emb,
            limit,
            Some(similarity_threshold),
        )?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let triple = hit.payload.triple();
                let mut meta = hit.payload.metadata;
                meta.topic_similarity_score = Some(hit.score);
                meta.confidence = Some(hit.score);
                (triple, meta)
            })
            .collect())
    }

    /// Triples matching both a subject and a relationship, by intersecting
    /// two nearest-neighbour searches. Confidence is the subject-match score;
    /// only hits with subject score >= threshold are kept.
    pub fn build_graph_from_subject_relationship(
        &self,
        subject: &str,
        verb: &str,
        similarity_threshold: f32,
        max_results: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        if self.store.points_count()? == 0 {
            return Ok(vec![]);
        }

        let subject_emb = self.embedder.encode_one(subject)?;
        let verb_emb = self.embedder.encode_one(verb)?;

        let subject_hits =
            self.store
                .search(VectorField::Subject, &subject_emb, max_results, None)?;
        let verb_hits =
            self.store
                .search(VectorField::Relationship, &verb_emb, max_results, None)?;

        let verb_ids: HashSet<&str> = verb_hits.iter().map(|h| h.id.as_str()).collect();

        let mut results = Vec::new();
        for hit in subject_hits {
            if !verb_ids.contains(hit.id.as_str()) || hit.score < similarity_threshold {
                continue;
            }
            let triple = hit.payload.triple();
            let mut meta = hit.payload.metadata;
            meta.confidence = Some(hit.score);
            results.push((triple, meta));
        }
        debug!(
            subject,
            verb,
            count = results.len(),
            "subject-relationship intersection"
        );
        Ok(results)
    }

    /// Breadth-first expansion from a noun: search the subject field, record
    /// matches with decayed confidence, then expand each match's object at
    /// the next level. A visited set keyed on node text breaks cycles.
    pub fn build_graph_from_noun(
        &self,
        query: &str,
        similarity_threshold: f32,
        max_depth: u32,
        confidence_decay: f32,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        if self.store.points_count()? == 0 {
            return Ok(vec![]);
        }

        let mut results = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, u32, f32)> =
            VecDeque::from([(query.to_string(), 0, 1.0)]);

        while let Some((node, depth, confidence)) = frontier.pop_front() {
            if depth > max_depth || visited.contains(&node) {
                continue;
            }
            visited.insert(node.clone());

            let node_emb = self.embedder.encode_one(&node)?;
            let hits = self.store.search(
                VectorField::Subject,
                &node_emb,
                TRAVERSAL_SEARCH_LIMIT,
                None,
            )?;

            for hit in hits {
                if hit.score < similarity_threshold {
                    continue;
                }
                let new_confidence = confidence * hit.score;
                let triple = hit.payload.triple();
                let object = triple.object.clone();

                let mut meta = hit.payload.metadata;
                meta.confidence = Some(new_confidence);
                results.push((triple, meta));

                if !visited.contains(&object) {
                    frontier.push_back((object, depth + 1, new_confidence * confidence_decay));
                }
            }
        }

        info!(query, count = results.len(), "noun traversal complete");
        Ok(results)
    }

    pub fn query_by_time_range(
        &self,
        start: f64,
        end: f64,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(&PayloadFilter::TimestampRange { start, end }, limit)
    }

    pub fn query_recent(&self, hours: f64, limit: usize) -> Result<Vec<(Triple, TripleMetadata)>> {
        let end = unix_now();
        self.query_by_time_range(end - hours * 3600.0, end, limit)
    }

    pub fn query_by_episode(
        &self,
        episode_id: &str,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(&PayloadFilter::Episode(episode_id.to_string()), limit)
    }

    // --- goal queries ------------------------------------------------------

    pub fn query_goals_by_status(
        &self,
        status: GoalStatus,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(&PayloadFilter::GoalStatus(status), limit)
    }

    pub fn query_goals_by_priority(
        &self,
        min_priority: u8,
        max_priority: u8,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(
            &PayloadFilter::PriorityRange {
                min: min_priority,
                max: max_priority,
            },
            limit,
        )
    }

    /// Goals in pending or in_progress state.
    pub fn query_active_goals(&self, limit: usize) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(&PayloadFilter::ActiveGoals, limit)
    }

    /// Forever/instrumental goals regardless of status.
    pub fn query_instrumental_goals(&self, limit: usize) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.scroll_pairs(&PayloadFilter::ForeverGoals, limit)
    }

    pub fn query_high_priority_goals(
        &self,
        min_priority: u8,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        self.query_goals_by_priority(min_priority, 5, limit)
    }

    /// Locate a goal by semantic search of its description against the
    /// object vector. Returns the best-scoring `has_goal` triple at or above
    /// the threshold, with the match score attached as `confidence`.
    pub fn query_goal_by_description(
        &self,
        description: &str,
        similarity_threshold: f32,
    ) -> Result<Option<(Triple, TripleMetadata)>> {
        if self.store.points_count()? == 0 {
            return Ok(None);
        }
        let desc_emb = self.embedder.encode_one(description)?;
        let hits = self.store.search(
            VectorField::Object,
            &desc_emb,
            10,
            Some(similarity_threshold),
        )?;

        let mut best: Option<(f32, Triple, TripleMetadata)> = None;
        for hit in hits {
            if hit.payload.relationship != "has_goal" {
                continue;
            }
            if best.as_ref().map(|(s, _, _)| hit.score > *s).unwrap_or(true) {
                let triple = hit.payload.triple();
                let mut meta = hit.payload.metadata;
                meta.confidence = Some(hit.score);
                best = Some((hit.score, triple, meta));
            }
        }

        Ok(best.map(|(_, t, m)| (t, m)))
    }

    /// Mutate a goal's metadata in place and write it back at the same
    /// content-addressed point. `status_updated_timestamp` is always stamped.
    /// Returns false when no matching goal exists.
    pub fn update_goal_metadata<F>(&self, description: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut TripleMetadata),
    {
        let Some((triple, mut meta)) = self.query_goal_by_description(description, 0.5)? else {
            warn!(description, "goal not found for metadata update");
            return Ok(false);
        };

        apply(&mut meta);
        meta.status_updated_timestamp = Some(unix_now());
        // Retrieval-time confidence must not be persisted back.
        meta.confidence = None;

        let payload = PointPayload::new(&triple, meta);
        self.store.set_payload(&triple.point_id(), &payload)?;
        info!(description, "goal metadata updated");
        Ok(true)
    }

    /// Pairwise cosine similarities between entities, upper triangle only,
    /// sorted descending, filtered to `>= threshold`.
    pub fn compute_entity_similarities(
        &self,
        entities: &[String],
        similarity_threshold: f32,
    ) -> Result<Vec<(String, String, f32)>> {
        if entities.len() < 2 {
            debug!("need at least 2 entities to compare");
            return Ok(vec![]);
        }
        let embeddings = self.embedder.encode(entities)?;

        let mut pairs = Vec::new();
        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                let score = sophia_llm::cosine_similarity(&embeddings[i], &embeddings[j]);
                if score >= similarity_threshold {
                    pairs.push((entities[i].clone(), entities[j].clone(), score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));
        Ok(pairs)
    }

    fn scroll_pairs(
        &self,
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        if self.store.points_count()? == 0 {
            return Ok(vec![]);
        }
        let payloads = self.store.scroll(filter, limit)?;
        Ok(payloads
            .into_iter()
            .map(|p| (p.triple(), p.metadata))
            .collect())
    }
}

fn triple_content_text(triple: &Triple) -> String {
    format!(
        "Subject: {}, Relationship: {}, Object: {}",
        triple.subject, triple.relationship, triple.object
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_format() {
        let t = Triple::new("Joey", "likes", "Python");
        assert_eq!(
            triple_content_text(&t),
            "Subject: Joey, Relationship: likes, Object: Python"
        );
    }
}
