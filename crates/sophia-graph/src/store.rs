//! Vector store abstraction and the embedded SQLite implementation.
//!
//! The store holds points keyed by the triple's content-addressed id, each
//! carrying five independently searchable named vectors plus a JSON payload.
//! Search is an exhaustive cosine scan; the store is single-process and local,
//! sized for one agent's memory, not a shared index cluster.

use std::sync::Mutex;

use rusqlite::Connection;
use sophia_llm::cosine_similarity;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::types::{GoalStatus, Triple, TripleMetadata};

/// The five named vector fields attached to every point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorField {
    Subject,
    Relationship,
    Object,
    TopicVector,
    TripleContent,
}

impl VectorField {
    fn column(&self) -> &'static str {
        match self {
            Self::Subject => "subject_vec",
            Self::Relationship => "relationship_vec",
            Self::Object => "object_vec",
            Self::TopicVector => "topic_vec",
            Self::TripleContent => "content_vec",
        }
    }
}

/// One embedding per named field.
#[derive(Debug, Clone)]
pub struct NamedVectors {
    pub subject: Vec<f32>,
    pub relationship: Vec<f32>,
    pub object: Vec<f32>,
    pub topic_vector: Vec<f32>,
    pub triple_content: Vec<f32>,
}

/// The stored payload: the triple's text form plus its metadata.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PointPayload {
    pub subject: String,
    pub relationship: String,
    pub object: String,
    pub metadata: TripleMetadata,
}

impl PointPayload {
    pub fn new(triple: &Triple, metadata: TripleMetadata) -> Self {
        Self {
            subject: triple.subject.clone(),
            relationship: triple.relationship.clone(),
            object: triple.object.clone(),
            metadata,
        }
    }

    pub fn triple(&self) -> Triple {
        Triple::new(&self.subject, &self.relationship, &self.object)
    }
}

/// A point ready for upsert.
#[derive(Debug, Clone)]
pub struct StorePoint {
    pub id: String,
    pub vectors: NamedVectors,
    pub payload: PointPayload,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Payload-level filters for scroll queries.
#[derive(Debug, Clone)]
pub enum PayloadFilter {
    /// `metadata.timestamp` within `[start, end]` (unix seconds, inclusive).
    TimestampRange { start: f64, end: f64 },
    /// `metadata.episode_id` equals the given id.
    Episode(String),
    /// `metadata.goal_status` equals the given status.
    GoalStatus(GoalStatus),
    /// `metadata.goal_status` is pending or in_progress.
    ActiveGoals,
    /// `metadata.priority` within `[min, max]` (inclusive).
    PriorityRange { min: u8, max: u8 },
    /// `metadata.is_forever_goal` is true.
    ForeverGoals,
}

impl PayloadFilter {
    pub fn matches(&self, payload: &PointPayload) -> bool {
        let meta = &payload.metadata;
        match self {
            Self::TimestampRange { start, end } => meta
                .timestamp
                .map(|ts| ts >= *start && ts <= *end)
                .unwrap_or(false),
            Self::Episode(id) => meta.episode_id.as_deref() == Some(id.as_str()),
            Self::GoalStatus(status) => meta.goal_status == Some(*status),
            Self::ActiveGoals => meta.goal_status.map(|s| s.is_active()).unwrap_or(false),
            Self::PriorityRange { min, max } => meta
                .priority
                .map(|p| p >= *min && p <= *max)
                .unwrap_or(false),
            Self::ForeverGoals => meta.is_forever_goal(),
        }
    }
}

/// Named-vector store seam: upsert, per-field cosine search, filtered
/// scroll, payload replacement, count. Modeled on the subset of Qdrant the
/// graph actually uses, so a remote index can slot in behind the trait.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, points: Vec<StorePoint>) -> Result<()>;

    /// Top-`limit` points by cosine similarity of `vector` against the named
    /// field, optionally dropping hits below `score_threshold`.
    fn search(
        &self,
        field: VectorField,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Payload-filtered scan in insertion order.
    fn scroll(&self, filter: &PayloadFilter, limit: usize) -> Result<Vec<PointPayload>>;

    /// Replace the payload at an existing point id. Vectors are unchanged.
    fn set_payload(&self, point_id: &str, payload: &PointPayload) -> Result<()>;

    fn points_count(&self) -> Result<u64>;
}

/// SQLite-backed store. One row per point, vectors as little-endian f32
/// blobs, payload as JSON.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dim: usize,
}

impl SqliteStore {
    /// Open (or create) the store at `path`. Schema creation is idempotent.
    pub fn open(path: &str, dim: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dim,
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory(dim: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dim,
        })
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(GraphError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(())
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS points (
            id               TEXT PRIMARY KEY,
            subject_vec      BLOB NOT NULL,
            relationship_vec BLOB NOT NULL,
            object_vec       BLOB NOT NULL,
            topic_vec        BLOB NOT NULL,
            content_vec      BLOB NOT NULL,
            payload          TEXT NOT NULL,
            inserted_at      INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );",
    )
}

fn encode_vec(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

fn decode_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl VectorStore for SqliteStore {
    fn upsert(&self, points: Vec<StorePoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        for p in &points {
            self.check_dim(&p.vectors.subject)?;
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for p in points {
            let payload = serde_json::to_string(&p.payload)?;
            tx.execute(
                "INSERT INTO points
                 (id, subject_vec, relationship_vec, object_vec, topic_vec, content_vec, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    subject_vec = excluded.subject_vec,
                    relationship_vec = excluded.relationship_vec,
                    object_vec = excluded.object_vec,
                    topic_vec = excluded.topic_vec,
                    content_vec = excluded.content_vec,
                    payload = excluded.payload",
                rusqlite::params![
                    p.id,
                    encode_vec(&p.vectors.subject),
                    encode_vec(&p.vectors.relationship),
                    encode_vec(&p.vectors.object),
                    encode_vec(&p.vectors.topic_vector),
                    encode_vec(&p.vectors.triple_content),
                    payload,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn search(
        &self,
        field: VectorField,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        self.check_dim(vector)?;
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT id, {}, payload FROM points", field.column());
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut hits: Vec<ScoredPoint> = Vec::new();
        for row in rows {
            let (id, vec_bytes, payload_json) = row?;
            let score = cosine_similarity(vector, &decode_vec(&vec_bytes));
            if let Some(threshold) = score_threshold {
                if score < threshold {
                    continue;
                }
            }
            let payload: PointPayload = match serde_json::from_str(&payload_json) {
                Ok(p) => p,
                Err(e) => {
                    debug!(point_id = %id, "skipping point with bad payload: {e}");
                    continue;
                }
            };
            hits.push(ScoredPoint { id, score, payload });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn scroll(&self, filter: &PayloadFilter, limit: usize) -> Result<Vec<PointPayload>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT id, payload FROM points ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            if results.len() >= limit {
                break;
            }
            let (id, payload_json) = row?;
            let payload: PointPayload = match serde_json::from_str(&payload_json) {
                Ok(p) => p,
                Err(e) => {
                    debug!(point_id = %id, "skipping point with bad payload: {e}");
                    continue;
                }
            };
            if filter.matches(&payload) {
                results.push(payload);
            }
        }
        Ok(results)
    }

    fn set_payload(&self, point_id: &str, payload: &PointPayload) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_string(payload)?;
        conn.execute(
            "UPDATE points SET payload = ?1 WHERE id = ?2",
            rusqlite::params![json, point_id],
        )?;
        Ok(())
    }

    fn points_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, triple: Triple, content_vec: Vec<f32>) -> StorePoint {
        let dim = content_vec.len();
        StorePoint {
            id: id.to_string(),
            vectors: NamedVectors {
                subject: vec![0.0; dim],
                relationship: vec![0.0; dim],
                object: vec![0.0; dim],
                topic_vector: vec![0.0; dim],
                triple_content: content_vec,
            },
            payload: PointPayload::new(&triple, TripleMetadata::default()),
        }
    }

    #[test]
    fn upsert_then_count() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let t = Triple::new("a", "b", "c");
        store
            .upsert(vec![point(&t.point_id(), t, vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(store.points_count().unwrap(), 1);
    }

    #[test]
    fn upsert_same_id_overwrites() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let t = Triple::new("a", "b", "c");
        let id = t.point_id();
        store
            .upsert(vec![point(&id, t.clone(), vec![1.0, 0.0, 0.0, 0.0])])
            .unwrap();

        let mut p2 = point(&id, t, vec![0.0, 1.0, 0.0, 0.0]);
        p2.payload.metadata.source = Some("later".to_string());
        store.upsert(vec![p2]).unwrap();

        assert_eq!(store.points_count().unwrap(), 1);
        let hits = store
            .search(VectorField::TripleContent, &[0.0, 1.0, 0.0, 0.0], 10, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.metadata.source.as_deref(), Some("later"));
    }

    #[test]
    fn search_orders_by_score_and_applies_threshold() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store
            .upsert(vec![
                point("p1", Triple::new("x", "r", "y"), vec![1.0, 0.0]),
                point("p2", Triple::new("u", "r", "v"), vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = store
            .search(VectorField::TripleContent, &[1.0, 0.0], 10, Some(0.5))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn empty_store_search_returns_empty() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let hits = store
            .search(VectorField::Subject, &[1.0, 0.0], 10, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn scroll_filters_by_timestamp() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let mut p1 = point("p1", Triple::new("a", "r", "b"), vec![1.0, 0.0]);
        p1.payload.metadata.timestamp = Some(100.0);
        let mut p2 = point("p2", Triple::new("c", "r", "d"), vec![0.0, 1.0]);
        p2.payload.metadata.timestamp = Some(900.0);
        store.upsert(vec![p1, p2]).unwrap();

        let results = store
            .scroll(
                &PayloadFilter::TimestampRange {
                    start: 0.0,
                    end: 500.0,
                },
                100,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subject, "a");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let err = store
            .search(VectorField::Subject, &[1.0, 0.0], 10, None)
            .unwrap_err();
        assert!(matches!(err, GraphError::DimensionMismatch { .. }));
    }
}
