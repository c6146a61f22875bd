use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{LlmError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Sentence embedding seam. Implementations must be deterministic per text;
/// the triple store relies on re-encoding a string producing the same vector.
pub trait Embedder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension for every vector this embedder produces.
    fn dim(&self) -> usize;

    /// Convenience wrapper for single-text callers.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::Embedding("empty embedding batch result".to_string()))
    }
}

/// Cosine similarity with a small epsilon guard against zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + 1e-12)
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dim: usize,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
        }
    }
}

impl Embedder for HttpEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/embeddings", self.base_url);
        debug!(count = texts.len(), "requesting embeddings");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: EmbeddingResponse = resp
            .json()
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut rows: Vec<(usize, Vec<f32>)> = api_resp
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        rows.sort_by_key(|(idx, _)| *idx);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Deterministic token-hash embedder for tests and offline runs.
///
/// Each lowercase alphanumeric token seeds a pseudo-random dense vector;
/// the text embedding is the L2-normalized sum of its token vectors. Cosine
/// similarity between two texts then tracks their token overlap, which is
/// enough for the retrieval pipeline to behave like it does with a real
/// sentence model. No model download, no network.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_text(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

impl HashEmbedder {
    fn encode_text(&self, text: &str) -> Vec<f32> {
        let mut sum = vec![0.0f32; self.dim];
        let mut any = false;

        for token in tokenize(text) {
            any = true;
            let mut state = fnv1a(token.as_bytes());
            for slot in sum.iter_mut() {
                state = splitmix64(state);
                // Map the top 24 bits to [-1, 1].
                let unit = ((state >> 40) as f32 / (1u64 << 23) as f32) - 1.0;
                *slot += unit;
            }
        }

        if !any {
            return sum; // zero vector for empty/degenerate text
        }

        let norm: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for slot in sum.iter_mut() {
                *slot /= norm;
            }
        }
        sum
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
