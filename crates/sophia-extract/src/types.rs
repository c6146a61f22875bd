use serde::{Deserialize, Serialize};

/// Which prompt template drives the extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Factual document text.
    Document,
    /// Multi-speaker conversation transcript (SPEAKER:name| lines).
    Conversation,
    /// Question text: extract the intent of the query itself.
    Query,
}

/// One triple as returned by the extraction model.
///
/// `topics` always deserializes to a list (possibly empty) so downstream
/// code never has to handle its absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTriple {
    pub subject: String,
    pub verb: String,
    pub object: String,
    #[serde(default)]
    pub source_text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Set by procedural detection: 1 = atomic step, 2 = basic procedure,
    /// 3 = high-level orchestration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstraction_level: Option<u8>,
}

/// Extraction result. Parse failures yield an empty triple list plus an
/// `error` string; extraction never returns an Err.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub triples: Vec<ExtractedTriple>,
    pub source: Option<String>,
    pub timestamp: f64,
    pub text: String,
    pub speaker: Option<String>,
    pub error: Option<String>,
}
