use serde::{Deserialize, Serialize};

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTurn {
    /// "user" or "assistant".
    pub speaker: String,
    pub content: String,
    pub timestamp: f64,
}

/// A conversation episode with temporal boundaries.
///
/// Episodes are mutable until finalized; after that, `end_time`, `topics`
/// and `summary` may still be set but messages should not be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Derived as `{session_id}_{start_unix_seconds}` for readability.
    pub episode_id: String,
    pub session_id: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub messages: Vec<MessageTurn>,
    pub topics: Vec<String>,
    pub summary: Option<String>,
    pub metadata: serde_json::Value,
}
