use serde::{Deserialize, Serialize};

/// A directed `(subject, relationship, object)` edge, the atomic unit of
/// the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relationship: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relationship: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relationship: relationship.into(),
            object: object.into(),
        }
    }

    /// Deterministic, content-addressed point id.
    ///
    /// Re-ingesting the same tuple from a different source updates the
    /// existing point instead of duplicating the edge. The goal system also
    /// relies on this: a goal's description is effectively its id.
    pub fn point_id(&self) -> String {
        let key = format!("{}-{}-{}", self.subject, self.relationship, self.object);
        format!("{:x}", md5::compute(key.as_bytes()))
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.relationship, self.object)
    }
}

/// Lifecycle state of a goal triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
    /// Forever goals stay here; they never transition to `Completed`.
    Ongoing,
}

impl GoalStatus {
    /// A dependency is satisfied only when its goal reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
            Self::Ongoing => "ongoing",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for GoalStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            "ongoing" => Ok(Self::Ongoing),
            other => Err(format!("unknown goal status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Standard,
    /// An open-ended directive goal (usually also a forever goal).
    Instrumental,
    /// A concrete goal authored to operationalise an instrumental parent.
    Derived,
}

impl std::fmt::Display for GoalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Standard => "standard",
            Self::Instrumental => "instrumental",
            Self::Derived => "derived",
        };
        f.write_str(label)
    }
}

/// One progress note appended after a goal-pursuit turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub note: String,
    pub timestamp: f64,
}

/// Metadata carried on every stored triple.
///
/// All fields are optional; absent fields are omitted from the serialized
/// payload. `confidence`, `topic_similarity_score`, `is_hop` and
/// `is_procedural` are populated at retrieval time only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Unix seconds of ingestion or source event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Original text span the triple was extracted from. Preserved verbatim
    /// so extractions can be grounded against their source after the fact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Named entity the triple is primarily about, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_from_summary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstraction_level: Option<u8>,

    // Retrieval-time fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_similarity_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_hop: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_procedural: Option<bool>,

    // Goal state machine fields (predicate "has_goal").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_status: Option<GoalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_updated_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_goal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_type: Option<GoalType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_forever_goal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub journal_entries: Vec<JournalEntry>,
}

impl TripleMetadata {
    pub fn confidence(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }

    /// Missing `is_from_summary` is treated as false.
    pub fn is_from_summary(&self) -> bool {
        self.is_from_summary.unwrap_or(false)
    }

    pub fn is_forever_goal(&self) -> bool {
        self.is_forever_goal.unwrap_or(false)
    }

    pub fn goal_status_or_pending(&self) -> GoalStatus {
        self.goal_status.unwrap_or(GoalStatus::Pending)
    }

    pub fn priority_or_default(&self) -> u8 {
        self.priority.unwrap_or(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_stable_and_content_addressed() {
        let a = Triple::new("Joey", "likes", "Python");
        let b = Triple::new("Joey", "likes", "Python");
        let c = Triple::new("Joey", "likes", "Rust");
        assert_eq!(a.point_id(), b.point_id());
        assert_ne!(a.point_id(), c.point_id());
        // 128-bit digest as lowercase hex.
        assert_eq!(a.point_id().len(), 32);
    }

    #[test]
    fn goal_status_round_trips() {
        for status in [
            GoalStatus::Pending,
            GoalStatus::InProgress,
            GoalStatus::Completed,
            GoalStatus::Blocked,
            GoalStatus::Cancelled,
            GoalStatus::Ongoing,
        ] {
            let s = status.to_string();
            assert_eq!(s.parse::<GoalStatus>().unwrap(), status);
        }
    }

    #[test]
    fn metadata_skips_absent_fields() {
        let meta = TripleMetadata {
            source: Some("test".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("source"));
        assert!(!json.contains("goal_status"));
        assert!(!json.contains("journal_entries"));
    }

    #[test]
    fn missing_is_from_summary_reads_false() {
        let meta = TripleMetadata::default();
        assert!(!meta.is_from_summary());
    }
}
