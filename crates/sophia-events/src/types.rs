use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority levels for events. Lower ordinal = higher priority. The gaps
/// leave room for intermediate levels without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Shutdown, error recovery.
    Critical = 0,
    /// User typed a message right now.
    UserDirect = 10,
    /// User message received while the agent was busy.
    UserQueued = 20,
    /// Cron/timer events.
    Scheduled = 30,
    /// The agent scheduled this for itself.
    SelfEvent = 40,
    /// Idle-time goal pursuit.
    GoalDriven = 50,
    /// Low-priority background tasks.
    Background = 60,
}

impl EventPriority {
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// User events (direct or queued) are never rate limited and reset the
    /// goal adapter's consecutive counter.
    pub fn is_user(&self) -> bool {
        *self <= Self::UserQueued
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ChatMessage,
    CronTrigger,
    GoalPursuit,
    SelfScheduled,
    Shutdown,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ChatMessage => "chat_message",
            Self::CronTrigger => "cron_trigger",
            Self::GoalPursuit => "goal_pursuit",
            Self::SelfScheduled => "self_scheduled",
            Self::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    pub session_id: String,
    pub content: String,
    /// Set on goal-pursuit events so the processor can journal progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_description: Option<String>,
}

/// A single event flowing through the system. Created by adapters, consumed
/// by the processor; ordering is `(priority, created_at, event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub priority: EventPriority,
    /// Originating channel, used to route the response ("webui", "telegram",
    /// "cron", "self", "goal", "cli").
    pub source_channel: String,
    /// Channel-specific routing key (e.g. a Telegram chat id).
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        payload: EventPayload,
        priority: EventPriority,
        source_channel: impl Into<String>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            event_type,
            payload,
            priority,
            source_channel: source_channel.into(),
            reply_to: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn chat_message(
        session_id: impl Into<String>,
        content: impl Into<String>,
        priority: EventPriority,
        source_channel: impl Into<String>,
    ) -> Self {
        Self::new(
            EventType::ChatMessage,
            EventPayload {
                session_id: session_id.into(),
                content: content.into(),
                goal_description: None,
            },
            priority,
            source_channel,
        )
    }

    /// Sentinel that stops the processor. Critical priority so it preempts
    /// everything still queued.
    pub fn shutdown() -> Self {
        Self::new(
            EventType::Shutdown,
            EventPayload::default(),
            EventPriority::Critical,
            "system",
        )
    }
}

/// 12-hex event id, unique enough for routing maps and logs.
fn new_event_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.created_at == other.created_at
            && self.event_id == other.event_id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    /// Priority first, then FIFO within the same priority band.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.event_id.cmp(&other.event_id))
    }
}
