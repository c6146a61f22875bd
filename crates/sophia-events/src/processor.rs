//! The single consumer of the event bus and the agent's heartbeat.
//!
//! Continuous loop: drain the bus (user events first, they outrank
//! everything), and when the bus is empty ask the goal feed for idle work.
//! Every event runs through the same chat pipeline regardless of origin;
//! responses are routed back to their source channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use sophia_graph::JournalEntry;
use sophia_memory::AssociativeSemanticMemory;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::types::{Event, EventPayload, EventPriority, EventType};

/// Journal entries retained per goal.
const JOURNAL_RING_SIZE: usize = 20;
/// Maximum length of an extracted progress note.
const PROGRESS_NOTE_MAX: usize = 200;
/// Idle sleep when the goal feed has nothing to offer.
const IDLE_SLEEP_SECS: u64 = 5;

pub type ChatError = Box<dyn std::error::Error + Send + Sync>;

/// The synchronous agent pipeline. Runs on a worker thread for every event.
pub trait ChatHandler: Send + Sync {
    fn chat(&self, session_id: &str, content: &str) -> std::result::Result<String, ChatError>;
}

/// Routes a finished response back to its originating channel.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(&self, event: &Event, response: &str) -> std::result::Result<(), ChatError>;
}

/// Pull-only source of idle-time work. The processor calls
/// `next_goal_event` only when the bus is empty.
#[async_trait]
pub trait GoalFeed: Send + Sync {
    async fn next_goal_event(&self) -> Option<Event>;

    /// Called whenever a user event is processed, so goal pacing restarts
    /// fresh after user interaction.
    fn reset_consecutive(&self);
}

struct RateWindow {
    count: u32,
    hour_start: Instant,
}

pub struct EventProcessor {
    bus: Arc<EventBus>,
    chat: Arc<dyn ChatHandler>,
    memory: Option<Arc<AssociativeSemanticMemory>>,
    rate_limit_per_hour: u32,
    handlers: Mutex<HashMap<String, Arc<dyn ResponseHandler>>>,
    goal_feed: Mutex<Option<Arc<dyn GoalFeed>>>,
    rate: Mutex<RateWindow>,
    schedule_re: Regex,
    code_block_re: Regex,
}

impl EventProcessor {
    pub fn new(
        bus: Arc<EventBus>,
        chat: Arc<dyn ChatHandler>,
        memory: Option<Arc<AssociativeSemanticMemory>>,
        rate_limit_per_hour: u32,
    ) -> Self {
        Self {
            bus,
            chat,
            memory,
            rate_limit_per_hour,
            handlers: Mutex::new(HashMap::new()),
            goal_feed: Mutex::new(None),
            rate: Mutex::new(RateWindow {
                count: 0,
                hour_start: Instant::now(),
            }),
            schedule_re: Regex::new(r"\[SCHEDULE:\s*(\d+)\s*\|\s*(.+?)\]").unwrap(),
            code_block_re: Regex::new(r"(?s)```.*?```").unwrap(),
        }
    }

    /// Connect the goal feed, enabling continuous (never-idle) operation.
    pub fn set_goal_feed(&self, feed: Arc<dyn GoalFeed>) {
        info!("goal feed connected, continuous mode enabled");
        *self.goal_feed.lock().unwrap() = Some(feed);
    }

    /// Register the response router for a source channel.
    pub fn register_response_handler(&self, channel: &str, handler: Arc<dyn ResponseHandler>) {
        info!(channel, "registered response handler");
        self.handlers
            .lock()
            .unwrap()
            .insert(channel.to_string(), handler);
    }

    /// Continuous event loop. Runs until a shutdown event arrives or the
    /// shutdown flag flips; the in-flight chat always finishes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("event processor started (continuous mode)");
        loop {
            let event = tokio::select! {
                event = self.next_event() => event,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let Some(event) = event else {
                tokio::time::sleep(Duration::from_secs(IDLE_SLEEP_SECS)).await;
                continue;
            };

            if event.event_type == EventType::Shutdown {
                info!("received shutdown event");
                self.bus.task_done();
                break;
            }

            self.handle_event(event).await;

            if *shutdown.borrow() {
                break;
            }
        }
        info!("event processor stopped");
    }

    /// Next thing to work on:
    /// - bus non-empty: highest-priority event (user events reset goal pacing)
    /// - bus empty + goal feed: an idle-time goal event, or one last bus check
    /// - bus empty, no feed: block on the bus
    async fn next_event(&self) -> Option<Event> {
        if !self.bus.empty() {
            let event = self.bus.get().await;
            if event.priority.is_user() {
                if let Some(feed) = self.goal_feed.lock().unwrap().clone() {
                    feed.reset_consecutive();
                }
            }
            return Some(event);
        }

        let feed = self.goal_feed.lock().unwrap().clone();
        if let Some(feed) = feed {
            if let Some(goal_event) = feed.next_goal_event().await {
                return Some(goal_event);
            }
            if !self.bus.empty() {
                return Some(self.bus.get().await);
            }
            return None;
        }

        Some(self.bus.get().await)
    }

    async fn handle_event(&self, event: Event) {
        // Goal events come straight from the feed, not the bus.
        let is_from_bus = event.source_channel != "goal";

        info!(
            event_type = %event.event_type,
            priority = ?event.priority,
            source = %event.source_channel,
            event_id = %event.event_id,
            "processing event"
        );

        if !event.priority.is_user() && !self.check_rate_limit() {
            warn!(
                event_type = %event.event_type,
                limit = self.rate_limit_per_hour,
                "rate limit hit, skipping non-user event"
            );
            if is_from_bus {
                self.bus.task_done();
            }
            return;
        }

        let session_id = if event.payload.session_id.is_empty() {
            "autonomous".to_string()
        } else {
            event.payload.session_id.clone()
        };
        let content = event.payload.content.clone();
        if content.is_empty() {
            warn!(event_id = %event.event_id, "empty content in event");
            if is_from_bus {
                self.bus.task_done();
            }
            return;
        }

        // The chat pipeline is synchronous; run it on a worker thread and
        // convert any failure into response text for the channel.
        let chat = Arc::clone(&self.chat);
        let chat_session = session_id.clone();
        let response = match tokio::task::spawn_blocking(move || chat.chat(&chat_session, &content))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("chat pipeline error: {e}");
                format!("Error processing event: {e}")
            }
            Err(e) => {
                error!("chat task panicked: {e}");
                format!("Error processing event: {e}")
            }
        };

        if is_from_bus {
            self.bus.task_done();
        }

        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&event.source_channel)
            .cloned();
        if let Some(handler) = handler {
            if let Err(e) = handler.handle(&event, &response).await {
                error!(channel = %event.source_channel, "response handler error: {e}");
            }
        }

        self.parse_self_events(&response);

        if event.event_type == EventType::GoalPursuit {
            self.journal_goal_progress(&event, &response).await;
        }
    }

    /// Rolling-hour budget for non-user events.
    fn check_rate_limit(&self) -> bool {
        let mut rate = self.rate.lock().unwrap();
        if rate.hour_start.elapsed() >= Duration::from_secs(3600) {
            rate.count = 0;
            rate.hour_start = Instant::now();
        }
        if rate.count >= self.rate_limit_per_hour {
            return false;
        }
        rate.count += 1;
        true
    }

    /// Scan a response for `[SCHEDULE: N | prompt]` directives and enqueue
    /// a delayed self-event for each. Markers stay in the response text.
    fn parse_self_events(&self, response: &str) {
        for caps in self.schedule_re.captures_iter(response) {
            let Ok(delay_seconds) = caps[1].parse::<u64>() else {
                continue;
            };
            let prompt = caps[2].trim().to_string();
            info!(delay_seconds, prompt = %prompt, "self-schedule directive detected");

            let bus = Arc::clone(&self.bus);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
                bus.put(Event::new(
                    EventType::SelfScheduled,
                    EventPayload {
                        session_id: "autonomous".to_string(),
                        content: prompt,
                        goal_description: None,
                    },
                    EventPriority::SelfEvent,
                    "self",
                ))
                .await;
            });
        }
    }

    /// After a goal event, append a short progress note to the goal's
    /// journal (bounded ring of the most recent entries).
    async fn journal_goal_progress(&self, event: &Event, response: &str) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        let goal_desc = event
            .payload
            .goal_description
            .clone()
            .or_else(|| event.metadata.get("goal_description").cloned());
        let Some(goal_desc) = goal_desc else {
            return;
        };

        let note = self.extract_progress_note(response);
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        let desc_for_log = goal_desc.clone();
        let note_for_log = note.clone();

        let result = tokio::task::spawn_blocking(move || {
            memory.kgraph().update_goal_metadata(&goal_desc, |meta| {
                meta.journal_entries.push(JournalEntry { note, timestamp });
                if meta.journal_entries.len() > JOURNAL_RING_SIZE {
                    let excess = meta.journal_entries.len() - JOURNAL_RING_SIZE;
                    meta.journal_entries.drain(..excess);
                }
            })
        })
        .await;

        match result {
            Ok(Ok(true)) => info!(goal = %desc_for_log, note = %note_for_log, "journaled goal progress"),
            Ok(Ok(false)) => warn!(goal = %desc_for_log, "goal not found for journaling"),
            Ok(Err(e)) => error!("journal write failed: {e}"),
            Err(e) => error!("journal task panicked: {e}"),
        }
    }

    /// A concise progress note: code blocks stripped, first paragraph,
    /// truncated at a word boundary.
    fn extract_progress_note(&self, response: &str) -> String {
        let cleaned = self.code_block_re.replace_all(response, "");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return "(agent produced code output only)".to_string();
        }

        let note = cleaned
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or(cleaned);

        truncate_at_word(note, PROGRESS_NOTE_MAX)
    }
}

/// Truncate to at most `max` bytes on a word boundary, appending an
/// ellipsis. Char-boundary safe.
fn truncate_at_word(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let trimmed = match head.rfind(' ') {
        Some(pos) if pos > 0 => &head[..pos],
        _ => head,
    };
    format!("{trimmed}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopChat;
    impl ChatHandler for NoopChat {
        fn chat(&self, _s: &str, _c: &str) -> std::result::Result<String, ChatError> {
            Ok(String::new())
        }
    }

    fn processor() -> EventProcessor {
        EventProcessor::new(Arc::new(EventBus::new()), Arc::new(NoopChat), None, 120)
    }

    #[test]
    fn progress_note_strips_code_blocks() {
        let p = processor();
        let note = p.extract_progress_note(
            "```python\nprint('hi')\n```\nWrote the first draft of the parser.\n\nNext: tests.",
        );
        assert_eq!(note, "Wrote the first draft of the parser.");
    }

    #[test]
    fn progress_note_code_only_response() {
        let p = processor();
        let note = p.extract_progress_note("```\nonly code\n```");
        assert_eq!(note, "(agent produced code output only)");
    }

    #[test]
    fn progress_note_truncates_on_word_boundary() {
        let p = processor();
        let long = "word ".repeat(100);
        let note = p.extract_progress_note(&long);
        assert!(note.len() <= PROGRESS_NOTE_MAX + 3);
        assert!(note.ends_with("..."));
        assert!(!note.trim_end_matches("...").ends_with(' '));
    }

    #[test]
    fn schedule_regex_matches_directive() {
        let p = processor();
        let caps = p
            .schedule_re
            .captures("plan done [SCHEDULE: 120 | check the build status]")
            .unwrap();
        assert_eq!(&caps[1], "120");
        assert_eq!(caps[2].trim(), "check the build status");
    }

    #[test]
    fn rate_limit_rolls_over() {
        let p = EventProcessor::new(Arc::new(EventBus::new()), Arc::new(NoopChat), None, 2);
        assert!(p.check_rate_limit());
        assert!(p.check_rate_limit());
        assert!(!p.check_rate_limit());
    }
}
