//! Memory middleware between the user and the agent loop.
//!
//! `pre_process` recalls relevant memories before the agent sees the input;
//! `post_process` saves the exchange to episodic memory and queues semantic
//! extraction, which runs in the background once the session goes idle.
//! Both hooks are failure-proof: memory trouble must never break a turn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use sophia_episodes::EpisodicMemory;
use sophia_memory::{AssociativeSemanticMemory, RecallOptions};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Source of the cross-workspace summary injected into recall context.
/// Implemented by the goal adapter; the monitor only needs the rendered text.
pub trait WorkspaceView: Send + Sync {
    fn workspace_summary(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub auto_recall_limit: usize,
    /// Seconds of inactivity before queued extractions are consolidated.
    pub idle_seconds: u64,
    /// Messages per episode before rotation.
    pub episode_rotate_threshold: u32,
    pub agent_name: String,
    pub user_name: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            auto_recall_limit: 10,
            idle_seconds: 30,
            episode_rotate_threshold: 50,
            agent_name: "Sophia".to_string(),
            user_name: "User".to_string(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    episode_id: Option<String>,
    message_count: u32,
    extraction_queue: Vec<(String, String)>,
    last_activity: f64,
}

pub struct StreamMonitor {
    semantic: Arc<AssociativeSemanticMemory>,
    episodic: Arc<EpisodicMemory>,
    settings: MonitorSettings,
    workspace: Mutex<Option<Arc<dyn WorkspaceView>>>,
    sessions: Arc<DashMap<String, SessionState>>,
    timers: DashMap<String, JoinHandle<()>>,
    runtime: tokio::runtime::Handle,
}

impl StreamMonitor {
    /// `runtime` drives the per-session idle timers; the hooks themselves
    /// are synchronous and run on whatever worker thread calls them.
    pub fn new(
        semantic: Arc<AssociativeSemanticMemory>,
        episodic: Arc<EpisodicMemory>,
        settings: MonitorSettings,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            semantic,
            episodic,
            settings,
            workspace: Mutex::new(None),
            sessions: Arc::new(DashMap::new()),
            timers: DashMap::new(),
            runtime,
        }
    }

    pub fn set_workspace_view(&self, view: Arc<dyn WorkspaceView>) {
        *self.workspace.lock().unwrap() = Some(view);
    }

    /// Build the recall context injected ahead of the agent's prompt.
    /// Every sub-step failure is logged and skipped; this never fails.
    pub fn pre_process(&self, user_input: &str, _session_id: &str) -> String {
        let mut lines: Vec<String> = Vec::new();

        let opts = RecallOptions {
            limit: self.settings.auto_recall_limit,
            return_summary: false,
            ..Default::default()
        };
        match self.semantic.query_related_information(user_input, &opts) {
            Ok(recall) if !recall.triples.is_empty() => {
                lines.push(format!("Found {} relevant memories:\n", recall.triples.len()));
                for (i, (triple, meta)) in recall
                    .triples
                    .iter()
                    .take(self.settings.auto_recall_limit)
                    .enumerate()
                {
                    lines.push(format!("{}. {}", i + 1, triple));
                    if !meta.topics.is_empty() {
                        let shown: Vec<&str> =
                            meta.topics.iter().take(3).map(String::as_str).collect();
                        lines.push(format!("   Topics: {}", shown.join(", ")));
                    }
                }
            }
            Ok(_) => lines.push("No relevant memories found.".to_string()),
            Err(e) => {
                error!("recall failed in pre_process: {e}");
                lines.push("No relevant memories found.".to_string());
            }
        }

        match self
            .semantic
            .get_active_goals_for_prompt(&self.settings.agent_name, 10)
        {
            Ok(goals) if !goals.is_empty() => {
                lines.push("\n\n=== YOUR ACTIVE GOALS ===".to_string());
                lines.push(goals);
                lines.push("=== END GOALS ===".to_string());
            }
            Ok(_) => {}
            Err(e) => error!("active goal lookup failed in pre_process: {e}"),
        }

        let workspace = self.workspace.lock().unwrap().clone();
        if let Some(view) = workspace {
            let summary = view.workspace_summary();
            if !summary.is_empty() {
                lines.push("\n\n=== ACTIVE WORKSPACES ===".to_string());
                lines.push(summary);
                lines.push("=== END WORKSPACES ===".to_string());
            }
        }

        lines.join("\n")
    }

    /// Record an exchange: append to the current episode, queue extraction,
    /// rotate long episodes, and (re)arm the idle consolidation timer.
    pub fn post_process(&self, session_id: &str, user_input: &str, assistant_output: &str) {
        {
            let mut session = self.sessions.entry(session_id.to_string()).or_default();
            session.last_activity = Utc::now().timestamp_millis() as f64 / 1000.0;

            if session.episode_id.is_none() {
                match self.episodic.create_episode(session_id, None) {
                    Ok(id) => session.episode_id = Some(id),
                    Err(e) => error!(session_id, "episode creation failed: {e}"),
                }
            }

            if let Some(episode_id) = session.episode_id.clone() {
                if let Err(e) =
                    self.episodic
                        .add_message_to_episode(&episode_id, "user", user_input, None)
                {
                    error!(session_id, "failed to save user message: {e}");
                }
                if let Err(e) = self.episodic.add_message_to_episode(
                    &episode_id,
                    "assistant",
                    assistant_output,
                    None,
                ) {
                    error!(session_id, "failed to save assistant message: {e}");
                }
            }

            session.message_count += 2;

            // Very short exchanges carry no extractable facts.
            if user_input.len() > 10 || assistant_output.len() > 10 {
                session
                    .extraction_queue
                    .push((user_input.to_string(), assistant_output.to_string()));
            }

            if session.message_count >= self.settings.episode_rotate_threshold {
                if let Some(episode_id) = session.episode_id.take() {
                    info!(session_id, %episode_id, "rotating episode");
                    if let Err(e) = self.episodic.finalize_episode(&episode_id, None, None) {
                        error!(session_id, "episode finalize failed: {e}");
                    }
                }
                session.message_count = 0;
            }
        }

        self.schedule_consolidation(session_id);
    }

    /// Drain the session's extraction queue and ingest each exchange.
    pub fn consolidate(&self, session_id: &str) {
        consolidate_session(&self.sessions, &self.semantic, &self.settings, session_id);
    }

    /// Cancel the idle timer, consolidate synchronously, and finalize the
    /// current episode.
    pub fn flush(&self, session_id: &str) {
        if let Some((_, timer)) = self.timers.remove(session_id) {
            timer.abort();
        }
        self.consolidate(session_id);

        if let Some(mut session) = self.sessions.get_mut(session_id) {
            if let Some(episode_id) = session.episode_id.take() {
                if let Err(e) = self.episodic.finalize_episode(&episode_id, None, None) {
                    error!(session_id, "episode finalize failed during flush: {e}");
                }
            }
        }
    }

    fn schedule_consolidation(&self, session_id: &str) {
        if let Some((_, timer)) = self.timers.remove(session_id) {
            timer.abort();
        }

        let sessions = Arc::clone(&self.sessions);
        let semantic = Arc::clone(&self.semantic);
        let settings = self.settings.clone();
        let session = session_id.to_string();
        let idle = self.settings.idle_seconds;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_secs(idle)).await;
            let session_for_task = session.clone();
            let result = tokio::task::spawn_blocking(move || {
                consolidate_session(&sessions, &semantic, &settings, &session_for_task);
            })
            .await;
            if let Err(e) = result {
                error!(session_id = %session, "consolidation task panicked: {e}");
            }
        });
        self.timers.insert(session_id.to_string(), handle);
    }

    /// Flush every tracked session, used at shutdown so queued extractions
    /// and open episodes are not lost.
    pub fn flush_all(&self) {
        let sessions: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for session_id in sessions {
            self.flush(&session_id);
        }
    }

    /// Current episode id for a session, if one is open.
    pub fn current_episode(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.episode_id.clone())
    }
}

/// Atomically drain a session's extraction queue and ingest each exchange.
/// The session entry is locked only for the queue swap, never across the
/// LLM-bound extraction calls. Shared by the idle timer and direct flushes.
fn consolidate_session(
    sessions: &DashMap<String, SessionState>,
    semantic: &AssociativeSemanticMemory,
    settings: &MonitorSettings,
    session_id: &str,
) {
    let queue = match sessions.get_mut(session_id) {
        Some(mut session) => std::mem::take(&mut session.extraction_queue),
        None => return,
    };
    if queue.is_empty() {
        return;
    }
    debug!(session_id, pairs = queue.len(), "consolidating extraction queue");

    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    for (user_input, assistant_output) in queue {
        let text = format!(
            "SPEAKER:{}|{}\nSPEAKER:{}|{}",
            settings.user_name, user_input, settings.agent_name, assistant_output
        );
        if let Err(e) = semantic.ingest_text(
            &text,
            &format!("conversation:{session_id}"),
            Some(now),
            None,
            None,
        ) {
            error!(session_id, "extraction failed during consolidation: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use sophia_extract::TripleExtractor;
    use sophia_graph::{SqliteStore, VectorKnowledgeGraph};
    use sophia_llm::{ChatApi, ChatRequest, HashEmbedder, LlmError};

    const DIM: usize = 128;

    struct ScriptedChat {
        responses: StdMutex<VecDeque<String>>,
    }

    impl ChatApi for ScriptedChat {
        fn chat(&self, _req: &ChatRequest) -> Result<String, LlmError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Parse("queue empty".to_string()))
        }
    }

    fn monitor(settings: MonitorSettings, responses: &[&str]) -> Arc<StreamMonitor> {
        let store = SqliteStore::open_in_memory(DIM).unwrap();
        let kgraph = Arc::new(VectorKnowledgeGraph::new(
            Box::new(store),
            Arc::new(HashEmbedder::new(DIM)),
        ));
        let chat = Arc::new(ScriptedChat {
            responses: StdMutex::new(responses.iter().map(|r| r.to_string()).collect()),
        });
        let extractor = TripleExtractor::new(chat.clone(), "extract", 2048);
        let semantic = Arc::new(AssociativeSemanticMemory::new(
            kgraph, extractor, chat, "summary", 1024,
        ));
        let episodic = Arc::new(EpisodicMemory::open_in_memory("Sophia").unwrap());
        Arc::new(StreamMonitor::new(
            semantic,
            episodic,
            settings,
            tokio::runtime::Handle::current(),
        ))
    }

    const EXTRACTION: &str = r#"{"triples": [{"subject": "Joey", "verb": "likes", "object": "Python", "source_text": "t", "topics": ["joey"]}]}"#;

    #[tokio::test]
    async fn post_process_creates_and_fills_episode() {
        let m = monitor(MonitorSettings::default(), &[]);
        m.post_process("s1", "Hello there, how are you today?", "Doing great, thanks!");

        let episode_id = m.current_episode("s1").expect("episode created");
        let episode = m.episodic.get_episode(&episode_id).unwrap().unwrap();
        assert_eq!(episode.messages.len(), 2);
        assert_eq!(episode.messages[0].speaker, "user");
        assert_eq!(episode.messages[1].speaker, "assistant");
    }

    #[tokio::test]
    async fn episode_rotates_at_threshold() {
        let settings = MonitorSettings {
            episode_rotate_threshold: 4,
            idle_seconds: 3600,
            ..Default::default()
        };
        let m = monitor(settings, &[]);

        m.post_process("s1", "first exchange message", "first reply text");
        let first = m.current_episode("s1").unwrap();

        // Second exchange hits the threshold: episode finalized + cleared.
        m.post_process("s1", "second exchange message", "second reply text");
        assert!(m.current_episode("s1").is_none());
        let finalized = m.episodic.get_episode(&first).unwrap().unwrap();
        assert!(finalized.end_time.is_some());

        // Episode ids are second-granular; step past the boundary before the
        // next exchange opens a fresh episode.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        m.post_process("s1", "third exchange message", "third reply text");
        let second = m.current_episode("s1").expect("fresh episode");
        assert_ne!(second, first);
    }

    #[tokio::test]
    async fn flush_consolidates_queue_into_semantic_memory() {
        let settings = MonitorSettings {
            idle_seconds: 3600, // timer never fires during the test
            ..Default::default()
        };
        let m = monitor(settings, &[EXTRACTION]);

        m.post_process("s1", "Joey likes Python a lot", "Good to know about Joey!");
        assert_eq!(m.semantic.kgraph().points_count().unwrap(), 0);

        m.flush("s1");
        assert_eq!(m.semantic.kgraph().points_count().unwrap(), 1);
        // Flush also finalizes the episode.
        assert!(m.current_episode("s1").is_none());
    }

    #[tokio::test]
    async fn short_exchanges_are_not_queued() {
        let settings = MonitorSettings {
            idle_seconds: 3600,
            ..Default::default()
        };
        let m = monitor(settings, &[EXTRACTION]);

        m.post_process("s1", "hi", "yo");
        m.flush("s1");
        // Nothing queued, nothing ingested, scripted response untouched.
        assert_eq!(m.semantic.kgraph().points_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_timer_consolidates_in_background() {
        let settings = MonitorSettings {
            idle_seconds: 0,
            ..Default::default()
        };
        let m = monitor(settings, &[EXTRACTION]);

        m.post_process("s1", "Joey likes Python a lot", "Good to know about Joey!");
        // Give the zero-delay timer a moment to fire and run extraction.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if m.semantic.kgraph().points_count().unwrap() > 0 {
                break;
            }
        }
        assert_eq!(m.semantic.kgraph().points_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn pre_process_never_fails() {
        let m = monitor(MonitorSettings::default(), &[]);
        // Empty store, exhausted chat queue: still returns a context string.
        let ctx = m.pre_process("anything at all", "s1");
        assert!(ctx.contains("No relevant memories found."));
    }
}
