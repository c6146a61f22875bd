//! The chat pipeline: memory recall, one LLM turn, memory write-back.
//!
//! Runs synchronously on a worker thread per event. The monitor hooks are
//! failure-proof, so a memory hiccup degrades the context rather than the
//! turn. A per-session cancellation flag lets channels pause a turn at the
//! next safe boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use sophia_events::processor::{ChatError, ChatHandler};
use sophia_llm::{ChatApi, ChatMessage, ChatRequest};
use sophia_monitor::StreamMonitor;
use tracing::{debug, info};

const PAUSED_SENTINEL: &str = "[Session paused]";

pub struct Agent {
    chat: Arc<dyn ChatApi>,
    monitor: Arc<StreamMonitor>,
    model: String,
    max_tokens: u32,
    agent_name: String,
    cancel_flags: DashMap<String, Arc<AtomicBool>>,
}

impl Agent {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        monitor: Arc<StreamMonitor>,
        model: impl Into<String>,
        max_tokens: u32,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            monitor,
            model: model.into(),
            max_tokens,
            agent_name: agent_name.into(),
            cancel_flags: DashMap::new(),
        }
    }

    /// Request that the session's in-flight turn exits at its next safe
    /// boundary with a paused sentinel response.
    pub fn cancel_session(&self, session_id: &str) {
        info!(session_id, "session cancellation requested");
        self.flag(session_id).store(true, Ordering::SeqCst);
    }

    fn flag(&self, session_id: &str) -> Arc<AtomicBool> {
        self.cancel_flags
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn take_cancelled(&self, flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

impl ChatHandler for Agent {
    fn chat(&self, session_id: &str, content: &str) -> Result<String, ChatError> {
        let flag = self.flag(session_id);

        let context = self.monitor.pre_process(content, session_id);
        if self.take_cancelled(&flag) {
            return Ok(PAUSED_SENTINEL.to_string());
        }

        let system = format!(
            "You are {}, a conversational agent with a persistent associative memory.\n\
             Use the memory context below when it is relevant; ignore it when it is not.\n\n\
             {}",
            self.agent_name, context
        );

        debug!(session_id, "running agent turn");
        let response = self.chat.chat(&ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(content)],
            temperature: 0.7,
            max_tokens: self.max_tokens,
        })?;

        if self.take_cancelled(&flag) {
            return Ok(PAUSED_SENTINEL.to_string());
        }

        self.monitor.post_process(session_id, content, &response);
        Ok(response)
    }
}
