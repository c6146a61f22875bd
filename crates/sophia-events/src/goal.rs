//! Continuous goal feeder: fills the agent's idle time with its own goals.
//!
//! Pull-only: the processor asks for the next goal event whenever the bus
//! is empty, so pacing (cooldown, rest breaks) lives here, not in the
//! processor. Each goal gets a deterministic per-goal session id so the
//! agent's chain of thought survives restarts.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sophia_graph::GoalStatus;
use sophia_memory::{AssociativeSemanticMemory, GoalQuery, GoalSuggestion};
use sophia_monitor::WorkspaceView;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::processor::GoalFeed;
use crate::types::{Event, EventPayload, EventPriority, EventType};

#[derive(Debug, Clone)]
pub struct GoalAdapterConfig {
    pub agent_name: String,
    pub cooldown_seconds: u64,
    pub max_consecutive_goals: u32,
    pub rest_seconds: u64,
}

impl Default for GoalAdapterConfig {
    fn default() -> Self {
        Self {
            agent_name: "Sophia".to_string(),
            cooldown_seconds: 30,
            max_consecutive_goals: 10,
            rest_seconds: 300,
        }
    }
}

pub struct GoalAdapter {
    memory: Arc<AssociativeSemanticMemory>,
    config: GoalAdapterConfig,
    enabled: AtomicBool,
    consecutive: AtomicU32,
    last_goal_time: Mutex<Option<Instant>>,
    current_goal: Mutex<Option<String>>,
}

impl GoalAdapter {
    pub fn new(memory: Arc<AssociativeSemanticMemory>, config: GoalAdapterConfig) -> Self {
        info!(
            cooldown = config.cooldown_seconds,
            max_consecutive = config.max_consecutive_goals,
            rest = config.rest_seconds,
            "goal adapter created"
        );
        Self {
            memory,
            config,
            enabled: AtomicBool::new(true),
            consecutive: AtomicU32::new(0),
            last_goal_time: Mutex::new(None),
            current_goal: Mutex::new(None),
        }
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Goal description currently being worked on, if any.
    pub fn current_goal_description(&self) -> Option<String> {
        self.current_goal.lock().unwrap().clone()
    }

    /// Stable session id for a goal, derived from its description so the
    /// per-goal conversation history survives restarts.
    pub fn goal_session_id(description: &str) -> String {
        let digest = Sha256::digest(description.as_bytes());
        format!("goal_{}", &hex::encode(digest)[..10])
    }

    fn build_prompt(
        memory: &AssociativeSemanticMemory,
        agent_name: &str,
        suggestion: &GoalSuggestion,
    ) -> String {
        let goal_desc = &suggestion.goal_description;

        let all_goals = memory
            .get_active_goals_for_prompt(agent_name, 10)
            .unwrap_or_default();

        let journal_text = suggestion
            .metadata
            .journal_entries
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|entry| format!("- {}", entry.note))
            .collect::<Vec<_>>()
            .join("\n");

        let subgoals = memory
            .get_subgoals(goal_desc, Some(agent_name))
            .unwrap_or_default();
        let subgoal_text = if subgoals.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = subgoals
                .iter()
                .map(|(t, m)| {
                    format!(
                        "- [{}] {}",
                        m.goal_status.unwrap_or(GoalStatus::Pending),
                        t.object
                    )
                })
                .collect();
            format!("\nSUB-GOALS:\n{}", lines.join("\n"))
        };

        let reasoning_line = if suggestion.reasoning.is_empty() {
            String::new()
        } else {
            format!("Why this goal: {}", suggestion.reasoning)
        };
        let progress_header = if journal_text.is_empty() {
            ""
        } else {
            "YOUR PREVIOUS PROGRESS ON THIS GOAL:"
        };
        let goals_section = if all_goals.is_empty() {
            "(No goals set yet)".to_string()
        } else {
            all_goals
        };

        format!(
            "AUTONOMOUS MODE — Working on a specific goal.\n\n\
             TARGET GOAL: {goal_desc}\n\
             {reasoning_line}\n\n\
             {progress_header}\n\
             {journal_text}\n\
             {subgoal_text}\n\n\
             ALL ACTIVE GOALS:\n\
             {goals_section}\n\n\
             INSTRUCTIONS:\n\
             1. If this goal is broad (e.g., \"Learn about X\", \"Research Y\") and has NO sub-goals yet:\n\
                - Decompose it into 3-5 specific sub-goals with this goal as their parent\n\
                - Mark THIS goal as in_progress, then STOP — the next round will assign sub-goals.\n\
             2. If this goal already has sub-goals, do NOT work on it directly — the system will assign sub-goals.\n\
             3. If this goal is specific enough to act on directly, take ONE concrete step and record what you found.\n\
             4. Only mark the goal completed when you have ACTUALLY done substantial work this session.\n\
             5. After each step, summarize what you learned and what's next."
        )
    }
}

#[async_trait]
impl GoalFeed for GoalAdapter {
    /// Called by the processor when the bus is empty. Applies cooldown and
    /// rest pacing, then turns the memory system's suggestion into an event.
    async fn next_goal_event(&self) -> Option<Event> {
        if !self.enabled.load(Ordering::SeqCst) {
            return None;
        }

        let remaining = {
            let last = self.last_goal_time.lock().unwrap();
            last.map(|t| {
                Duration::from_secs(self.config.cooldown_seconds).saturating_sub(t.elapsed())
            })
        };
        if let Some(remaining) = remaining {
            if !remaining.is_zero() {
                sleep(remaining).await;
            }
        }

        if self.consecutive.load(Ordering::SeqCst) >= self.config.max_consecutive_goals {
            info!(
                max = self.config.max_consecutive_goals,
                rest = self.config.rest_seconds,
                "hit max consecutive goals, resting"
            );
            self.consecutive.store(0, Ordering::SeqCst);
            sleep(Duration::from_secs(self.config.rest_seconds)).await;
        }

        // Suggestion + prompt construction hit the embedder and the store;
        // keep them off the event loop.
        let memory = Arc::clone(&self.memory);
        let agent_name = self.config.agent_name.clone();
        let built = tokio::task::spawn_blocking(move || {
            let suggestion = match memory.suggest_next_goal(&agent_name) {
                Ok(s) => s?,
                Err(e) => {
                    error!("goal suggestion failed: {e}");
                    return None;
                }
            };
            let prompt = GoalAdapter::build_prompt(&memory, &agent_name, &suggestion);
            Some((suggestion.goal_description, prompt))
        })
        .await
        .ok()
        .flatten();

        let (goal_desc, prompt) = built?;
        *self.current_goal.lock().unwrap() = Some(goal_desc.clone());

        let session_id = Self::goal_session_id(&goal_desc);
        let mut event = Event::new(
            EventType::GoalPursuit,
            EventPayload {
                session_id: session_id.clone(),
                content: prompt,
                goal_description: Some(goal_desc.clone()),
            },
            EventPriority::GoalDriven,
            "goal",
        );
        event
            .metadata
            .insert("goal_description".to_string(), goal_desc.clone());

        let consecutive = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_goal_time.lock().unwrap() = Some(Instant::now());
        info!(goal = %goal_desc, session_id = %session_id, consecutive, "generated goal event");
        Some(event)
    }

    fn reset_consecutive(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }
}

impl WorkspaceView for GoalAdapter {
    /// One line per active goal with its latest journal note, injected
    /// into recall context for cross-workspace awareness.
    fn workspace_summary(&self) -> String {
        let active = match self.memory.query_goals(&GoalQuery {
            owner: Some(self.config.agent_name.clone()),
            active_only: true,
            limit: 10,
            ..Default::default()
        }) {
            Ok(goals) => goals,
            Err(e) => {
                error!("workspace summary query failed: {e}");
                return String::new();
            }
        };

        let mut lines = Vec::new();
        for (triple, meta) in active {
            let status = meta.goal_status.unwrap_or(GoalStatus::Pending);
            let mut line = format!("- [{}] {}", status, triple.object);
            if let Some(last) = meta.journal_entries.last() {
                let note: String = last.note.chars().take(100).collect();
                line.push_str(&format!("\n  Last progress: {note}"));
            }
            lines.push(line);
        }
        debug!(count = lines.len(), "workspace summary built");
        lines.join("\n")
    }
}
