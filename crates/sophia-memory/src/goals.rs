//! Goal lifecycle on top of the knowledge graph.
//!
//! A goal is a `(owner, "has_goal", description)` triple whose metadata
//! carries the state machine. Goal relationships are themselves triples
//! (`subgoal_of`, `depends_on`, `derived_from`), so the goal graph shares
//! the store's content-addressed identity: the description is the id.

use std::collections::HashMap;

use sophia_graph::{GoalStatus, GoalType, Triple, TripleMetadata};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::memory::AssociativeSemanticMemory;

const FOREVER_GOAL_BLOCKER: &str =
    "This is an instrumental/forever goal - it cannot be completed";
/// Dependency edges are matched near-exactly; anything looser invents
/// dependencies between unrelated goals.
const DEPENDENCY_MATCH_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct CreateGoalOptions {
    pub priority: u8,
    pub parent_goal: Option<String>,
    pub target_date: Option<f64>,
    pub source: String,
    pub episode_id: Option<String>,
    pub topics: Option<Vec<String>>,
    pub goal_type: GoalType,
    pub is_forever_goal: bool,
    pub depends_on: Vec<String>,
}

impl Default for CreateGoalOptions {
    fn default() -> Self {
        Self {
            priority: 3,
            parent_goal: None,
            target_date: None,
            source: "sophia_autonomous".to_string(),
            episode_id: None,
            topics: None,
            goal_type: GoalType::Standard,
            is_forever_goal: false,
            depends_on: vec![],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoalUpdate {
    pub status: Option<GoalStatus>,
    pub priority: Option<u8>,
    pub blocker_reason: Option<String>,
    pub completion_notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GoalQuery {
    pub status: Option<GoalStatus>,
    pub min_priority: u8,
    pub max_priority: u8,
    pub owner: Option<String>,
    pub active_only: bool,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct GoalSuggestion {
    pub goal_description: String,
    pub priority: u8,
    pub score: i32,
    pub goal_type: GoalType,
    pub reasoning: String,
    pub metadata: TripleMetadata,
}

/// Aggregate goal statistics.
#[derive(Debug, Clone, Default)]
pub struct GoalProgress {
    pub total_goals: usize,
    pub by_status: HashMap<String, usize>,
    pub by_priority: HashMap<u8, usize>,
    pub completion_rate: f32,
    pub active_count: usize,
    /// `(description, completion_timestamp)`, most recent first, top 10.
    pub recent_completions: Vec<(String, f64)>,
}

impl AssociativeSemanticMemory {
    /// Create a goal and its relationship triples. Returns the description,
    /// which doubles as the goal id.
    pub fn create_goal(
        &self,
        owner: &str,
        description: &str,
        opts: CreateGoalOptions,
    ) -> Result<String> {
        let now = self.now();
        let status = if opts.is_forever_goal {
            GoalStatus::Ongoing
        } else {
            GoalStatus::Pending
        };
        info!(owner, description, %status, "creating goal");

        let goal_meta = TripleMetadata {
            goal_status: Some(status),
            priority: Some(opts.priority.clamp(1, 5)),
            created_timestamp: Some(now),
            status_updated_timestamp: Some(now),
            target_date: opts.target_date,
            source: Some(opts.source.clone()),
            episode_id: opts.episode_id.clone(),
            parent_goal_id: opts.parent_goal.clone(),
            goal_type: Some(opts.goal_type),
            is_forever_goal: Some(opts.is_forever_goal),
            topics: opts
                .topics
                .clone()
                .unwrap_or_else(|| vec!["goal".to_string(), "planning".to_string()]),
            ..Default::default()
        };

        let goal_triple = Triple::new(owner, "has_goal", description);
        self.kgraph()
            .add_triples(std::slice::from_ref(&goal_triple), vec![goal_meta])?;

        let link_meta = |topics: &[&str]| TripleMetadata {
            source: Some(opts.source.clone()),
            timestamp: Some(now),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };

        if let Some(parent) = &opts.parent_goal {
            let subgoal = Triple::new(description, "subgoal_of", parent);
            self.kgraph()
                .add_triples(&[subgoal], vec![link_meta(&["goal", "hierarchy"])])?;

            if opts.goal_type == GoalType::Derived {
                let derived = Triple::new(description, "derived_from", parent);
                self.kgraph()
                    .add_triples(&[derived], vec![link_meta(&["goal", "derived"])])?;
            }
        }

        if !opts.depends_on.is_empty() {
            let triples: Vec<Triple> = opts
                .depends_on
                .iter()
                .map(|dep| Triple::new(description, "depends_on", dep))
                .collect();
            let metas = triples
                .iter()
                .map(|_| link_meta(&["goal", "dependency"]))
                .collect();
            self.kgraph().add_triples(&triples, metas)?;
        }

        Ok(description.to_string())
    }

    /// Update a goal's status or metadata with the lifecycle guards applied.
    /// Returns false when the goal does not exist.
    pub fn update_goal(&self, description: &str, update: GoalUpdate) -> Result<bool> {
        info!(description, "updating goal");

        let Some((_, current)) = self.kgraph().query_goal_by_description(description, 0.5)? else {
            warn!(description, "goal not found");
            return Ok(false);
        };
        let is_forever = current.is_forever_goal();
        let now = self.now();

        let mut new_status = None;
        let mut guard_blocker: Option<String> = None;
        let mut completion_ts: Option<f64> = None;

        if let Some(status) = update.status {
            if is_forever && status == GoalStatus::Completed {
                warn!(description, "cannot complete forever goal");
                new_status = Some(GoalStatus::Ongoing);
                guard_blocker = Some(FOREVER_GOAL_BLOCKER.to_string());
            } else if status == GoalStatus::Completed {
                let unmet = self.check_unmet_dependencies(description);
                if !unmet.is_empty() {
                    warn!(description, ?unmet, "completion blocked by dependencies");
                    new_status = Some(GoalStatus::Blocked);
                    guard_blocker = Some(format!(
                        "Blocked by pending dependencies: {}",
                        unmet.join(", ")
                    ));
                } else {
                    let subgoals = self.get_subgoals(description, None)?;
                    let incomplete: Vec<String> = subgoals
                        .iter()
                        .filter(|(_, m)| !m.goal_status_or_pending().is_terminal())
                        .map(|(t, _)| t.object.clone())
                        .collect();
                    if incomplete.is_empty() {
                        new_status = Some(GoalStatus::Completed);
                        completion_ts = Some(now);
                    } else {
                        warn!(
                            description,
                            count = incomplete.len(),
                            "completion blocked by sub-goals"
                        );
                        new_status = Some(GoalStatus::Blocked);
                        let sample: Vec<&str> =
                            incomplete.iter().take(3).map(String::as_str).collect();
                        guard_blocker = Some(format!(
                            "Has {} incomplete sub-goal(s): {}",
                            incomplete.len(),
                            sample.join(", ")
                        ));
                    }
                }
            } else {
                new_status = Some(status);
            }
        }

        let clear_progress = new_status == Some(GoalStatus::Pending);

        let updated = self.kgraph().update_goal_metadata(description, |meta| {
            if let Some(status) = new_status {
                meta.goal_status = Some(status);
            }
            if let Some(ts) = completion_ts {
                meta.completion_timestamp = Some(ts);
            }
            if let Some(blocker) = guard_blocker {
                meta.blocker_reason = Some(blocker);
            } else if let Some(blocker) = update.blocker_reason {
                meta.blocker_reason = Some(blocker);
            }
            if let Some(priority) = update.priority {
                meta.priority = Some(priority.clamp(1, 5));
            }
            if let Some(notes) = update.completion_notes {
                meta.completion_notes = Some(notes);
            }
            if clear_progress {
                // A reset-to-pending goal starts its history over.
                meta.journal_entries.clear();
                meta.completion_notes = None;
                meta.completion_timestamp = None;
            }
        })?;

        Ok(updated)
    }

    /// Descriptions of dependency goals not yet completed or cancelled.
    /// Lookup failures degrade to "no unmet dependencies" rather than
    /// blocking the update path.
    pub fn check_unmet_dependencies(&self, description: &str) -> Vec<String> {
        let deps = match self.kgraph().build_graph_from_subject_relationship(
            description,
            "depends_on",
            DEPENDENCY_MATCH_THRESHOLD,
            50,
        ) {
            Ok(deps) => deps,
            Err(e) => {
                error!(description, "dependency lookup failed: {e}");
                return vec![];
            }
        };

        let mut unmet = Vec::new();
        for (triple, _) in deps {
            let dep_desc = triple.object;
            match self.kgraph().query_goal_by_description(&dep_desc, 0.5) {
                Ok(Some((_, dep_meta))) => {
                    if !dep_meta.goal_status_or_pending().is_terminal() {
                        debug!(dependency = %dep_desc, "unmet dependency");
                        unmet.push(dep_desc);
                    }
                }
                Ok(None) => {}
                Err(e) => error!(dependency = %dep_desc, "dependency status lookup failed: {e}"),
            }
        }
        unmet
    }

    /// Query goals with status/priority/owner filters. Only `has_goal`
    /// triples are returned.
    pub fn query_goals(&self, query: &GoalQuery) -> Result<Vec<(Triple, TripleMetadata)>> {
        let limit = if query.limit == 0 { 100 } else { query.limit };
        let results = if query.active_only {
            self.kgraph().query_active_goals(limit)?
        } else if let Some(status) = query.status {
            self.kgraph().query_goals_by_status(status, limit)?
        } else {
            let min = if query.min_priority == 0 {
                1
            } else {
                query.min_priority
            };
            let max = if query.max_priority == 0 {
                5
            } else {
                query.max_priority
            };
            self.kgraph().query_goals_by_priority(min, max, limit)?
        };

        Ok(results
            .into_iter()
            .filter(|(t, _)| t.relationship == "has_goal")
            .filter(|(t, _)| {
                query
                    .owner
                    .as_deref()
                    .map(|o| t.subject.eq_ignore_ascii_case(o))
                    .unwrap_or(true)
            })
            .collect())
    }

    /// Sub-goals of a parent, linked through `parent_goal_id`.
    pub fn get_subgoals(
        &self,
        parent_description: &str,
        owner: Option<&str>,
    ) -> Result<Vec<(Triple, TripleMetadata)>> {
        let query = GoalQuery {
            owner: owner.map(String::from),
            min_priority: 1,
            max_priority: 5,
            limit: 100,
            ..Default::default()
        };
        let all = self.query_goals(&query)?;
        Ok(all
            .into_iter()
            .filter(|(_, m)| m.parent_goal_id.as_deref() == Some(parent_description))
            .collect())
    }

    /// Aggregate statistics over all goals for an owner.
    pub fn get_goal_progress(&self, owner: Option<&str>) -> Result<GoalProgress> {
        let query = GoalQuery {
            owner: owner.map(String::from),
            min_priority: 1,
            max_priority: 5,
            limit: 1000,
            ..Default::default()
        };
        let all = self.query_goals(&query)?;

        let mut progress = GoalProgress {
            total_goals: all.len(),
            ..Default::default()
        };
        for (triple, meta) in &all {
            let status = meta.goal_status_or_pending();
            *progress.by_status.entry(status.to_string()).or_default() += 1;
            *progress
                .by_priority
                .entry(meta.priority_or_default())
                .or_default() += 1;
            if status.is_active() {
                progress.active_count += 1;
            }
            if status == GoalStatus::Completed {
                if let Some(ts) = meta.completion_timestamp {
                    progress.recent_completions.push((triple.object.clone(), ts));
                }
            }
        }
        if progress.total_goals > 0 {
            let completed = progress
                .by_status
                .get("completed")
                .copied()
                .unwrap_or(0);
            progress.completion_rate = completed as f32 / progress.total_goals as f32;
        }
        progress
            .recent_completions
            .sort_by(|a, b| b.1.total_cmp(&a.1));
        progress.recent_completions.truncate(10);
        Ok(progress)
    }

    /// Pick the next goal to pursue. In-progress goals are preferred over
    /// pending ones; goals with unmet dependencies are skipped entirely.
    pub fn suggest_next_goal(&self, owner: &str) -> Result<Option<GoalSuggestion>> {
        let mut in_progress = self.query_goals(&GoalQuery {
            status: Some(GoalStatus::InProgress),
            owner: Some(owner.to_string()),
            limit: 100,
            ..Default::default()
        })?;
        let pending = self.query_goals(&GoalQuery {
            status: Some(GoalStatus::Pending),
            owner: Some(owner.to_string()),
            limit: 100,
            ..Default::default()
        })?;
        in_progress.extend(pending);

        if in_progress.is_empty() {
            debug!(owner, "no actionable goals");
            return Ok(None);
        }

        let now = self.now();
        let mut best: Option<GoalSuggestion> = None;

        for (triple, meta) in in_progress {
            let goal_desc = triple.object.clone();

            if !self.check_unmet_dependencies(&goal_desc).is_empty() {
                debug!(goal = %goal_desc, "skipping goal with unmet dependencies");
                continue;
            }

            let priority = meta.priority_or_default();
            let goal_type = meta.goal_type.unwrap_or(GoalType::Standard);
            let mut score = i32::from(priority) * 10;

            if meta.goal_status == Some(GoalStatus::InProgress) {
                score += 30;
            }
            if goal_type == GoalType::Derived {
                score += 20;
            }
            if let Some(target) = meta.target_date {
                let days_until = (target - now) / (24.0 * 3600.0);
                if days_until < 7.0 {
                    score += 15;
                } else if days_until < 30.0 {
                    score += 5;
                }
            }

            let subgoals = self.get_subgoals(&goal_desc, Some(owner))?;
            let has_active_subgoal = subgoals
                .iter()
                .any(|(_, m)| !m.goal_status_or_pending().is_terminal());
            if has_active_subgoal {
                score -= 50;
            }

            if let Some(parent_id) = &meta.parent_goal_id {
                if let Some((_, parent_meta)) =
                    self.kgraph().query_goal_by_description(parent_id, 0.5)?
                {
                    if parent_meta.priority_or_default() >= 4 {
                        score += 15;
                    }
                }
            }

            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                let mut reasoning = format!("Priority {priority}/5");
                if goal_type == GoalType::Derived {
                    reasoning.push_str(", derived from instrumental goal");
                }
                reasoning.push_str(" - dependencies met");
                best = Some(GoalSuggestion {
                    goal_description: goal_desc,
                    priority,
                    score,
                    goal_type,
                    reasoning,
                    metadata: meta,
                });
            }
        }

        if let Some(suggestion) = &best {
            info!(
                goal = %suggestion.goal_description,
                score = suggestion.score,
                "suggested next goal"
            );
        }
        Ok(best)
    }

    /// Format the goals worth keeping in the agent's prompt: instrumental /
    /// forever goals plus priority >= 4 goals, as a priority-starred bullet
    /// list. Empty string when there is nothing to show.
    pub fn get_active_goals_for_prompt(&self, owner: &str, limit: usize) -> Result<String> {
        let instrumental = self.kgraph().query_instrumental_goals(50)?;
        let high_priority = self.kgraph().query_high_priority_goals(4, 50)?;

        let mut goals: HashMap<String, (u8, GoalStatus, GoalType, bool)> = HashMap::new();
        for (triple, meta) in instrumental.into_iter().chain(high_priority) {
            if triple.relationship != "has_goal" || !triple.subject.eq_ignore_ascii_case(owner) {
                continue;
            }
            goals.entry(triple.object).or_insert((
                meta.priority_or_default(),
                meta.goal_status_or_pending(),
                meta.goal_type.unwrap_or(GoalType::Standard),
                meta.is_forever_goal(),
            ));
        }

        if goals.is_empty() {
            return Ok(String::new());
        }

        let mut sorted: Vec<(String, (u8, GoalStatus, GoalType, bool))> =
            goals.into_iter().collect();
        sorted.sort_by(|a, b| {
            (b.1 .0, b.1 .3)
                .cmp(&(a.1 .0, a.1 .3))
                .then_with(|| a.0.cmp(&b.0))
        });
        sorted.truncate(limit);

        let lines: Vec<String> = sorted
            .into_iter()
            .map(|(desc, (priority, status, goal_type, is_forever))| {
                let stars = "★".repeat(priority as usize);
                let type_label = if is_forever {
                    " [INSTRUMENTAL/ONGOING]"
                } else if goal_type == GoalType::Derived {
                    " [DERIVED]"
                } else {
                    ""
                };
                let status_label = if status == GoalStatus::Pending {
                    String::new()
                } else {
                    format!(" ({})", status.to_string().to_uppercase())
                };
                format!("- [{stars}] {desc}{type_label}{status_label}")
            })
            .collect();

        Ok(lines.join("\n"))
    }
}
