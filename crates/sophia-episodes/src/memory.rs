use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Episode, MessageTurn};

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn format_ts(ts: f64, fmt: &str) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format(fmt).to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Append-only store of conversation episodes, the "what happened when"
/// layer next to the semantic graph's "what is true".
///
/// Thread-safe: wraps the SQLite connection in a Mutex, same as the
/// semantic store.
pub struct EpisodicMemory {
    db: Mutex<Connection>,
    agent_name: String,
}

impl EpisodicMemory {
    pub fn new(conn: Connection, agent_name: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            agent_name: agent_name.into(),
        })
    }

    pub fn open(path: &str, agent_name: impl Into<String>) -> Result<Self> {
        Self::new(Connection::open(path)?, agent_name)
    }

    pub fn open_in_memory(agent_name: impl Into<String>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, agent_name)
    }

    /// Start a new episode for a session and return its id.
    pub fn create_episode(
        &self,
        session_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        let start_time = unix_now();
        let episode_id = format!("{}_{}", session_id, start_time as i64);
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO episodes (episode_id, session_id, start_time, topics, metadata)
             VALUES (?1, ?2, ?3, '[]', ?4)",
            rusqlite::params![episode_id, session_id, start_time, metadata.to_string()],
        )?;
        info!(%episode_id, "created episode");
        Ok(episode_id)
    }

    /// Append a message turn. A missing episode id is logged and ignored.
    pub fn add_message_to_episode(
        &self,
        episode_id: &str,
        speaker: &str,
        content: &str,
        timestamp: Option<f64>,
    ) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(unix_now);
        let db = self.db.lock().unwrap();

        let exists: bool = db
            .query_row(
                "SELECT 1 FROM episodes WHERE episode_id = ?1",
                [episode_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            warn!(%episode_id, "episode not found, dropping message");
            return Ok(());
        }

        db.execute(
            "INSERT INTO episode_messages (episode_id, speaker, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![episode_id, speaker, content, timestamp],
        )?;
        debug!(%episode_id, speaker, "added message to episode");
        Ok(())
    }

    /// Mark an episode complete: stamp `end_time` and optionally set topics
    /// and a summary. A missing episode id is logged and ignored.
    pub fn finalize_episode(
        &self,
        episode_id: &str,
        topics: Option<Vec<String>>,
        summary: Option<String>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let end_time = unix_now();

        let n = db.execute(
            "UPDATE episodes SET end_time = ?1 WHERE episode_id = ?2",
            rusqlite::params![end_time, episode_id],
        )?;
        if n == 0 {
            warn!(%episode_id, "episode not found, cannot finalize");
            return Ok(());
        }
        if let Some(topics) = topics {
            db.execute(
                "UPDATE episodes SET topics = ?1 WHERE episode_id = ?2",
                rusqlite::params![serde_json::to_string(&topics)?, episode_id],
            )?;
        }
        if let Some(summary) = summary {
            db.execute(
                "UPDATE episodes SET summary = ?1 WHERE episode_id = ?2",
                rusqlite::params![summary, episode_id],
            )?;
        }
        info!(%episode_id, "finalized episode");
        Ok(())
    }

    pub fn get_episode(&self, episode_id: &str) -> Result<Option<Episode>> {
        let db = self.db.lock().unwrap();
        self.load_episode(&db, episode_id)
    }

    /// Episodes whose start time falls within `[start, end]`, oldest first.
    pub fn query_episodes_by_time(&self, start: f64, end: f64) -> Result<Vec<Episode>> {
        let db = self.db.lock().unwrap();
        let ids: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT episode_id FROM episodes
                 WHERE start_time >= ?1 AND start_time <= ?2
                 ORDER BY start_time",
            )?;
            let rows = stmt.query_map(rusqlite::params![start, end], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        self.load_many(&db, &ids)
    }

    /// Episodes from the last `hours` hours, most recent first.
    pub fn get_recent_episodes(&self, hours: f64, limit: Option<usize>) -> Result<Vec<Episode>> {
        let end = unix_now();
        let mut episodes = self.query_episodes_by_time(end - hours * 3600.0, end)?;
        episodes.sort_by(|a, b| b.start_time.total_cmp(&a.start_time));
        if let Some(limit) = limit {
            episodes.truncate(limit);
        }
        Ok(episodes)
    }

    pub fn query_episodes_by_session(&self, session_id: &str) -> Result<Vec<Episode>> {
        let db = self.db.lock().unwrap();
        let ids: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT episode_id FROM episodes WHERE session_id = ?1 ORDER BY start_time",
            )?;
            let rows = stmt.query_map([session_id], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        self.load_many(&db, &ids)
    }

    /// Substring search across message contents and episode summaries,
    /// most recent first.
    pub fn search_episodes_by_content(&self, query_text: &str, limit: usize) -> Result<Vec<Episode>> {
        let pattern = format!("%{}%", query_text.to_lowercase());
        let db = self.db.lock().unwrap();
        let ids: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT DISTINCT e.episode_id FROM episodes e
                 LEFT JOIN episode_messages m ON m.episode_id = e.episode_id
                 WHERE lower(m.content) LIKE ?1 OR lower(coalesce(e.summary, '')) LIKE ?1
                 ORDER BY e.start_time DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![pattern, limit], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        let episodes = self.load_many(&db, &ids)?;
        debug!(query = query_text, count = episodes.len(), "content search");
        Ok(episodes)
    }

    /// Format the tail of an episode as conversation context.
    pub fn get_conversation_context(&self, episode_id: &str, max_turns: usize) -> Result<String> {
        let Some(episode) = self.get_episode(episode_id)? else {
            return Ok(String::new());
        };

        let mut lines = Vec::new();
        lines.push(format!(
            "Conversation from {}",
            format_ts(episode.start_time, "%Y-%m-%d %H:%M")
        ));
        if !episode.topics.is_empty() {
            lines.push(format!("Topics: {}", episode.topics.join(", ")));
        }
        lines.push(String::new());

        let start = episode.messages.len().saturating_sub(max_turns);
        for msg in &episode.messages[start..] {
            let label = if msg.speaker == "user" {
                "User"
            } else {
                &self.agent_name
            };
            lines.push(format!("{}: {}", label, msg.content));
        }
        Ok(lines.join("\n"))
    }

    /// Activity timeline over the last `days` days, grouped by date.
    pub fn get_timeline_summary(&self, days: u32) -> Result<String> {
        let episodes = self.get_recent_episodes(days as f64 * 24.0, None)?;
        if episodes.is_empty() {
            return Ok(format!("No conversations in the last {days} days."));
        }

        // BTreeMap keeps dates sorted; iterate in reverse for newest-first.
        let mut by_date: BTreeMap<String, Vec<&Episode>> = BTreeMap::new();
        for episode in &episodes {
            by_date
                .entry(format_ts(episode.start_time, "%Y-%m-%d"))
                .or_default()
                .push(episode);
        }

        let mut lines = vec![format!("Activity over the last {days} days:"), String::new()];
        for (_date, day_episodes) in by_date.iter().rev() {
            let date_label = format_ts(day_episodes[0].start_time, "%B %d, %Y");
            lines.push(format!(
                "**{}** ({} conversations)",
                date_label,
                day_episodes.len()
            ));
            for episode in day_episodes {
                let time_label = format_ts(episode.start_time, "%H:%M");
                let duration = episode
                    .end_time
                    .map(|end| format!(" ({}min)", ((end - episode.start_time) / 60.0) as i64))
                    .unwrap_or_default();
                let topics = if episode.topics.is_empty() {
                    String::new()
                } else {
                    format!(": {}", episode.topics.join(", "))
                };
                lines.push(format!("  - {time_label}{duration}{topics}"));
            }
            lines.push(String::new());
        }
        Ok(lines.join("\n"))
    }

    fn load_episode(&self, db: &Connection, episode_id: &str) -> Result<Option<Episode>> {
        let row = db
            .query_row(
                "SELECT episode_id, session_id, start_time, end_time, topics, summary, metadata
                 FROM episodes WHERE episode_id = ?1",
                [episode_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((episode_id, session_id, start_time, end_time, topics_json, summary, meta_json)) =
            row
        else {
            return Ok(None);
        };

        let messages = {
            let mut stmt = db.prepare(
                "SELECT speaker, content, timestamp FROM episode_messages
                 WHERE episode_id = ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt.query_map([&episode_id], |row| {
                Ok(MessageTurn {
                    speaker: row.get(0)?,
                    content: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?;
            rows.filter_map(|r| r.ok()).collect()
        };

        Ok(Some(Episode {
            episode_id,
            session_id,
            start_time,
            end_time,
            messages,
            topics: serde_json::from_str(&topics_json).unwrap_or_default(),
            summary,
            metadata: serde_json::from_str(&meta_json).unwrap_or(serde_json::json!({})),
        }))
    }

    fn load_many(&self, db: &Connection, ids: &[String]) -> Result<Vec<Episode>> {
        let mut episodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = self.load_episode(db, id)? {
                episodes.push(e);
            }
        }
        Ok(episodes)
    }
}
