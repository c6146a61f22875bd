use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SophiaError};

/// Top-level config (sophia.toml + SOPHIA_* env overrides).
///
/// String values may reference environment variables as `${VAR}`; references
/// are expanded after loading so secrets like bot tokens can stay out of the
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SophiaConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub event_sources: EventSourcesConfig,
}

impl Default for SophiaConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            monitor: MonitorConfig::default(),
            event_sources: EventSourcesConfig::default(),
        }
    }
}

/// Identity of the agent and its primary user. The agent name owns all
/// autonomously created goals and labels the assistant side of transcripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// Rolling-hour budget for non-user events. User events are never limited.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_hour: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            user_name: default_user_name(),
            rate_limit_per_hour: default_rate_limit(),
        }
    }
}

/// OpenAI-compatible chat endpoint settings. The same endpoint serves the
/// agent turn, triple extraction and recall summarization; extraction and
/// summarization may pin smaller models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Model for triple extraction. Falls back to `model` when not set.
    pub extraction_model: Option<String>,
    /// Model for recall summarization. Falls back to `model` when not set.
    pub summarization_model: Option<String>,
    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_chat_max_tokens")]
    pub chat_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: default_llm_api_key(),
            model: default_llm_model(),
            extraction_model: None,
            summarization_model: None,
            extraction_max_tokens: default_extraction_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            chat_max_tokens: default_chat_max_tokens(),
        }
    }
}

/// Sentence embedding endpoint. When `base_url` is unset the deterministic
/// hashing embedder is used instead (offline mode).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the triple store and episodic memory databases.
    #[serde(default = "default_data_dir")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir(),
        }
    }
}

/// Stream monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_auto_recall_limit")]
    pub auto_recall_limit: usize,
    /// Seconds of session inactivity before queued extractions are consolidated.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Messages per episode before rotation.
    #[serde(default = "default_episode_rotate_threshold")]
    pub episode_rotate_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_recall_limit: default_auto_recall_limit(),
            idle_seconds: default_idle_seconds(),
            episode_rotate_threshold: default_episode_rotate_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventSourcesConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub goal_engine: GoalEngineConfig,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jobs: Vec<ScheduledJob>,
}

/// One recurring prompt fired into the bus at a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub prompt: String,
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalEngineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_consecutive_goals")]
    pub max_consecutive_goals: u32,
    #[serde(default = "default_rest_seconds")]
    pub rest_seconds: u64,
}

impl Default for GoalEngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_seconds: default_cooldown_seconds(),
            max_consecutive_goals: default_max_consecutive_goals(),
            rest_seconds: default_rest_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub token: String,
    /// Empty list allows every chat; a non-empty list is an allowlist.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
}

fn default_agent_name() -> String {
    "Sophia".to_string()
}
fn default_user_name() -> String {
    "User".to_string()
}
fn default_rate_limit() -> u32 {
    120
}
fn default_llm_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}
fn default_llm_api_key() -> String {
    "not-needed".to_string()
}
fn default_llm_model() -> String {
    "default".to_string()
}
fn default_extraction_max_tokens() -> u32 {
    2048
}
fn default_summary_max_tokens() -> u32 {
    1024
}
fn default_chat_max_tokens() -> u32 {
    4096
}
fn default_embedding_dim() -> usize {
    384
}
fn default_auto_recall_limit() -> usize {
    10
}
fn default_idle_seconds() -> u64 {
    30
}
fn default_episode_rotate_threshold() -> u32 {
    50
}
fn default_cooldown_seconds() -> u64 {
    30
}
fn default_max_consecutive_goals() -> u32 {
    10
}
fn default_rest_seconds() -> u64 {
    300
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sophia", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sophia/sophia.toml", home)
}

impl SophiaConfig {
    /// Load config from a TOML file with SOPHIA_* env var overrides, then
    /// expand `${VAR}` references in all string values.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SophiaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SOPHIA_").split("_"))
            .extract()
            .map_err(|e| SophiaError::Config(e.to_string()))?;

        config.expand_env()
    }

    /// Expand `${VAR}` references in every string value of the config.
    /// Unset variables are left as-is so the failure surfaces close to use.
    fn expand_env(self) -> Result<Self> {
        let mut value = serde_json::to_value(&self)?;
        expand_env_vars(&mut value);
        Ok(serde_json::from_value(value)?)
    }
}

fn expand_env_vars(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${") {
                *s = expand_one(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                expand_env_vars(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                expand_env_vars(v);
            }
        }
        _ => {}
    }
}

fn expand_one(s: &str) -> String {
    let re = regex::Regex::new(r"\$\{(\w+)\}").unwrap();
    re.replace_all(s, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SophiaConfig::default();
        assert_eq!(cfg.agent.name, "Sophia");
        assert_eq!(cfg.agent.rate_limit_per_hour, 120);
        assert_eq!(cfg.embedding.dim, 384);
        assert_eq!(cfg.event_sources.goal_engine.cooldown_seconds, 30);
        assert_eq!(cfg.event_sources.goal_engine.max_consecutive_goals, 10);
        assert_eq!(cfg.event_sources.goal_engine.rest_seconds, 300);
        assert_eq!(cfg.monitor.episode_rotate_threshold, 50);
    }

    #[test]
    fn expands_env_references() {
        std::env::set_var("SOPHIA_TEST_TOKEN", "tok-123");
        let mut cfg = SophiaConfig::default();
        cfg.event_sources.telegram = Some(TelegramConfig {
            enabled: true,
            token: "${SOPHIA_TEST_TOKEN}".to_string(),
            allowed_chat_ids: vec![],
        });
        let cfg = cfg.expand_env().expect("expansion failed");
        assert_eq!(cfg.event_sources.telegram.unwrap().token, "tok-123");
    }

    #[test]
    fn unset_env_reference_left_verbatim() {
        let mut cfg = SophiaConfig::default();
        cfg.llm.api_key = "${SOPHIA_DOES_NOT_EXIST}".to_string();
        let cfg = cfg.expand_env().expect("expansion failed");
        assert_eq!(cfg.llm.api_key, "${SOPHIA_DOES_NOT_EXIST}");
    }
}
