use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::thinking::strip_think_blocks;

/// Default request timeout. Extraction on small local models can be slow.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Synchronous chat-completion seam.
///
/// The memory stack runs on worker threads (`spawn_blocking`), so the client
/// is blocking by design. Tests substitute scripted implementations.
pub trait ChatApi: Send + Sync {
    fn chat(&self, req: &ChatRequest) -> Result<String>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
///
/// `base_url` should not include a trailing slash (e.g.
/// "http://localhost:1234/v1"). `<think>…</think>` blocks are stripped from
/// every response before it is returned.
pub struct LlmClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl ChatApi for LlmClient {
    fn chat(&self, req: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();
        let body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
        });

        debug!(model = %req.model, "sending chat completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().unwrap_or_default();
            warn!(status, body = %text, "chat completion API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response has no choices".to_string()))?;

        Ok(strip_think_blocks(&content))
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
