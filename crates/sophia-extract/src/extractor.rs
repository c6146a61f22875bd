use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sophia_llm::{ChatApi, ChatMessage, ChatRequest};
use tracing::{debug, warn};

use crate::procedural::{abstraction_level_for, is_procedural_predicate};
use crate::prompts::{CONVERSATION_PROMPT, DOCUMENT_PROMPT, QUERY_PROMPT};
use crate::types::{ExtractMode, ExtractedTriple, Extraction};

/// LLM-backed triple extractor.
///
/// Wraps a chat endpoint and turns free-form text into schema-validated
/// triples. Extraction never fails: any model or parse error produces an
/// empty triple list with the error recorded on the result.
pub struct TripleExtractor {
    chat: Arc<dyn ChatApi>,
    model: String,
    max_tokens: u32,
}

impl TripleExtractor {
    pub fn new(chat: Arc<dyn ChatApi>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            chat,
            model: model.into(),
            max_tokens,
        }
    }

    /// Extract triples from `text`.
    ///
    /// A leading `SPEAKER:name|` prefix is stripped before the text reaches
    /// the model; the parsed name becomes the fallback speaker for triples
    /// the model leaves unattributed (an explicit `speaker` argument is used
    /// the same way).
    pub fn extract(
        &self,
        text: &str,
        mode: ExtractMode,
        source: Option<&str>,
        timestamp: Option<f64>,
        speaker: Option<&str>,
    ) -> Extraction {
        let (text_to_extract, parsed_speaker) = if mode == ExtractMode::Query {
            (text.to_string(), None)
        } else {
            parse_speaker_prefix(text)
        };
        let fallback_speaker = parsed_speaker.or_else(|| speaker.map(String::from));

        let template = match mode {
            ExtractMode::Document => DOCUMENT_PROMPT,
            ExtractMode::Conversation => CONVERSATION_PROMPT,
            ExtractMode::Query => QUERY_PROMPT,
        };
        let prompt = template.replace("{text}", &text_to_extract);

        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis() as f64 / 1000.0);
        let base = Extraction {
            triples: vec![],
            source: source.map(String::from),
            timestamp,
            text: text_to_extract.clone(),
            speaker: fallback_speaker.clone(),
            error: None,
        };

        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };

        let content = match self.chat.chat(&req) {
            Ok(c) => c,
            Err(e) => {
                warn!("extraction request failed: {e}");
                return Extraction {
                    error: Some(e.to_string()),
                    ..base
                };
            }
        };

        let mut triples = match parse_triples(&content) {
            Ok(t) => t,
            Err(e) => {
                warn!("extraction parse failed: {e}");
                debug!(raw = %content, "unparseable extraction output");
                return Extraction {
                    error: Some(e),
                    ..base
                };
            }
        };

        for triple in triples.iter_mut() {
            if triple.speaker.is_none() {
                triple.speaker = fallback_speaker.clone();
            }
        }
        augment_procedural(&mut triples);

        debug!(count = triples.len(), "extracted triples");
        Extraction { triples, ..base }
    }
}

/// Parse a leading `SPEAKER:name|content` prefix. Returns the content to
/// extract and the parsed speaker (None when the prefix is absent or
/// malformed).
fn parse_speaker_prefix(text: &str) -> (String, Option<String>) {
    if let Some(rest) = text.strip_prefix("SPEAKER:") {
        if let Some((name, content)) = rest.split_once('|') {
            return (content.trim().to_string(), Some(name.trim().to_string()));
        }
    }
    (text.to_string(), None)
}

#[derive(Deserialize)]
struct TriplesEnvelope {
    #[serde(default)]
    triples: Vec<ExtractedTriple>,
}

/// Parse the model's JSON output, tolerating think blocks and code fences.
fn parse_triples(content: &str) -> Result<Vec<ExtractedTriple>, String> {
    let cleaned = strip_json_fences(&sophia_llm::strip_think_blocks(content));
    if cleaned.is_empty() {
        return Err("empty response".to_string());
    }
    let envelope: TriplesEnvelope =
        serde_json::from_str(&cleaned).map_err(|e| format!("invalid JSON: {e}"))?;
    Ok(envelope.triples)
}

/// Drop a surrounding ``` / ```json fence, if present.
fn strip_json_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Skip an optional language tag on the fence line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.trim_end_matches('`').trim().to_string()
}

/// Tag triples with procedural predicates: append the "procedure" topic and
/// assign an abstraction level.
fn augment_procedural(triples: &mut [ExtractedTriple]) {
    for triple in triples.iter_mut() {
        if !is_procedural_predicate(&triple.verb) {
            continue;
        }
        if !triple.topics.iter().any(|t| t == "procedure") {
            triple.topics.push("procedure".to_string());
        }
        triple.abstraction_level = Some(abstraction_level_for(&triple.verb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sophia_llm::LlmError;

    /// ChatApi stub returning a fixed response.
    struct Scripted(String);

    impl ChatApi for Scripted {
        fn chat(&self, _req: &ChatRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl ChatApi for Failing {
        fn chat(&self, _req: &ChatRequest) -> Result<String, LlmError> {
            Err(LlmError::Parse("boom".to_string()))
        }
    }

    fn extractor(response: &str) -> TripleExtractor {
        TripleExtractor::new(Arc::new(Scripted(response.to_string())), "test-model", 512)
    }

    const VALID: &str = r#"{"triples": [{"subject": "Joey", "verb": "likes", "object": "Python", "source_text": "Joey likes Python", "topics": ["joey"]}]}"#;

    #[test]
    fn parses_valid_json() {
        let result = extractor(VALID).extract("Joey likes Python", ExtractMode::Document, Some("test"), None, None);
        assert_eq!(result.triples.len(), 1);
        assert_eq!(result.triples[0].subject, "Joey");
        assert!(result.error.is_none());
    }

    #[test]
    fn parse_failure_returns_empty_with_error() {
        let result = extractor("this is not json").extract("x", ExtractMode::Document, None, None, None);
        assert!(result.triples.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn request_failure_returns_empty_with_error() {
        let e = TripleExtractor::new(Arc::new(Failing), "m", 512);
        let result = e.extract("x", ExtractMode::Document, None, None, None);
        assert!(result.triples.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn strips_think_block_before_parsing() {
        let wrapped = format!("<think>reasoning here</think>{VALID}");
        let result = extractor(&wrapped).extract("x", ExtractMode::Document, None, None, None);
        assert_eq!(result.triples.len(), 1);
    }

    #[test]
    fn strips_json_fences_before_parsing() {
        let fenced = format!("```json\n{VALID}\n```");
        let result = extractor(&fenced).extract("x", ExtractMode::Document, None, None, None);
        assert_eq!(result.triples.len(), 1);
    }

    #[test]
    fn speaker_prefix_is_parsed_and_attributed() {
        let result = extractor(VALID).extract(
            "SPEAKER:Alex|I really do like Python",
            ExtractMode::Conversation,
            Some("conversation:s1"),
            None,
            None,
        );
        assert_eq!(result.speaker.as_deref(), Some("Alex"));
        assert_eq!(result.text, "I really do like Python");
        assert_eq!(result.triples[0].speaker.as_deref(), Some("Alex"));
    }

    #[test]
    fn argument_speaker_used_when_no_prefix() {
        let result = extractor(VALID).extract("x", ExtractMode::Document, None, None, Some("Joey"));
        assert_eq!(result.triples[0].speaker.as_deref(), Some("Joey"));
    }

    #[test]
    fn model_speaker_not_overwritten() {
        let with_speaker = r#"{"triples": [{"subject": "a", "verb": "b", "object": "c", "source_text": "t", "speaker": "Sophia", "topics": []}]}"#;
        let result = extractor(with_speaker).extract("x", ExtractMode::Document, None, None, Some("Joey"));
        assert_eq!(result.triples[0].speaker.as_deref(), Some("Sophia"));
    }

    #[test]
    fn topics_default_to_empty_list() {
        let no_topics = r#"{"triples": [{"subject": "a", "verb": "b", "object": "c", "source_text": "t"}]}"#;
        let result = extractor(no_topics).extract("x", ExtractMode::Document, None, None, None);
        assert!(result.triples[0].topics.is_empty());
    }

    #[test]
    fn procedural_predicates_are_tagged() {
        let procedural = r#"{"triples": [{"subject": "send request", "verb": "accomplished_by", "object": "use reqwest", "source_text": "t", "topics": ["http"]}]}"#;
        let result = extractor(procedural).extract("x", ExtractMode::Document, None, None, None);
        let t = &result.triples[0];
        assert!(t.topics.contains(&"procedure".to_string()));
        assert_eq!(t.abstraction_level, Some(2));
    }
}
