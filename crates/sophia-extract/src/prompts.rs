//! Prompt templates for triple extraction. All three ask for the same flat
//! JSON shape so the parser is mode-agnostic:
//!
//! ```json
//! {"triples": [{"subject": "...", "verb": "...", "object": "...",
//!               "source_text": "...", "speaker": null, "topics": ["..."]}]}
//! ```

pub const DOCUMENT_PROMPT: &str = r#"Extract structured triples from the text below for a knowledge graph.

Rules:
1. Each triple has a subject (the entity described), a verb (a simple, clear
   relationship predicate like "is", "has", "created", "lives in"), and an
   object (what the subject relates to).
2. Never leave the object empty — use "unknown" when no clear object exists.
3. Keep each triple atomic and complete; extract every distinct fact.
4. source_text must quote the exact span of the input the triple came from.
5. topics is a short list of lowercase topic labels for the triple.

Output ONLY JSON with this exact structure:
{"triples": [{"subject": "entity", "verb": "relation", "object": "target", "source_text": "exact text from document", "topics": ["topic1", "topic2"]}]}

Text to analyze:
{text}"#;

pub const CONVERSATION_PROMPT: &str = r#"Extract structured triples from the conversation below for a knowledge graph.

The conversation may contain lines of the form "SPEAKER:name|content". Use
the speaker name to attribute each extracted fact.

Rules:
1. Each triple has a subject, a simple verb predicate, and an object.
2. Extract facts about the participants themselves (preferences, plans,
   circumstances) as well as facts they state about the world.
3. Set "speaker" on each triple to whoever stated the fact.
4. source_text must quote the exact utterance the triple came from.
5. topics is a short list of lowercase topic labels for the triple.
6. Skip greetings and filler with no factual content.

Output ONLY JSON with this exact structure:
{"triples": [{"subject": "entity", "verb": "relation", "object": "target", "source_text": "exact utterance", "speaker": "name", "topics": ["topic1"]}]}

Conversation:
{text}"#;

pub const QUERY_PROMPT: &str = r#"The text below is a question or request. Extract triples describing what it
asks about, so the knowledge graph can be searched for relevant facts.

Rules:
1. Subjects are the entities the question concerns; verbs are the
   relationships it asks after. Use "unknown" for the unknown part.
2. topics is a short list of lowercase topic labels for the query.
3. Set "speaker" to "user".

Output ONLY JSON with this exact structure:
{"triples": [{"subject": "entity", "verb": "relation", "object": "unknown", "source_text": "the question", "speaker": "user", "topics": ["topic1"]}]}

Text to analyze:
{text}"#;
