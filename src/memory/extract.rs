//! Fact extraction from raw content via the chat backend.
//!
//! The backend is prompted to emit a JSON array of fact objects. Responses
//! are parsed leniently: markdown fences and surrounding prose are stripped,
//! unknown fact types degrade to `world`, and an unparseable response yields
//! an empty list rather than an error. Extraction quality is the model's
//! problem; resilience to sloppy output is ours.

use serde::Deserialize;

use crate::memory::types::{EntityRef, FactType};

/// Prompt for extracting discrete facts from one content item.
pub const EXTRACTION_PROMPT: &str = r#"You are a memory extraction system. Extract discrete, standalone facts from the content below.

Rules:
- Each fact must be a single self-contained statement, understandable without the others.
- Resolve pronouns to the names they refer to.
- Classify each fact:
  - "world": something about the external world or other people
  - "agent": something about the agent itself (identity, abilities, history)
  - "opinion": a judgement, preference, or belief
- If the fact is tied to a date, set "event_date" to that date in YYYY-MM-DD form; otherwise null.
- List the named entities each fact mentions, with a short category such as "person", "place", "organization", or "thing".
- Skip filler, greetings, and meta-commentary.

{context_section}Content:
{content}

Output a JSON array only, no explanation:
[{"text": "...", "fact_type": "world", "event_date": null, "entities": [{"name": "...", "category": "..."}]}]"#;

/// One fact drafted by the extraction backend, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub text: String,
    pub fact_type: FactType,
    pub event_date: Option<String>,
    pub entities: Vec<EntityRef>,
}

#[derive(Deserialize)]
struct RawFact {
    #[serde(default)]
    text: String,
    #[serde(default)]
    fact_type: String,
    #[serde(default)]
    event_date: Option<String>,
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    category: String,
}

/// Build the extraction prompt for one content item.
pub fn build_extraction_prompt(content: &str, context: Option<&str>) -> String {
    let context_section = match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("Context: {}\n\n", ctx.trim()),
        _ => String::new(),
    };
    EXTRACTION_PROMPT
        .replace("{context_section}", &context_section)
        .replace("{content}", content)
}

/// Parse the backend's extraction response into fact drafts.
///
/// Returns an empty vec (with a warning) if no JSON array can be recovered.
pub fn parse_extraction_response(response: &str) -> Vec<ExtractedFact> {
    let trimmed = response.trim();

    // Strip markdown fences if present.
    let cleaned = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    // Locate the array even when the model wraps it in prose.
    let (start, end) = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(s), Some(e)) if e > s => (s, e + 1),
        _ => {
            tracing::warn!("extraction response contained no JSON array");
            return Vec::new();
        }
    };

    let raw: Vec<RawFact> = match serde_json::from_str(&cleaned[start..end]) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("failed to parse extraction response: {e}");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter(|f| !f.text.trim().is_empty())
        .map(|f| ExtractedFact {
            text: f.text.trim().to_string(),
            fact_type: f.fact_type.parse().unwrap_or(FactType::World),
            event_date: f
                .event_date
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty() && d != "null"),
            entities: f
                .entities
                .into_iter()
                .filter(|e| !e.name.trim().is_empty())
                .map(|e| EntityRef {
                    name: e.name.trim().to_string(),
                    category: if e.category.trim().is_empty() {
                        "thing".to_string()
                    } else {
                        e.category.trim().to_lowercase()
                    },
                })
                .collect(),
        })
        .collect()
}
