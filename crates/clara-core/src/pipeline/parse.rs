//! Tolerant extraction of suggestion items from free-text model output.
//!
//! The reply is untrusted: JSON is located by the first `{` and last `}`, then
//! each item is read field by field so one malformed entry does not sink the rest.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_KIND: &str = "clinical";
pub const DEFAULT_URGENCY: &str = "medium";
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// A suggestion item after defaulting; content is guaranteed non-blank.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSuggestion {
    pub content: String,
    pub kind: String,
    pub urgency: String,
    pub confidence: f32,
}

#[derive(Debug, Default, Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<Value>,
    #[serde(default)]
    urgency: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    suggestions: Vec<Value>,
}

/// Slice from the first `{` to the last `}`, inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and sanitize the model's reply. Anything unusable yields an empty list.
pub fn parse_suggestions(text: &str) -> Vec<SanitizedSuggestion> {
    let Some(json) = extract_json_object(text) else {
        debug!("Model reply contained no JSON object");
        return Vec::new();
    };
    let envelope: Envelope = match serde_json::from_str(json) {
        Ok(e) => e,
        Err(e) => {
            debug!("Model reply JSON did not parse: {}", e);
            return Vec::new();
        }
    };
    envelope
        .suggestions
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawSuggestion>(item).ok())
        .filter_map(sanitize)
        .collect()
}

fn text_field(v: Option<Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn confidence_field(v: Option<Value>) -> f32 {
    let raw = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(c) if (0.0..=1.0).contains(&c) => c as f32,
        _ => DEFAULT_CONFIDENCE,
    }
}

fn sanitize(raw: RawSuggestion) -> Option<SanitizedSuggestion> {
    let content = text_field(raw.content)?;
    Some(SanitizedSuggestion {
        content,
        kind: text_field(raw.kind).unwrap_or_else(|| DEFAULT_KIND.to_string()),
        urgency: text_field(raw.urgency).unwrap_or_else(|| DEFAULT_URGENCY.to_string()),
        confidence: confidence_field(raw.confidence),
    })
}
