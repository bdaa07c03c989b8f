//! Model response parsing.
//!
//! Models wrap their JSON in prose or markdown fences and do not always answer
//! for every field. The parser recovers the outermost object and makes the
//! result total over the requested field names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::models::NOT_FOUND;

/// Reasoning recorded for fields the model did not return.
pub const NOT_FOUND_REASONING: &str = "field not found in document";

/// Structured content of a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Field name to extracted value.
    pub data: BTreeMap<String, String>,
    /// Field name to confidence in [0, 1], absent when the model gave none.
    pub confidence: BTreeMap<String, Option<f32>>,
    /// Field name to justification, absent when the model gave none.
    pub reasoning: BTreeMap<String, Option<String>>,
    /// Unmodified model output.
    pub raw: String,
}

impl ParsedResponse {
    pub fn value(&self, field: &str) -> Option<&str> {
        self.data.get(field).map(String::as_str)
    }

    pub fn confidence(&self, field: &str) -> Option<f32> {
        self.confidence.get(field).copied().flatten()
    }

    pub fn reasoning(&self, field: &str) -> Option<&str> {
        self.reasoning.get(field).and_then(|r| r.as_deref())
    }
}

/// Parse raw model output, back-filling every expected field the model omitted.
pub fn parse_response(raw: &str, expected: &[String]) -> Result<ParsedResponse, ParseError> {
    let json = json_span(raw).ok_or_else(|| ParseError::NoJson {
        raw: raw.to_string(),
    })?;

    let decoded: Value = serde_json::from_str(json).map_err(|e| ParseError::Decode {
        message: e.to_string(),
        raw: raw.to_string(),
    })?;

    let extracted = match decoded.get("extracted_data") {
        Some(Value::Object(map)) => map,
        _ => {
            return Err(ParseError::MissingExtractedData {
                raw: raw.to_string(),
            });
        }
    };
    let scores = object(&decoded, "confidence_scores");
    let notes = object(&decoded, "reasoning");

    let mut parsed = ParsedResponse {
        data: BTreeMap::new(),
        confidence: BTreeMap::new(),
        reasoning: BTreeMap::new(),
        raw: raw.to_string(),
    };

    for (name, value) in extracted {
        if value.is_null() {
            continue;
        }
        parsed.data.insert(name.clone(), value_to_string(value));
        parsed
            .confidence
            .insert(name.clone(), scores.and_then(|s| s.get(name)).and_then(confidence));
        parsed.reasoning.insert(
            name.clone(),
            notes
                .and_then(|n| n.get(name))
                .and_then(Value::as_str)
                .map(str::to_string),
        );
    }

    for name in expected {
        if parsed.data.contains_key(name) {
            continue;
        }
        trace!("Back-filling missing field '{}'", name);
        parsed.data.insert(name.clone(), NOT_FOUND.to_string());
        parsed.confidence.insert(name.clone(), Some(0.0));
        parsed
            .reasoning
            .insert(name.clone(), Some(NOT_FOUND_REASONING.to_string()));
    }

    debug!(
        "Parsed {} fields ({} expected)",
        parsed.data.len(),
        expected.len()
    );
    Ok(parsed)
}

/// Substring from the first `{` to the last `}`, inclusive.
fn json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn object<'a>(root: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    root.get(key).and_then(Value::as_object)
}

fn confidence(value: &Value) -> Option<f32> {
    value.as_f64().map(|c| c.clamp(0.0, 1.0) as f32)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
