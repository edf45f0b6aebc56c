//! Parsing of untrusted triage payloads into [`AiAnalysis`].

use serde_json::Value;
use vetline_core::{AiAnalysis, Severity};

pub const AI_DISCLAIMER: &str = "This AI analysis is advisory only and should not replace \
    professional veterinary care. Please seek immediate help from a qualified veterinarian.";

const FALLBACK_DISCLAIMER: &str =
    "AI analysis unavailable. Please seek immediate professional veterinary care.";

/// Most items kept per list
pub const MAX_ITEMS: usize = 10;

/// Longest item kept, in characters
pub const MAX_ITEM_CHARS: usize = 500;

/// Advice returned when the payload cannot be read at all
pub fn fallback_analysis() -> AiAnalysis {
    AiAnalysis {
        severity: Severity::Medium,
        suggestions: vec![
            "Keep the animal calm and comfortable".to_string(),
            "Do not give any medication without veterinary advice".to_string(),
            "Monitor vital signs if possible".to_string(),
        ],
        possible_conditions: vec![
            "Unable to determine - professional assessment needed".to_string(),
        ],
        immediate_steps: vec![
            "Contact a veterinarian immediately".to_string(),
            "Keep the animal warm and stable".to_string(),
            "Do not move the animal unless necessary for safety".to_string(),
        ],
        disclaimer: FALLBACK_DISCLAIMER.to_string(),
    }
}

/// Parse a raw JSON payload; anything that is not a JSON object yields the fallback.
pub fn parse_ai_analysis(raw: &str) -> AiAnalysis {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => analysis_from_value(&value),
        Err(_) => fallback_analysis(),
    }
}

pub fn analysis_from_value(value: &Value) -> AiAnalysis {
    let Some(object) = value.as_object() else {
        return fallback_analysis();
    };

    let field = |camel: &str, snake: &str| object.get(camel).or_else(|| object.get(snake));

    AiAnalysis {
        severity: object
            .get("severity")
            .and_then(Value::as_str)
            .map(parse_severity)
            .unwrap_or_default(),
        suggestions: string_list(object.get("suggestions")),
        possible_conditions: string_list(field("possibleConditions", "possible_conditions")),
        immediate_steps: string_list(field("immediateSteps", "immediate_steps")),
        disclaimer: AI_DISCLAIMER.to_string(),
    }
}

fn parse_severity(raw: &str) -> Severity {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" => Severity::Low,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Medium,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .take(MAX_ITEMS)
        .map(|item| item.chars().take(MAX_ITEM_CHARS).collect())
        .collect()
}
