//! Final-answer extraction from loosely shaped upstream payloads.

use serde_json::Value;

/// Locate the human-readable answer inside `payload`.
///
/// Search order, first non-empty match wins:
///
/// 1. `result.data.message.content[*].text`
/// 2. `response` (non-blank string)
/// 3. `content[*].text`
///
/// Text parts are deduplicated keeping first-seen order and joined with a
/// newline. Missing keys and wrong types only mean "no match here"; the
/// function is total and returns an empty string when nothing is found.
pub fn extract_text(payload: &Value) -> String {
    let nested = payload
        .pointer("/result/data/message/content")
        .map(join_text_parts)
        .unwrap_or_default();
    if !nested.is_empty() {
        return nested;
    }

    if let Some(response) = payload.get("response").and_then(Value::as_str)
        && !response.trim().is_empty()
    {
        return response.to_string();
    }

    payload
        .get("content")
        .map(join_text_parts)
        .unwrap_or_default()
}

/// Collect the `text` of every part in a content list.
fn join_text_parts(content: &Value) -> String {
    let Some(parts) = content.as_array() else {
        return String::new();
    };

    let mut seen: Vec<&str> = Vec::new();
    for text in parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
    {
        if !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen.join("\n")
}
