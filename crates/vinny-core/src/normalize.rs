//! Reply normalization: whatever shape the backend returns becomes plain
//! user-facing prose.
//!
//! Both reply paths (a direct chat answer and the tool-result phrasing
//! call) go through this one function. A mapping holding nested arrays or
//! objects is treated as "not conversational" and replaced with a fixed
//! fallback sentence rather than dumped at the user; that nested-value
//! check is a deliberate approximation and can misclassify short
//! structured answers.

use serde_json::Value;

/// Substituted when the backend hands back a structured payload instead of
/// prose.
pub const UNFORMATTED_FALLBACK: &str =
    "Sorry, I got the details but I need to format it better. Could you ask me that again?";

/// Field names checked, in order, when the reply parses to a flat mapping.
const TEXT_FIELDS: &[&str] = &["message", "response", "answer", "text", "reply"];

/// Normalize a backend reply into plain text.
pub fn normalize_reply(raw: &str) -> String {
    let stripped = strip_fences(raw);

    match serde_json::from_str::<Value>(stripped) {
        Ok(Value::String(inner)) => {
            // One layer of string encoding; the inner text may itself be
            // fenced or encoded once more.
            normalize_inner(&inner)
        }
        Ok(Value::Object(map)) => {
            let has_nested = map
                .values()
                .any(|v| matches!(v, Value::Array(_) | Value::Object(_)));
            if has_nested {
                return UNFORMATTED_FALLBACK.to_string();
            }

            for field in TEXT_FIELDS {
                if let Some(Value::String(text)) = map.get(*field) {
                    return text.clone();
                }
            }

            if map.len() == 1 {
                if let Some(Value::String(text)) = map.values().next() {
                    return text.clone();
                }
            }

            UNFORMATTED_FALLBACK.to_string()
        }
        // Not structured data: the text is already conversational.
        _ => stripped.to_string(),
    }
}

/// Second-layer normalization: same rules, but without another recursion.
fn normalize_inner(raw: &str) -> String {
    let stripped = strip_fences(raw);
    match serde_json::from_str::<Value>(stripped) {
        Ok(Value::String(inner)) => inner,
        Ok(Value::Object(_)) => normalize_reply(stripped),
        _ => stripped.to_string(),
    }
}

/// Remove leading/trailing code-fence markers, with or without a language
/// tag.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(normalize_reply("Hello"), "Hello");
        assert_eq!(normalize_reply("  Hello  "), "Hello");
    }

    #[test]
    fn fenced_message_object_unwraps() {
        let raw = "```json\n{\"message\": \"Hello\"}\n```";
        assert_eq!(normalize_reply(raw), "Hello");
    }

    #[test]
    fn unfenced_message_object_unwraps() {
        assert_eq!(normalize_reply("{\"response\": \"All set!\"}"), "All set!");
    }

    #[test]
    fn priority_order_is_respected() {
        let raw = "{\"reply\": \"second\", \"message\": \"first\"}";
        assert_eq!(normalize_reply(raw), "first");
    }

    #[test]
    fn nested_payload_gets_fallback() {
        let raw = "{\"schedules\": [{\"id\": 1, \"time\": \"2025-01-01 09:00:00\"}]}";
        assert_eq!(normalize_reply(raw), UNFORMATTED_FALLBACK);
    }

    #[test]
    fn nested_payload_beats_text_field() {
        // The "not conversational" check runs before field extraction.
        let raw = "{\"message\": \"Hello\", \"data\": {\"count\": 2}}";
        assert_eq!(normalize_reply(raw), UNFORMATTED_FALLBACK);
    }

    #[test]
    fn single_string_entry_is_used() {
        assert_eq!(normalize_reply("{\"greeting\": \"Hi there\"}"), "Hi there");
    }

    #[test]
    fn multi_entry_without_known_field_gets_fallback() {
        let raw = "{\"a\": \"x\", \"b\": \"y\"}";
        assert_eq!(normalize_reply(raw), UNFORMATTED_FALLBACK);
    }

    #[test]
    fn double_encoded_string_unwraps() {
        // A JSON string holding a JSON object holding the message.
        let raw = "\"{\\\"message\\\": \\\"Hello\\\"}\"";
        assert_eq!(normalize_reply(raw), "Hello");
    }

    #[test]
    fn bare_fences_are_stripped() {
        assert_eq!(normalize_reply("```\nJust words\n```"), "Just words");
    }

    #[test]
    fn numeric_json_is_left_verbatim() {
        assert_eq!(normalize_reply("42"), "42");
    }
}
