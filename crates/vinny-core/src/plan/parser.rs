//! Plan extraction from unstructured model text.
//!
//! A strict two-stage search: a ```json fenced block first, then the first
//! balanced brace-delimited substring. Lossy but bounded -- absence of a
//! plan is a normal outcome the controller feeds into its retry handling,
//! never an error.

use serde_json::Value;

/// Pull the first JSON object out of a model reply.
///
/// Returns `None` when no parseable object is present.
pub fn extract_plan(text: &str) -> Option<Value> {
    let candidate = fenced_json(text).or_else(|| balanced_object(text))?;
    serde_json::from_str::<Value>(candidate).ok()
}

/// Stage 1: the contents of the first ```json fenced block, if the block
/// holds a brace-delimited object.
fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    let inner = rest[..end].trim();
    // A fence holding something other than an object falls through to the
    // balanced-brace stage.
    inner.starts_with('{').then_some(inner)
}

/// Stage 2: the first balanced `{...}` substring, honoring JSON string
/// literals and escapes so braces inside strings do not truncate the scan.
fn balanced_object(text: &str) -> Option<&str> {
    let open = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..open + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_block() {
        let text = "Here is my plan:\n```json\n{\"action\":\"chat\",\"answer\":\"hi\"}\n```\nDone.";
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["action"], "chat");
        assert_eq!(plan["answer"], "hi");
    }

    #[test]
    fn falls_back_to_bare_object() {
        let text = "sure thing {\"action\":\"tool\",\"name\":\"get_all_cars\",\"args\":{}} ok";
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["name"], "get_all_cars");
    }

    #[test]
    fn prefers_fenced_over_earlier_bare_object() {
        let text = "{\"noise\": true}\n```json\n{\"action\":\"chat\",\"answer\":\"real\"}\n```";
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["answer"], "real");
    }

    #[test]
    fn braces_inside_strings_do_not_truncate() {
        let text = r#"{"action":"chat","answer":"see {this} and \"that\""}"#;
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["answer"], "see {this} and \"that\"");
    }

    #[test]
    fn nested_objects_balance() {
        let text = r#"plan: {"action":"tool","name":"car_update","args":{"vin":"X","mileage":1}}"#;
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["args"]["mileage"], 1);
    }

    #[test]
    fn no_object_yields_none() {
        assert!(extract_plan("I could not decide on anything.").is_none());
        assert!(extract_plan("").is_none());
    }

    #[test]
    fn unbalanced_braces_yield_none() {
        assert!(extract_plan("broken { \"action\": \"chat\"").is_none());
    }

    #[test]
    fn malformed_json_in_fence_yields_none() {
        // The fence content is an object shape but invalid JSON, and the
        // balanced scan lands on the same broken text.
        assert!(extract_plan("```json\n{action: chat}\n```").is_none());
    }

    #[test]
    fn fence_without_object_falls_through() {
        let text = "```json\n[1, 2]\n```\nbut also {\"action\":\"chat\",\"answer\":\"ok\"}";
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["answer"], "ok");
    }

    #[test]
    fn unclosed_fence_still_finds_object() {
        let text = "```json\n{\"action\":\"chat\",\"answer\":\"ok\"}";
        let plan = extract_plan(text).expect("should extract");
        assert_eq!(plan["answer"], "ok");
    }
}
