//! Prompt assembly for the two backend calls of a turn: the planning call
//! and the response-shaping call.

use serde_json::Value;

use crate::session::SessionContext;
use crate::tools::{TOOL_CATALOG, ToolName};

/// Standing guidance for the planner. The tool catalog and context are
/// appended per turn.
const PLANNER_RULES: &str = "\
You are a planner that decides whether to respond directly or call ONE tool.

Return EXACTLY ONE JSON object (and nothing else) inside ```json code fences.

Valid outputs:

```json
{\"action\":\"chat\",\"answer\":\"<final user-facing text>\"}
```
OR
```json
{\"action\":\"tool\",\"name\":\"<tool name>\",\"args\":{}}
```

Rules:
- If you do not have enough details to call a tool, ask a short clarifying question with action=\"chat\".
- NEVER include lead_id, buyer_id, escalation_phone, or buyer_offer_cents in args; the runtime injects the identifiers, and only dealership staff can set the company's offer.
- You represent the dealership (the buyer). Customers are sellers. You can ask what they want to sell for (seller_ask_cents), but you CANNOT set buyer_offer_cents.
- Use ONE tool only per response.
- Keep args minimal and valid for the chosen tool (e.g., for car_retrieve use one of: car_id, vin, model, make, year).
- Output must be valid JSON (double quotes, no trailing commas).
- Always attempt tool calls when the user's request matches a tool's purpose, even if previous tool calls failed.
";

/// Render the tool catalog: one line per tool with its argument names.
fn tool_catalog() -> String {
    TOOL_CATALOG
        .iter()
        .map(|spec| {
            if spec.args.is_empty() {
                format!("- {}: {}", spec.name, spec.description)
            } else {
                format!("- {} (args: {}): {}", spec.name, spec.args.join(", "), spec.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The message sent to the backend as the planner prompt.
///
/// Light context only: the planner knows which lead it is talking to, but
/// is told not to echo runtime identifiers back into args.
pub fn build_planner_prompt(user_msg: &str, ctx: &SessionContext, logs_snippet: &str) -> String {
    let mut context_lines = vec![format!("- lead_id: {}", ctx.lead_id)];
    if !logs_snippet.is_empty() {
        context_lines.push(format!("- recent_logs: {logs_snippet}"));
    }

    format!(
        "{PLANNER_RULES}\n\nAvailable Tools:\n{}\n\nContext:\n{}\n\nUser says:\n{}\n\n\
         Return only ONE JSON object inside ```json fences.",
        tool_catalog(),
        context_lines.join("\n"),
        user_msg,
    )
}

/// The message sent to the backend to phrase a successful tool result.
pub fn build_phrasing_prompt(user_msg: &str, tool: ToolName, result: &Value) -> String {
    format!(
        "The user asked: \"{user_msg}\"\n\n\
         I called the tool '{tool}' and got this result:\n{result}\n\n\
         Please provide a natural, conversational response to the user's question based on \
         this tool result. Be concise and directly answer what they asked. Return ONLY the \
         response text, no JSON, no code blocks, just plain conversational text."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext {
            lead_id: 3,
            buyer_id: 9,
            escalation_phone: "+15550100".to_string(),
        }
    }

    #[test]
    fn planner_prompt_lists_every_tool() {
        let prompt = build_planner_prompt("what cars do you have", &ctx(), "");
        for name in ToolName::ALL {
            assert!(
                prompt.contains(&name.to_string()),
                "prompt should mention {name}"
            );
        }
    }

    #[test]
    fn planner_prompt_includes_context_and_message() {
        let prompt = build_planner_prompt("hello", &ctx(), "user_input:hi");
        assert!(prompt.contains("- lead_id: 3"));
        assert!(prompt.contains("- recent_logs: user_input:hi"));
        assert!(prompt.contains("User says:\nhello"));
    }

    #[test]
    fn planner_prompt_omits_empty_log_line() {
        let prompt = build_planner_prompt("hello", &ctx(), "");
        assert!(!prompt.contains("recent_logs"));
    }

    #[test]
    fn phrasing_prompt_embeds_result() {
        let result = serde_json::json!({"status": "success", "message": "Car updated."});
        let prompt = build_phrasing_prompt("update my mileage", ToolName::CarUpdate, &result);
        assert!(prompt.contains("car_update"));
        assert!(prompt.contains("Car updated."));
        assert!(prompt.contains("no JSON"));
    }
}
