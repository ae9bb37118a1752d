//! The turn controller: one user message in, one final reply out.
//!
//! Strictly sequential: planning call, plan extraction and validation,
//! optional resolution + dispatch, optional phrasing call, normalization.
//! Every step appends to the session's turn trace, and every failure path
//! becomes a short user-facing sentence rather than a fault.

use serde_json::Value;
use tracing::{info, warn};

use crate::chat::APOLOGY;
use crate::dispatch::dispatch_tool;
use crate::normalize::normalize_reply;
use crate::plan::{Plan, extract_plan, validate_plan};
use crate::prompt::{build_phrasing_prompt, build_planner_prompt};
use crate::result::{ErrorCode, ToolStatus};
use crate::session::{SessionState, TurnEventKind, truncate};
use crate::tools::{ToolExecutor, ToolName};

/// Reply when no parseable plan came back after retries.
pub const PLANNER_FAIL_REPLY: &str =
    "Sorry, I couldn't figure out a plan. Could you rephrase?";

/// Reply when the plan parsed but failed validation.
pub const PLAN_INVALID_REPLY: &str =
    "Sorry, my plan came out malformed. Please try again.";

/// Process one turn for a session. Never returns an error; the worst
/// outcome is an apologetic sentence.
pub async fn run_turn(
    state: &mut SessionState,
    executor: &dyn ToolExecutor,
    user_msg: &str,
) -> String {
    state.log.push(TurnEventKind::UserInput, user_msg);

    let planner_prompt = build_planner_prompt(user_msg, &state.context, &state.log.snippet());
    let Some(raw) = state.client.ask(&planner_prompt).await else {
        warn!("planner produced no text after retries");
        state.log.push(
            TurnEventKind::PlannerFail,
            "conversational backend produced no text after retry escalation",
        );
        return APOLOGY.to_string();
    };

    let Some(parsed) = extract_plan(&raw) else {
        state.log.push(TurnEventKind::PlannerFail, truncate(&raw, 200));
        return PLANNER_FAIL_REPLY.to_string();
    };

    let plan = match validate_plan(&parsed) {
        Ok(plan) => plan,
        Err(violation) => {
            state.log.push(
                TurnEventKind::PlanInvalid,
                format!("{violation} (raw: {})", truncate(&raw, 200)),
            );
            return PLAN_INVALID_REPLY.to_string();
        }
    };

    let (name, args) = match plan {
        Plan::Chat { answer } => {
            // The direct answer goes through the same normalizer as the
            // phrasing path.
            let reply = normalize_reply(&answer);
            state.log.push(TurnEventKind::Chat, truncate(&reply, 120));
            return reply;
        }
        Plan::Tool { name, args } => (name, args),
    };

    info!(tool = %name, "plan selected a tool");
    state.log.push(
        TurnEventKind::ToolCall,
        format!("{name}({})", Value::Object(args.clone())),
    );

    let result = dispatch_tool(&name, &args, &state.context, executor).await;
    let result_json = serde_json::to_value(&result).unwrap_or(Value::Null);
    state
        .log
        .push(TurnEventKind::ToolResult, truncate(&result_json.to_string(), 200));

    if result.status != ToolStatus::Success {
        return error_reply(&result);
    }

    // Successful results go back to the backend for phrasing. An unknown
    // name cannot reach this point, but the catalog lookup stays defensive.
    let tool = name.parse::<ToolName>().ok();
    let phrasing_prompt = match tool {
        Some(tool) => build_phrasing_prompt(user_msg, tool, &result_json),
        None => return result.message.clone(),
    };

    let Some(phrased) = state.client.ask(&phrasing_prompt).await else {
        warn!(tool = %name, "phrasing call produced no text");
        state.log.push(
            TurnEventKind::PlannerFail,
            "phrasing call produced no text after retry escalation",
        );
        return APOLOGY.to_string();
    };

    let reply = normalize_reply(&phrased);
    state
        .log
        .push(TurnEventKind::ResponseGenerated, truncate(&reply, 120));
    reply
}

/// Turn an unsuccessful tool result into its user-facing sentence.
///
/// Most codes relay the operation's own message; the booking collision is
/// the one error designed to echo data back at the user.
fn error_reply(result: &crate::result::ToolResult) -> String {
    if result.code == Some(ErrorCode::TimeAlreadyBooked) {
        let existing_time = result
            .data
            .get("existing_schedule")
            .and_then(|s| s.get("schedule_time"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        return format!(
            "The buyer is already booked at {existing_time}. Please choose another time."
        );
    }

    if result.message.is_empty() {
        "That did not work.".to_string()
    } else {
        result.message.clone()
    }
}
