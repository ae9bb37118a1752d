//! Plan schema and authorization checks.
//!
//! A pure function over the parsed JSON value: no I/O, no mutation, and the
//! first violation found wins. Session-owned keys are rejected outright --
//! the runtime injects them, the model must never supply them.

use serde_json::Value;
use thiserror::Error;

use super::Plan;
use crate::tools::ToolName;

/// Keys the runtime injects per session. A plan supplying any of them is
/// rejected before dispatch.
pub const FORBIDDEN_ARG_KEYS: &[&str] =
    &["database_url", "lead_id", "buyer_id", "escalation_phone"];

/// The one business-restricted field: only dealership staff may set the
/// company's offer.
pub const RESTRICTED_FIELD: &str = "buyer_offer_cents";

/// First violation found while validating a parsed plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanViolation {
    #[error("plan is not a JSON object")]
    NotAnObject,

    #[error("action must be 'chat' or 'tool'")]
    BadAction,

    #[error("chat plan must include string 'answer'")]
    MissingAnswer,

    #[error("unknown tool {0:?}")]
    UnknownTool(String),

    #[error("tool plan must include object 'args'")]
    ArgsNotObject,

    #[error("args must not include session-owned key {0:?}")]
    SessionOwnedKey(String),

    #[error("args must not include buyer_offer_cents (only dealership staff set the company's offer)")]
    RestrictedField,
}

/// Validate a parsed plan value against the schema and the field-level
/// authorization policy. Returns the typed [`Plan`] or the first violation.
pub fn validate_plan(value: &Value) -> Result<Plan, PlanViolation> {
    let obj = value.as_object().ok_or(PlanViolation::NotAnObject)?;

    match obj.get("action").and_then(Value::as_str) {
        Some("chat") => {
            let answer = obj
                .get("answer")
                .and_then(Value::as_str)
                .ok_or(PlanViolation::MissingAnswer)?;
            Ok(Plan::Chat {
                answer: answer.to_owned(),
            })
        }
        Some("tool") => {
            let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
            if !ToolName::is_allowed(name) {
                return Err(PlanViolation::UnknownTool(name.to_owned()));
            }

            let args = obj
                .get("args")
                .and_then(Value::as_object)
                .ok_or(PlanViolation::ArgsNotObject)?;

            for key in FORBIDDEN_ARG_KEYS {
                if args.contains_key(*key) {
                    return Err(PlanViolation::SessionOwnedKey((*key).to_owned()));
                }
            }
            if args.contains_key(RESTRICTED_FIELD) {
                return Err(PlanViolation::RestrictedField);
            }

            Ok(Plan::Tool {
                name: name.to_owned(),
                args: args.clone(),
            })
        }
        _ => Err(PlanViolation::BadAction),
    }
}
