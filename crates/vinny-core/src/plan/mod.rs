//! Turn plans: the structured decision derived from the model's free text.
//!
//! A plan either answers directly (`Chat`) or calls exactly one backend
//! operation (`Tool`). Plans are produced once per turn and never mutated
//! after validation.

mod parser;
mod validate;

pub use parser::extract_plan;
pub use validate::{FORBIDDEN_ARG_KEYS, PlanViolation, RESTRICTED_FIELD, validate_plan};

use serde_json::{Map, Value};

/// A validated plan for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Reply directly with `answer`.
    Chat { answer: String },
    /// Invoke one backend operation.
    ///
    /// The name stays a plain string so dispatch can re-check membership
    /// defensively instead of trusting upstream layers.
    Tool {
        name: String,
        args: Map<String, Value>,
    },
}

impl Plan {
    pub fn is_chat(&self) -> bool {
        matches!(self, Self::Chat { .. })
    }
}
