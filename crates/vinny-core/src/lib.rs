//! Core turn engine for the vinny assistant.
//!
//! One turn flows through: prompt assembly, the chat backend client (with
//! its bounded retry/session-failover), plan extraction and validation,
//! entity resolution, tool dispatch, and reply normalization. The
//! collaborators at the edges (storage, distance lookup, SMS) are consumed
//! through traits defined here.

pub mod chat;
pub mod controller;
pub mod dispatch;
pub mod distance;
pub mod normalize;
pub mod notify;
pub mod plan;
pub mod prompt;
pub mod resolve;
pub mod result;
pub mod session;
pub mod tools;

pub use controller::run_turn;
pub use result::{ErrorCode, ToolResult, ToolStatus};
