//! Per-session state: identity, turn trace, and the keyed store.
//!
//! Session state is an explicit context value constructed at session start
//! and threaded through every call -- there is no ambient global. The store
//! hands out one async mutex per session so two concurrent turns for the
//! same session can never race on the same backend session or log.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::chat::ChatClient;

// ---------------------------------------------------------------------------
// Session identity
// ---------------------------------------------------------------------------

/// Identity and session-owned fields injected into tool calls.
///
/// The storage connection rides separately as the shared `PgPool`; these are
/// the fields the model is forbidden to supply itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub lead_id: i64,
    pub buyer_id: i64,
    pub escalation_phone: String,
}

// ---------------------------------------------------------------------------
// Turn log
// ---------------------------------------------------------------------------

/// Kind of a turn trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEventKind {
    UserInput,
    Chat,
    ToolCall,
    ToolResult,
    PlannerFail,
    PlanInvalid,
    ResponseGenerated,
}

impl fmt::Display for TurnEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserInput => "user_input",
            Self::Chat => "chat",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::PlannerFail => "planner_fail",
            Self::PlanInvalid => "plan_invalid",
            Self::ResponseGenerated => "response_generated",
        };
        f.write_str(s)
    }
}

/// One trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub kind: TurnEventKind,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Append-only per-session trace. Unbounded growth is accepted; only reads
/// are windowed.
#[derive(Debug, Default)]
pub struct TurnLog {
    entries: Vec<TurnEvent>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: TurnEventKind, detail: impl Into<String>) {
        self.entries.push(TurnEvent {
            kind,
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TurnEvent] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[TurnEvent] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Compact `kind:detail` join of the last 3 entries, truncated for
    /// prompt context.
    pub fn snippet(&self) -> String {
        let joined = self
            .recent(3)
            .iter()
            .map(|e| format!("{}:{}", e.kind, e.detail))
            .collect::<Vec<_>>()
            .join("; ");
        truncate(&joined, 300)
    }

    pub fn last(&self) -> Option<&TurnEvent> {
        self.entries.last()
    }
}

/// Truncate on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Everything one session owns: identity, trace, and its chat client (with
/// the cached backend session inside).
pub struct SessionState {
    pub context: SessionContext,
    pub log: TurnLog,
    pub client: ChatClient,
}

/// Sessions keyed by their opaque id, each behind its own mutex.
///
/// Locking an entry for the duration of a turn serializes turns per session
/// while leaving unrelated sessions fully concurrent.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: String, state: SessionState) {
        let mut map = self.inner.lock().await;
        map.insert(session_id, Arc::new(Mutex::new(state)));
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        let map = self.inner.lock().await;
        map.get(session_id).cloned()
    }

    /// Find a live session created for `lead_id`, if any. Session init
    /// reuses it instead of opening a second backend conversation.
    pub async fn find_by_lead(&self, lead_id: i64) -> Option<String> {
        let map = self.inner.lock().await;
        for (session_id, state) in map.iter() {
            if let Ok(state) = state.try_lock() {
                if state.context.lead_id == lead_id {
                    return Some(session_id.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_recent_window() {
        let mut log = TurnLog::new();
        for i in 0..5 {
            log.push(TurnEventKind::Chat, format!("entry {i}"));
        }
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail, "entry 2");
        assert_eq!(recent[2].detail, "entry 4");
    }

    #[test]
    fn snippet_joins_last_three() {
        let mut log = TurnLog::new();
        log.push(TurnEventKind::UserInput, "hello");
        log.push(TurnEventKind::Chat, "hi there");
        let snippet = log.snippet();
        assert_eq!(snippet, "user_input:hello; chat:hi there");
    }

    #[test]
    fn snippet_is_empty_for_new_log() {
        assert_eq!(TurnLog::new().snippet(), "");
    }

    #[test]
    fn snippet_truncates_long_details() {
        let mut log = TurnLog::new();
        log.push(TurnEventKind::ToolResult, "x".repeat(500));
        assert_eq!(log.snippet().chars().count(), 300);
    }
}
