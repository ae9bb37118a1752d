//! The external conversational backend: adapter trait, wire shapes, and the
//! retry/session-failover client.
//!
//! The trait is intentionally object-safe so the client can hold a
//! `Box<dyn ChatBackend>` and tests can substitute a scripted fake.

mod client;
mod remote;

pub use client::{APOLOGY, ChatClient};
pub use remote::{BackendConfig, RemoteBackend};

use async_trait::async_trait;
use thiserror::Error;

/// Marker the backend appends to the final streamed frame.
pub const END_MARKER: &str = "<<END_OF_RESPONSE>>";

/// Failures while talking to the conversational backend.
///
/// None of these escape [`ChatClient`]; they collapse into "no text
/// produced" and feed the retry escalation.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("session request failed: {0}")]
    Session(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// The two wire shapes a send may use. The backend has historically
/// required either depending on version, so the client tries them in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// `{user_id, session_id, message}`.
    Minimal,
    /// The older shape carrying a stub car object.
    Legacy,
}

/// What one wire-level send produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Concatenated streamed text; may be empty when the stream stalled.
    Reply(String),
    /// The backend explicitly rejected the request ("bad request").
    Rejected,
}

/// Adapter interface for the conversational backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Exchange credentials for an authorization token.
    async fn authenticate(&self, username: &str, secret: &str) -> Result<String, ChatError>;

    /// Obtain a backend session id for `user_id`. `force_new` asks the
    /// backend for a fresh conversation thread.
    async fn open_session(
        &self,
        token: &str,
        user_id: &str,
        force_new: bool,
    ) -> Result<String, ChatError>;

    /// Send one message over the given wire shape and collect the streamed
    /// reply.
    async fn send(
        &self,
        token: &str,
        session_id: &str,
        user_id: &str,
        message: &str,
        shape: WireShape,
    ) -> Result<SendOutcome, ChatError>;

    /// Best-effort close of a backend session.
    async fn close_session(&self, token: &str, user_id: &str, session_id: &str)
    -> Result<(), ChatError>;
}

// Compile-time assertion: ChatBackend must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ChatBackend) {}
};
