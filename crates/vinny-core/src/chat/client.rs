//! The retry/session state machine in front of the conversational backend.
//!
//! Each logical send tries both wire shapes; the full escalation is bounded
//! to four attempts: same session twice, then a fresh backend session for
//! each of the last two. Nothing raises past this boundary -- every failure
//! mode collapses into "no text produced".

use tracing::{debug, info, warn};

use super::{ChatBackend, ChatError, SendOutcome, WireShape};

/// Terminal, user-visible reply when every attempt came back empty.
pub const APOLOGY: &str =
    "Sorry, I'm having trouble reaching my assistant right now. Please try again in a moment.";

/// Attempts per logical send, including the session-recreation ones.
const MAX_ATTEMPTS: u32 = 4;
/// Attempt number at which the current backend session is torn down and
/// recreated before resending.
const RECREATE_FROM_ATTEMPT: u32 = 3;

/// Client for one logical user session.
///
/// Holds the lazily-acquired auth token and backend session id; at most one
/// live backend session exists per client at a time.
pub struct ChatClient {
    backend: Box<dyn ChatBackend>,
    user_id: String,
    username: String,
    secret: String,
    token: Option<String>,
    session_id: Option<String>,
}

impl ChatClient {
    pub fn new(
        backend: Box<dyn ChatBackend>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            username: username.into(),
            secret: secret.into(),
            token: None,
            session_id: None,
        }
    }

    /// The backend session currently bound, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Authenticate lazily and cache the token.
    async fn token(&mut self) -> Result<String, ChatError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let token = self.backend.authenticate(&self.username, &self.secret).await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Bind a backend session lazily and cache its id.
    ///
    /// `force_new` tears down any previously bound session first so the
    /// backend cannot silently hand the old thread back.
    pub async fn bind_session(&mut self, force_new: bool) -> Result<String, ChatError> {
        if !force_new {
            if let Some(session_id) = &self.session_id {
                return Ok(session_id.clone());
            }
        }

        let token = self.token().await?;

        if force_new {
            if let Some(old) = self.session_id.take() {
                if let Err(e) = self.backend.close_session(&token, &self.user_id, &old).await {
                    warn!(session = %old, error = %e, "failed to close stale backend session");
                }
            }
        }

        let session_id = self
            .backend
            .open_session(&token, &self.user_id, force_new)
            .await?;
        info!(session = %session_id, force_new, "bound backend session");
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// One logical send: both wire shapes in order. The first shape that
    /// yields non-empty text without an explicit rejection wins.
    async fn send_once(&mut self, message: &str) -> Option<String> {
        let token = match self.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "authentication failed");
                return None;
            }
        };
        let session_id = match self.bind_session(false).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not bind backend session");
                return None;
            }
        };

        for shape in [WireShape::Minimal, WireShape::Legacy] {
            match self
                .backend
                .send(&token, &session_id, &self.user_id, message, shape)
                .await
            {
                Ok(SendOutcome::Reply(text)) if !text.trim().is_empty() => {
                    debug!(session = %session_id, ?shape, chars = text.len(), "received reply");
                    return Some(text);
                }
                Ok(SendOutcome::Reply(_)) => {
                    debug!(session = %session_id, ?shape, "empty reply");
                }
                Ok(SendOutcome::Rejected) => {
                    debug!(session = %session_id, ?shape, "backend rejected request");
                }
                Err(e) => {
                    warn!(session = %session_id, ?shape, error = %e, "send failed");
                }
            }
        }
        None
    }

    /// Send one prompt and return the reply text, driving the bounded
    /// escalation: resend once on the same session, then twice more on
    /// fresh sessions. `None` means every attempt came back empty; callers
    /// surface [`APOLOGY`] to the user.
    pub async fn ask(&mut self, prompt: &str) -> Option<String> {
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt >= RECREATE_FROM_ATTEMPT {
                info!(attempt, "recreating backend session before resend");
                if let Err(e) = self.bind_session(true).await {
                    warn!(attempt, error = %e, "session recreation failed");
                    continue;
                }
            }

            if let Some(text) = self.send_once(prompt).await {
                return Some(text);
            }
            debug!(attempt, "no text produced");
        }

        warn!(attempts = MAX_ATTEMPTS, "backend produced no text; giving up");
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted backend: pops one outcome per wire-level send and counts
    /// every call it receives.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<SendOutcome, ChatError>>>,
        auth_calls: Mutex<u32>,
        open_calls: Mutex<Vec<bool>>,
        close_calls: Mutex<Vec<String>>,
        send_shapes: Mutex<Vec<WireShape>>,
        next_session: Mutex<u32>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<SendOutcome, ChatError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                auth_calls: Mutex::new(0),
                open_calls: Mutex::new(Vec::new()),
                close_calls: Mutex::new(Vec::new()),
                send_shapes: Mutex::new(Vec::new()),
                next_session: Mutex::new(0),
            }
        }

        /// A script where the first `empty_sends` wire-level sends return
        /// empty text and the next one returns `reply`.
        fn empty_then(empty_sends: usize, reply: &str) -> Self {
            let mut script: Vec<Result<SendOutcome, ChatError>> = (0..empty_sends)
                .map(|_| Ok(SendOutcome::Reply(String::new())))
                .collect();
            script.push(Ok(SendOutcome::Reply(reply.to_string())));
            Self::new(script)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn authenticate(&self, _username: &str, _secret: &str) -> Result<String, ChatError> {
            *self.auth_calls.lock().unwrap() += 1;
            Ok("token-1".to_string())
        }

        async fn open_session(
            &self,
            _token: &str,
            _user_id: &str,
            force_new: bool,
        ) -> Result<String, ChatError> {
            self.open_calls.lock().unwrap().push(force_new);
            let mut next = self.next_session.lock().unwrap();
            *next += 1;
            Ok(format!("session-{next}"))
        }

        async fn send(
            &self,
            _token: &str,
            _session_id: &str,
            _user_id: &str,
            _message: &str,
            shape: WireShape,
        ) -> Result<SendOutcome, ChatError> {
            self.send_shapes.lock().unwrap().push(shape);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(SendOutcome::Reply(String::new())))
        }

        async fn close_session(
            &self,
            _token: &str,
            _user_id: &str,
            session_id: &str,
        ) -> Result<(), ChatError> {
            self.close_calls.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    fn client_over(backend: ScriptedBackend) -> (ChatClient, &'static ScriptedBackend) {
        // Leak the backend so the test can inspect counters after the
        // client takes ownership of the boxed trait object.
        let backend: &'static ScriptedBackend = Box::leak(Box::new(backend));
        let client = ChatClient::new(
            Box::new(BackendRef(backend)),
            "lead-3",
            "assistant",
            "secret",
        );
        (client, backend)
    }

    /// Forwarding wrapper so the leaked backend can be shared with the test.
    struct BackendRef(&'static ScriptedBackend);

    #[async_trait]
    impl ChatBackend for BackendRef {
        async fn authenticate(&self, u: &str, s: &str) -> Result<String, ChatError> {
            self.0.authenticate(u, s).await
        }
        async fn open_session(
            &self,
            t: &str,
            u: &str,
            f: bool,
        ) -> Result<String, ChatError> {
            self.0.open_session(t, u, f).await
        }
        async fn send(
            &self,
            t: &str,
            s: &str,
            u: &str,
            m: &str,
            shape: WireShape,
        ) -> Result<SendOutcome, ChatError> {
            self.0.send(t, s, u, m, shape).await
        }
        async fn close_session(&self, t: &str, u: &str, s: &str) -> Result<(), ChatError> {
            self.0.close_session(t, u, s).await
        }
    }

    #[tokio::test]
    async fn first_attempt_reply_wins() {
        let (mut client, backend) =
            client_over(ScriptedBackend::new(vec![Ok(SendOutcome::Reply("hi".into()))]));

        let reply = client.ask("hello").await;
        assert_eq!(reply.as_deref(), Some("hi"));

        // One auth, one session, one wire send (minimal shape only).
        assert_eq!(*backend.auth_calls.lock().unwrap(), 1);
        assert_eq!(backend.open_calls.lock().unwrap().as_slice(), &[false]);
        assert_eq!(
            backend.send_shapes.lock().unwrap().as_slice(),
            &[WireShape::Minimal]
        );
    }

    #[tokio::test]
    async fn legacy_shape_covers_rejected_minimal() {
        let (mut client, backend) = client_over(ScriptedBackend::new(vec![
            Ok(SendOutcome::Rejected),
            Ok(SendOutcome::Reply("via legacy".into())),
        ]));

        let reply = client.ask("hello").await;
        assert_eq!(reply.as_deref(), Some("via legacy"));
        assert_eq!(
            backend.send_shapes.lock().unwrap().as_slice(),
            &[WireShape::Minimal, WireShape::Legacy]
        );
    }

    #[tokio::test]
    async fn second_attempt_reuses_session() {
        // Attempt 1 (both shapes) empty, attempt 2 succeeds on the minimal
        // shape -- still on the same backend session.
        let (mut client, backend) = client_over(ScriptedBackend::empty_then(2, "late reply"));

        let reply = client.ask("hello").await;
        assert_eq!(reply.as_deref(), Some("late reply"));
        assert_eq!(backend.open_calls.lock().unwrap().as_slice(), &[false]);
        assert!(backend.close_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn third_attempt_recreates_session() {
        // Attempts 1 and 2 (four wire sends) empty; attempt 3 succeeds
        // after a close + force-new open.
        let (mut client, backend) = client_over(ScriptedBackend::empty_then(4, "fresh session"));

        let reply = client.ask("hello").await;
        assert_eq!(reply.as_deref(), Some("fresh session"));
        assert_eq!(backend.open_calls.lock().unwrap().as_slice(), &[false, true]);
        assert_eq!(
            backend.close_calls.lock().unwrap().as_slice(),
            &["session-1".to_string()]
        );
        assert_eq!(client.session_id(), Some("session-2"));
    }

    #[tokio::test]
    async fn all_attempts_dry_yields_none() {
        let (mut client, backend) = client_over(ScriptedBackend::new(vec![]));

        let reply = client.ask("hello").await;
        assert_eq!(reply, None);

        // 4 attempts x 2 shapes.
        assert_eq!(backend.send_shapes.lock().unwrap().len(), 8);
        // Sessions recreated before attempts 3 and 4.
        assert_eq!(
            backend.open_calls.lock().unwrap().as_slice(),
            &[false, true, true]
        );
        assert_eq!(backend.close_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn auth_is_cached_across_asks() {
        let (mut client, backend) = client_over(ScriptedBackend::new(vec![
            Ok(SendOutcome::Reply("one".into())),
            Ok(SendOutcome::Reply("two".into())),
        ]));

        assert_eq!(client.ask("first").await.as_deref(), Some("one"));
        assert_eq!(client.ask("second").await.as_deref(), Some("two"));
        assert_eq!(*backend.auth_calls.lock().unwrap(), 1);
        assert_eq!(backend.open_calls.lock().unwrap().as_slice(), &[false]);
    }

    #[tokio::test]
    async fn transport_errors_do_not_escape() {
        let (mut client, _backend) = client_over(ScriptedBackend::new(vec![
            Err(ChatError::Transport("socket closed".into())),
            Err(ChatError::Transport("socket closed".into())),
            Ok(SendOutcome::Reply("recovered".into())),
        ]));

        // First attempt errors on both shapes; second attempt recovers.
        let reply = client.ask("hello").await;
        assert_eq!(reply.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn forced_bind_closes_previous_session() {
        let (mut client, backend) =
            client_over(ScriptedBackend::new(vec![Ok(SendOutcome::Reply("x".into()))]));

        client.bind_session(true).await.unwrap();
        client.bind_session(true).await.unwrap();

        // No prior session on the first force-new, one close on the second.
        assert_eq!(backend.close_calls.lock().unwrap().len(), 1);
        assert_eq!(backend.open_calls.lock().unwrap().as_slice(), &[true, true]);
    }
}
