//! Production adapter for the hosted conversational backend.
//!
//! Authentication and session binding are plain HTTPS calls; each send
//! opens a WebSocket, writes one JSON payload, and collects streamed frames
//! until the end marker or the socket closes.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{ChatBackend, ChatError, END_MARKER, SendOutcome, WireShape};

/// Wall-clock budget for HTTP calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
/// Wall-clock budget for collecting one streamed reply.
const STREAM_TIMEOUT: Duration = Duration::from_secs(45);

/// Endpoints and credentials for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base HTTPS URL, e.g. `https://assistant.example.com`.
    pub base_url: String,
    /// Base WSS URL, e.g. `wss://assistant.example.com`.
    pub ws_url: String,
}

impl BackendConfig {
    fn auth_endpoint(&self) -> String {
        format!("{}/api/v1/user", self.base_url)
    }

    fn session_endpoint(&self, user_id: &str, force_new: bool) -> String {
        let mut url = format!("{}/api/v1/get_session/{}", self.base_url, user_id);
        if force_new {
            url.push_str("?new=true");
        }
        url
    }

    fn close_endpoint(&self, user_id: &str, session_id: &str) -> String {
        format!(
            "{}/api/v1/close_session/{}/{}",
            self.base_url, user_id, session_id
        )
    }

    fn stream_endpoint(&self, token: &str) -> String {
        format!("{}/api/v1/stream?token={}", self.ws_url, token)
    }
}

/// [`ChatBackend`] implementation over the hosted service.
pub struct RemoteBackend {
    config: BackendConfig,
    http: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(config: BackendConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Serialize the outgoing message in the requested wire shape.
    fn payload(shape: WireShape, user_id: &str, session_id: &str, message: &str) -> String {
        let value = match shape {
            WireShape::Minimal => json!({
                "user_id": user_id,
                "session_id": session_id,
                "message": message,
            }),
            // The stub car object is a historical server requirement; the
            // values are placeholders the backend ignores.
            WireShape::Legacy => json!({
                "action": "create",
                "message": message,
                "user_id": user_id,
                "session_id": session_id,
                "car": {
                    "vin": "",
                    "year": -1,
                    "make": "",
                    "model": "",
                    "trim": "",
                    "mileage": -1,
                    "condition": 0,
                    "color": "blue",
                    "region": "WC",
                },
            }),
        };
        value.to_string()
    }
}

/// Fold one streamed frame into the accumulated reply. Returns the
/// resulting control decision for the read loop.
enum FrameStep {
    Continue,
    Done,
    Rejected,
}

fn accept_frame(chunks: &mut Vec<String>, frame: &str) -> FrameStep {
    if frame.trim().to_lowercase().starts_with("bad request") {
        return FrameStep::Rejected;
    }
    match serde_json::from_str::<serde_json::Value>(frame) {
        Ok(value) => {
            if value.get("response").and_then(|v| v.as_str()) == Some(END_MARKER) {
                return FrameStep::Done;
            }
            if let Some(text) = value.get("text") {
                match text {
                    serde_json::Value::String(s) => chunks.push(s.clone()),
                    other => chunks.push(other.to_string()),
                }
            }
            FrameStep::Continue
        }
        // Non-JSON frames are taken verbatim.
        Err(_) => {
            chunks.push(frame.to_string());
            FrameStep::Continue
        }
    }
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<String, ChatError> {
        let response = self
            .http
            .post(self.config.auth_endpoint())
            .json(&json!({"username": username, "password": secret}))
            .send()
            .await
            .map_err(|e| ChatError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Auth(format!(
                "auth endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Auth(e.to_string()))?;
        body.get("authorization")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ChatError::Auth("no authorization field in response".to_string()))
    }

    async fn open_session(
        &self,
        token: &str,
        user_id: &str,
        force_new: bool,
    ) -> Result<String, ChatError> {
        let response = self
            .http
            .get(self.config.session_endpoint(user_id, force_new))
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| ChatError::Session(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Session(format!(
                "session endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Session(e.to_string()))?;
        // The id may arrive as a string or a number; keep it as a string.
        match body.get("id") {
            Some(serde_json::Value::String(id)) => Ok(id.clone()),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(ChatError::Session("no id field in response".to_string())),
        }
    }

    async fn send(
        &self,
        token: &str,
        session_id: &str,
        user_id: &str,
        message: &str,
        shape: WireShape,
    ) -> Result<SendOutcome, ChatError> {
        let url = self.config.stream_endpoint(token);
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        debug!(session = %session_id, ?shape, chars = message.len(), "sending message");
        ws.send(Message::Text(
            Self::payload(shape, user_id, session_id, message).into(),
        ))
        .await
        .map_err(|e| ChatError::Transport(e.to_string()))?;

        let mut chunks: Vec<String> = Vec::new();
        let mut rejected = false;

        let read = async {
            while let Some(frame) = ws.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "stream read error");
                        break;
                    }
                };
                if text.is_empty() {
                    break;
                }
                match accept_frame(&mut chunks, &text) {
                    FrameStep::Continue => {}
                    FrameStep::Done => break,
                    FrameStep::Rejected => {
                        rejected = true;
                        break;
                    }
                }
            }
        };

        // A stalled stream is not an error; whatever was collected (usually
        // nothing) feeds the caller's retry escalation.
        if tokio::time::timeout(STREAM_TIMEOUT, read).await.is_err() {
            warn!(session = %session_id, "stream timed out");
        }
        let _ = ws.close(None).await;

        if rejected {
            return Ok(SendOutcome::Rejected);
        }
        Ok(SendOutcome::Reply(chunks.concat().trim().to_string()))
    }

    async fn close_session(
        &self,
        token: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), ChatError> {
        let response = self
            .http
            .post(self.config.close_endpoint(user_id, session_id))
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| ChatError::Session(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Session(format!(
                "close endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig {
            base_url: "https://assistant.example.com".to_string(),
            ws_url: "wss://assistant.example.com".to_string(),
        }
    }

    #[test]
    fn endpoints_are_assembled() {
        let cfg = config();
        assert_eq!(cfg.auth_endpoint(), "https://assistant.example.com/api/v1/user");
        assert_eq!(
            cfg.session_endpoint("lead-3", true),
            "https://assistant.example.com/api/v1/get_session/lead-3?new=true"
        );
        assert_eq!(
            cfg.session_endpoint("lead-3", false),
            "https://assistant.example.com/api/v1/get_session/lead-3"
        );
        assert_eq!(
            cfg.stream_endpoint("tok"),
            "wss://assistant.example.com/api/v1/stream?token=tok"
        );
    }

    #[test]
    fn minimal_payload_shape() {
        let payload = RemoteBackend::payload(WireShape::Minimal, "lead-3", "s-1", "hello");
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["user_id"], "lead-3");
        assert_eq!(value["session_id"], "s-1");
        assert_eq!(value["message"], "hello");
        assert!(value.get("car").is_none());
    }

    #[test]
    fn legacy_payload_carries_stub_car() {
        let payload = RemoteBackend::payload(WireShape::Legacy, "lead-3", "s-1", "hello");
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["action"], "create");
        assert_eq!(value["car"]["year"], -1);
        assert_eq!(value["car"]["region"], "WC");
    }

    #[test]
    fn frames_accumulate_until_end_marker() {
        let mut chunks = Vec::new();
        assert!(matches!(
            accept_frame(&mut chunks, r#"{"text":"Hel"}"#),
            FrameStep::Continue
        ));
        assert!(matches!(
            accept_frame(&mut chunks, r#"{"text":"lo"}"#),
            FrameStep::Continue
        ));
        assert!(matches!(
            accept_frame(&mut chunks, r#"{"response":"<<END_OF_RESPONSE>>"}"#),
            FrameStep::Done
        ));
        assert_eq!(chunks.concat(), "Hello");
    }

    #[test]
    fn bad_request_frame_rejects() {
        let mut chunks = Vec::new();
        assert!(matches!(
            accept_frame(&mut chunks, "Bad Request: missing car"),
            FrameStep::Rejected
        ));
        assert!(chunks.is_empty());
    }

    #[test]
    fn non_json_frames_are_taken_verbatim() {
        let mut chunks = Vec::new();
        assert!(matches!(
            accept_frame(&mut chunks, "plain words"),
            FrameStep::Continue
        ));
        assert_eq!(chunks, vec!["plain words".to_string()]);
    }
}
