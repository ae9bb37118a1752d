//! Operator notification: the SMS gateway behind escalations.
//!
//! The gateway sits behind [`Notifier`] so tool tests can count sends
//! without a network. Failures never propagate past the tool boundary; the
//! dispatcher turns them into a generic send-failure result.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Failure while delivering a notification.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Outbound operator notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> Result<(), NotifyError>;
}

// Compile-time assertion: Notifier must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Notifier) {}
};

/// Credentials and endpoints for the SMS platform.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Platform base URL, e.g. `https://platform.example.com`.
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// JWT credential used for the token grant.
    pub jwt: String,
    /// The SMS-capable number messages are sent from.
    pub from_number: String,
}

/// SMS gateway over the platform's REST API.
///
/// The bearer token is fetched lazily and refreshed once when a send comes
/// back unauthorized.
pub struct SmsGateway {
    config: SmsConfig,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl SmsGateway {
    pub fn new(config: SmsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    async fn login(&self) -> Result<String, NotifyError> {
        let response = self
            .http
            .post(format!("{}/restapi/oauth/token", self.config.base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", self.config.jwt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NotifyError(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(NotifyError(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NotifyError(format!("token response unreadable: {e}")))?;
        body.get("access_token")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .ok_or_else(|| NotifyError("no access_token in response".to_string()))
    }

    async fn bearer(&self, refresh: bool) -> Result<String, NotifyError> {
        let mut token = self.token.lock().await;
        if refresh || token.is_none() {
            *token = Some(self.login().await?);
        }
        Ok(token.clone().unwrap_or_default())
    }

    async fn post_sms(&self, bearer: &str, to: &str, text: &str) -> Result<reqwest::StatusCode, NotifyError> {
        let response = self
            .http
            .post(format!(
                "{}/restapi/v1.0/account/~/extension/~/sms",
                self.config.base_url
            ))
            .bearer_auth(bearer)
            .json(&json!({
                "from": {"phoneNumber": self.config.from_number},
                "to": [{"phoneNumber": to}],
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| NotifyError(format!("sms request failed: {e}")))?;
        Ok(response.status())
    }
}

#[async_trait]
impl Notifier for SmsGateway {
    async fn send(&self, to: &str, text: &str) -> Result<(), NotifyError> {
        let bearer = self.bearer(false).await?;
        let status = self.post_sms(&bearer, to, text).await?;

        let status = if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("sms send unauthorized; refreshing token and retrying once");
            let bearer = self.bearer(true).await?;
            self.post_sms(&bearer, to, text).await?
        } else {
            status
        };

        if status.is_success() {
            info!(to = %to, chars = text.len(), "escalation SMS sent");
            Ok(())
        } else {
            Err(NotifyError(format!("sms endpoint returned {status}")))
        }
    }
}
