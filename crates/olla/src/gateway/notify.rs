use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::{MailRelayConfig, NotifierConfig, TwilioConfig};

/// Outbound notification failure. Logged by the caller, never propagated to enforcement.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("{channel} channel is not configured")]
    NotConfigured { channel: &'static str },
    #[error("{channel} transport failed: {reason}")]
    Transport {
        channel: &'static str,
        reason: String,
    },
}

impl NotificationError {
    /// Whether repeating the send could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotificationError::Transport { .. })
    }
}

/// Email and SMS primitives used to escalate bypass alerts to operators.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), NotificationError>;

    /// `recipient` is an E.164 phone number.
    async fn send_sms(&self, body: &str, recipient: &str) -> Result<(), NotificationError>;
}

/// Email through an HTTP mail relay, SMS through the Twilio REST API.
/// A channel without credentials answers `NotConfigured`.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    mail: Option<MailRelayConfig>,
    sms: Option<TwilioConfig>,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| NotificationError::Transport {
                channel: "http",
                reason: format!("failed to build HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            mail: config.mail_relay.clone(),
            sms: config.twilio.clone(),
        })
    }
}

async fn expect_success(
    response: Result<reqwest::Response, reqwest::Error>,
    channel: &'static str,
) -> Result<(), NotificationError> {
    let response = response.map_err(|err| NotificationError::Transport {
        channel,
        reason: err.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotificationError::Transport {
        channel,
        reason: format!("HTTP {status}: {body}"),
    })
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<(), NotificationError> {
        let mail = self
            .mail
            .as_ref()
            .ok_or(NotificationError::NotConfigured { channel: "email" })?;

        let mut request = self.client.post(&mail.url).json(&json!({
            "from": mail.from,
            "to": recipients,
            "subject": subject,
            "text": body,
        }));
        if let Some(token) = &mail.token {
            request = request.bearer_auth(token);
        }

        expect_success(request.send().await, "email").await
    }

    async fn send_sms(&self, body: &str, recipient: &str) -> Result<(), NotificationError> {
        let sms = self
            .sms
            .as_ref()
            .ok_or(NotificationError::NotConfigured { channel: "sms" })?;

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            sms.api_base.trim_end_matches('/'),
            sms.account_sid
        );
        let request = self
            .client
            .post(url)
            .basic_auth(&sms.account_sid, Some(&sms.auth_token))
            .form(&[("To", recipient), ("From", sms.from.as_str()), ("Body", body)]);

        expect_success(request.send().await, "sms").await
    }
}
