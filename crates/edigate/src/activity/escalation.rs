//! External escalation of critical activity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use thiserror::Error;

use super::{ActivityRefs, Component};
use crate::config::SettingsProvider;
use crate::error::ConfigError;
use crate::secrets::SecretError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const ESCALATION_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("settings unavailable: {0}")]
    Settings(#[from] ConfigError),

    #[error("bot token unavailable: {0}")]
    Token(#[from] SecretError),

    #[error("request failed: {0}")]
    Http(String),

    #[error("channel rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A critical event to pass on to a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub component: Component,
    pub message: String,
    pub refs: ActivityRefs,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn text(&self) -> String {
        let mut text = format!(
            "edigate CRITICAL [{}] {}",
            self.component, self.message
        );
        if let Some(id) = self.refs.document_id {
            text.push_str(&format!("\ndocument: {}", id));
        }
        if let Some(id) = self.refs.queue_entry_id {
            text.push_str(&format!("\nqueue entry: {}", id));
        }
        text.push_str(&format!("\nat: {}", self.at.to_rfc3339()));
        text
    }
}

/// Destination for critical alerts. One call per alert; no retries.
#[async_trait]
pub trait Escalator: Send + Sync {
    async fn escalate(&self, alert: &Alert) -> Result<(), EscalationError>;
}

/// Drops every alert.
pub struct NoopEscalator;

#[async_trait]
impl Escalator for NoopEscalator {
    async fn escalate(&self, alert: &Alert) -> Result<(), EscalationError> {
        log::debug!("Escalation disabled, {} alert dropped", alert.component);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends alerts through a Telegram bot.
///
/// Settings are read per alert. Without an `escalation.telegram` section
/// alerts are dropped, as with [`NoopEscalator`].
pub struct TelegramEscalator {
    client: Client,
    settings: Arc<dyn SettingsProvider>,
    api_base: String,
}

impl TelegramEscalator {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Result<Self, EscalationError> {
        Self::with_api_base(settings, TELEGRAM_API_BASE)
    }

    /// Uses another Bot API host, e.g. a local mock.
    pub fn with_api_base(
        settings: Arc<dyn SettingsProvider>,
        api_base: impl Into<String>,
    ) -> Result<Self, EscalationError> {
        let client = Client::builder()
            .timeout(ESCALATION_TIMEOUT)
            .build()
            .map_err(|e| EscalationError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            settings,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Escalator for TelegramEscalator {
    async fn escalate(&self, alert: &Alert) -> Result<(), EscalationError> {
        let settings = self.settings.current()?;
        let Some(telegram) = settings.escalation.telegram else {
            log::debug!("No escalation channel configured, alert dropped");
            return Ok(());
        };
        let token = telegram.token()?;

        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            token.expose_secret()
        );
        let text = alert.text();
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &telegram.chat_id,
                text: &text,
            })
            .send()
            .await
            // The URL carries the bot token.
            .map_err(|e| EscalationError::Http(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EscalationError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
            });
        }

        log::info!("Escalation sent for {} alert", alert.component);
        Ok(())
    }
}
