//! Connection settings: endpoints and credentials for the provider, the
//! ERP and the escalation channel.
//!
//! These are owned by an external editor and may change while the gateway
//! runs. Components ask a [`SettingsProvider`] for a fresh copy at the
//! start of every operation and drop it when the operation ends.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::loader::load_settings_from_str;
use crate::error::ConfigError;
use crate::secrets::{has_secret_source, resolve_secret, SecretError, SecretSource};

/// Slack added to the ERP timeout before an in-flight attempt is
/// considered abandoned by its worker.
const STALE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    pub provider: ProviderSettings,
    pub erp: ErpSettings,
    #[serde(default)]
    pub escalation: EscalationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub base_url: String,
    pub username: String,
    #[serde(flatten)]
    pub password: SecretSource,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Days before the stored marker that each cycle asks for again.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Tell the provider a document was received once it is stored.
    #[serde(default = "default_true")]
    pub mark_received: bool,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpSettings {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(flatten)]
    pub password: SecretSource,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempt ceiling; the entry is abandoned when it is reached.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// HTTP statuses the ERP will never accept on retry.
    #[serde(default)]
    pub permanent_rejection_statuses: Vec<u16>,
    /// Matched against 2xx bodies; a match is a business rejection.
    #[serde(default)]
    pub rejection_pattern: Option<String>,
    /// Header that carries the document's idempotency key.
    #[serde(default)]
    pub idempotency_header: Option<String>,
}

impl ErpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Age after which an `in_flight` entry cannot still have a live attempt.
    pub fn stale_after(&self) -> Duration {
        self.timeout() + STALE_MARGIN
    }

    pub fn rejection_regex(&self) -> Result<Option<Regex>, ConfigError> {
        self.rejection_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    name: "erp.rejectionPattern".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn is_permanent_rejection(&self, status: u16) -> bool {
        self.permanent_rejection_statuses.contains(&status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationSettings {
    #[serde(default)]
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token_env_var: Option<String>,
    pub chat_id: String,
}

impl TelegramSettings {
    pub fn token(&self) -> Result<SecretString, SecretError> {
        resolve_secret(
            self.bot_token.as_deref(),
            self.bot_token_file.as_deref(),
            self.bot_token_env_var.as_deref(),
        )
    }

    fn has_token(&self) -> bool {
        has_secret_source(
            self.bot_token.as_deref(),
            self.bot_token_file.as_deref(),
            self.bot_token_env_var.as_deref(),
        )
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_lookback_days() -> u32 {
    7
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl ConnectionSettings {
    /// Checks values serde cannot: ranges, URLs and patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Validation {
            message: message.to_string(),
        };

        if !is_http_url(&self.provider.base_url) {
            return Err(invalid("provider.baseUrl must be an http(s) URL"));
        }
        if self.provider.username.trim().is_empty() {
            return Err(invalid("provider.username must not be empty"));
        }
        if self.provider.page_size == 0 {
            return Err(invalid("provider.pageSize must be at least 1"));
        }
        if self.provider.timeout_secs == 0 || self.erp.timeout_secs == 0 {
            return Err(invalid("timeoutSecs must be at least 1"));
        }
        if !is_http_url(&self.erp.url) {
            return Err(invalid("erp.url must be an http(s) URL"));
        }
        if self.erp.max_attempts == 0 {
            return Err(invalid("erp.maxAttempts must be at least 1"));
        }
        if let Some(header) = self.erp.idempotency_header.as_deref() {
            if reqwest::header::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(ConfigError::Validation {
                    message: format!("erp.idempotencyHeader '{}' is not a valid header name", header),
                });
            }
        }
        self.erp.rejection_regex()?;

        if let Some(telegram) = &self.escalation.telegram {
            if telegram.chat_id.trim().is_empty() {
                return Err(invalid("escalation.telegram.chatId must not be empty"));
            }
            if !telegram.has_token() {
                return Err(invalid("escalation.telegram needs a bot token source"));
            }
        }
        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    reqwest::Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Source of the current connection settings.
pub trait SettingsProvider: Send + Sync {
    /// Returns the settings as they are right now.
    fn current(&self) -> Result<ConnectionSettings, ConfigError>;
}

/// Reads the settings document from disk on every call.
pub struct FileSettingsProvider {
    path: PathBuf,
}

impl FileSettingsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SettingsProvider for FileSettingsProvider {
    fn current(&self) -> Result<ConnectionSettings, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        load_settings_from_str(&content)
    }
}

/// Serves settings held in memory; `replace` stands in for an edit.
pub struct StaticSettingsProvider {
    settings: Mutex<ConnectionSettings>,
}

impl StaticSettingsProvider {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn replace(&self, settings: ConnectionSettings) {
        let mut guard = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        *guard = settings;
    }
}

impl SettingsProvider for StaticSettingsProvider {
    fn current(&self) -> Result<ConnectionSettings, ConfigError> {
        let guard = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }
}
