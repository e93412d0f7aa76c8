use thiserror::Error;

use crate::document::ExtractError;
use crate::error::ConfigError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider settings unavailable: {0}")]
    Settings(#[from] ConfigError),

    #[error("Provider password unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("Request to provider timed out: {0}")]
    Timeout(String),

    #[error("Provider unreachable: {0}")]
    Network(String),

    #[error("Provider authentication failed: {0}")]
    Authentication(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Transient failures that the next cycle may not see again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ProviderError::Authentication(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl From<ExtractError> for ProviderError {
    fn from(e: ExtractError) -> Self {
        ProviderError::Malformed(e.to_string())
    }
}
