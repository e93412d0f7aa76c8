//! HTTP client for the ERP import endpoint.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::ErpSettings;
use crate::document::DocumentType;
use crate::error::ConfigError;
use crate::secrets::SecretError;

/// Longest ERP response body kept on a queue entry.
pub const MAX_RESPONSE_BODY_CHARS: usize = 2000;

const DOCUMENT_TYPE_HEADER: &str = "X-Document-Type";

#[derive(Error, Debug)]
pub enum ErpError {
    #[error("ERP settings unavailable: {0}")]
    Settings(#[from] ConfigError),

    #[error("ERP password unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("ERP request timed out: {0}")]
    Timeout(String),

    #[error("ERP unreachable: {0}")]
    Transport(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ErpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ErpError::Timeout(e.to_string())
        } else {
            ErpError::Transport(e.to_string())
        }
    }
}

/// A rendered document ready to post.
#[derive(Debug, Clone, Copy)]
pub struct ErpRequest<'a> {
    pub body: &'a str,
    pub content_type: &'a str,
    pub doc_type: DocumentType,
    pub idempotency_key: &'a str,
}

/// What the ERP said about a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted {
        status: u16,
        body: String,
    },
    Rejected {
        status: u16,
        body: String,
        reason: String,
        /// The ERP will never accept this document as is.
        permanent: bool,
    },
}

/// Posts rendered documents to the ERP. Settings are passed per call.
pub struct ErpClient;

impl ErpClient {
    pub fn new() -> Self {
        Self
    }

    fn http_client(settings: &ErpSettings) -> Result<Client, ErpError> {
        Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ErpError::Client(e.to_string()))
    }

    pub async fn deliver(
        &self,
        settings: &ErpSettings,
        request: &ErpRequest<'_>,
    ) -> Result<DeliveryOutcome, ErpError> {
        let client = Self::http_client(settings)?;

        let mut builder = client
            .post(&settings.url)
            .header(CONTENT_TYPE, request.content_type)
            .header(DOCUMENT_TYPE_HEADER, request.doc_type.code())
            .body(request.body.to_string());
        if let Some(header) = settings.idempotency_header.as_deref() {
            builder = builder.header(header, request.idempotency_key);
        }
        if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            let password = settings.password.resolve_optional()?;
            builder = builder.basic_auth(
                username,
                password.as_ref().map(|p| p.expose_secret().to_string()),
            );
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = truncate(&text);

        if !response_is_success(status) {
            return Ok(DeliveryOutcome::Rejected {
                status,
                reason: format!("HTTP {}", status),
                permanent: settings.is_permanent_rejection(status),
                body,
            });
        }

        if let Some(pattern) = settings.rejection_regex()? {
            if pattern.is_match(&text) {
                return Ok(DeliveryOutcome::Rejected {
                    status,
                    reason: format!("business rejection (HTTP {})", status),
                    permanent: false,
                    body,
                });
            }
        }

        Ok(DeliveryOutcome::Accepted { status, body })
    }

    /// Sends a `HEAD` to the endpoint. Any HTTP answer counts as reachable.
    pub async fn check_reachable(&self, settings: &ErpSettings) -> Result<u16, ErpError> {
        let client = Self::http_client(settings)?;
        let response = client.head(&settings.url).send().await?;
        Ok(response.status().as_u16())
    }
}

impl Default for ErpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn response_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Cuts a response body to what is stored with the entry.
pub fn truncate(body: &str) -> String {
    body.chars().take(MAX_RESPONSE_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_settings_from_str;
    use wiremock::matchers::{basic_auth, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, extra: &str) -> ErpSettings {
        let yaml = format!(
            r#"
provider:
  baseUrl: https://edi.example.com
  username: gateway
  password: secret
erp:
  url: {}/import
  permanentRejectionStatuses: [422]
{}"#,
            server.uri(),
            extra
        );
        load_settings_from_str(&yaml).unwrap().erp
    }

    fn request() -> ErpRequest<'static> {
        ErpRequest {
            body: "<Document/>",
            content_type: "application/xml; charset=utf-8",
            doc_type: DocumentType::Order,
            idempotency_key: "ORDER:PO-123",
        }
    }

    #[tokio::test]
    async fn test_accepted_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/import"))
            .and(header("Content-Type", "application/xml; charset=utf-8"))
            .and(header("X-Document-Type", "ORDER"))
            .and(header("Idempotency-Key", "ORDER:PO-123"))
            .and(basic_auth("erp", "pw"))
            .and(body_string("<Document/>"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let settings = settings(
            &server,
            "  username: erp\n  password: pw\n  idempotencyHeader: Idempotency-Key\n",
        );
        let outcome = ErpClient::new().deliver(&settings, &request()).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Accepted {
                status: 200,
                body: "OK".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_non_2xx_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let outcome = ErpClient::new()
            .deliver(&settings(&server, ""), &request())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected {
                status: 500,
                permanent: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_configured_status_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let outcome = ErpClient::new()
            .deliver(&settings(&server, ""), &request())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected {
                status: 422,
                permanent: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_business_rejection_in_2xx_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Result>ERROR: unknown GLN</Result>"))
            .mount(&server)
            .await;

        let settings = settings(&server, "  rejectionPattern: \"ERROR\"\n");
        let outcome = ErpClient::new().deliver(&settings, &request()).await.unwrap();
        assert!(matches!(
            outcome,
            DeliveryOutcome::Rejected {
                status: 200,
                permanent: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(3)))
            .mount(&server)
            .await;

        let settings = settings(&server, "  timeoutSecs: 1\n");
        let err = ErpClient::new().deliver(&settings, &request()).await.unwrap_err();
        assert!(matches!(err, ErpError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_long_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
            .mount(&server)
            .await;

        let outcome = ErpClient::new()
            .deliver(&settings(&server, ""), &request())
            .await
            .unwrap();
        let DeliveryOutcome::Accepted { body, .. } = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(body.len(), MAX_RESPONSE_BODY_CHARS);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let settings = ErpSettings {
            url: "http://127.0.0.1:9/import".to_string(),
            ..settings(&MockServer::start().await, "")
        };
        let err = ErpClient::new().deliver(&settings, &request()).await.unwrap_err();
        assert!(matches!(err, ErpError::Transport(_) | ErpError::Timeout(_)));
    }
}
