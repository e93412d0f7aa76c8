//! HTTP client for the provider's document API.
//!
//! ```text
//! POST {base}/api/v1/auth                 {login, password} -> {token}
//! GET  {base}/api/v1/documents/folders/inbox/docGroup/EDI/docTypes/{TYPE}
//!        ?docDateFrom=&docDateTo=&page=&pageSize=
//! GET  {base}/api/v1/documents/folders/inbox/docGroup/EDI/docTypes/{TYPE}/document/{id}
//! POST {base}/api/v1/documents/{id}/receive
//! ```
//!
//! The token goes into `Authorization` as is, without a scheme.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{DocumentSource, FetchCycle, FetchWindow, ProviderError, ReceiptSink};
use crate::config::{ProviderSettings, SettingsProvider};
use crate::document::{DocumentType, RawDocument};

/// Longest response excerpt kept in an error.
const MAX_ERROR_BODY_LENGTH: usize = 300;

/// Provider client. Holds no credentials between cycles: settings are read
/// and a fresh session is opened for every fetch.
pub struct ProviderClient {
    settings: Arc<dyn SettingsProvider>,
}

impl ProviderClient {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self { settings }
    }

    fn open_session(&self) -> Result<Arc<Session>, ProviderError> {
        let settings = self.settings.current()?;
        Ok(Arc::new(Session::new(&settings.provider)?))
    }

    /// Authenticates and discards the token.
    pub async fn check_connection(&self) -> Result<(), ProviderError> {
        let session = self.open_session()?;
        session.authenticate().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for ProviderClient {
    async fn fetch_new_documents(
        &self,
        marker: Option<&str>,
        today: NaiveDate,
    ) -> Result<FetchCycle, ProviderError> {
        let session = self.open_session()?;
        let window = FetchWindow::new(marker, today, session.lookback_days);

        // Fail before any document is produced if the credentials are bad.
        session.token().await?;

        log::debug!(
            "Fetching provider documents from {} to {}",
            window.from,
            window.to
        );

        let pager = Pager::new(session.clone(), window);
        let documents = stream::try_unfold(pager, |mut pager| async move {
            Ok(pager.next().await?.map(|doc| (doc, pager)))
        })
        .boxed();

        let mut cycle = FetchCycle::new(documents, window.next_marker());
        if session.mark_received {
            cycle = cycle.with_receipts(session);
        }
        Ok(cycle)
    }
}

/// Credentials and token for one cycle.
struct Session {
    client: Client,
    base_url: String,
    username: String,
    password: SecretString,
    page_size: u32,
    lookback_days: u32,
    mark_received: bool,
    token: Mutex<Option<String>>,
}

impl Session {
    fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.resolve()?,
            page_size: settings.page_size,
            lookback_days: settings.lookback_days,
            mark_received: settings.mark_received,
            token: Mutex::new(None),
        })
    }

    fn inbox_url(&self, doc_type: DocumentType) -> String {
        format!(
            "{}/api/v1/documents/folders/inbox/docGroup/EDI/docTypes/{}",
            self.base_url,
            doc_type.code()
        )
    }

    async fn authenticate(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/v1/auth", self.base_url))
            .json(&json!({
                "login": self.username,
                "password": self.password.expose_secret(),
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Authentication(format!(
                "credentials rejected (HTTP {})",
                status.as_u16()
            )));
        }
        let body = read_json(check_status(response).await?).await?;

        ["token", "access_token", "accessToken"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Authentication("no token in auth response".to_string()))
    }

    async fn token(&self) -> Result<String, ProviderError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn reauthenticate(&self) -> Result<String, ProviderError> {
        let mut guard = self.token.lock().await;
        let token = self.authenticate().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Sends a request with the session token. On 401 the session
    /// authenticates again and retries exactly once.
    async fn send<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        log::info!("Provider token rejected, re-authenticating");
        let token = self.reauthenticate().await?;
        let response = build(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Authentication(
                "token rejected again after re-authentication".to_string(),
            ));
        }
        Ok(response)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let response = self
            .send(|token| {
                self.client
                    .get(url)
                    .query(query)
                    .header(AUTHORIZATION, token)
                    .header(ACCEPT, "application/json")
            })
            .await?;
        read_json(check_status(response).await?).await
    }

    async fn list_page(
        &self,
        doc_type: DocumentType,
        window: &FetchWindow,
        page: u32,
    ) -> Result<Page, ProviderError> {
        let body = self
            .get_json(
                &self.inbox_url(doc_type),
                &[
                    ("docDateFrom", window.from_param()),
                    ("docDateTo", window.to_param()),
                    ("page", page.to_string()),
                    ("pageSize", self.page_size.to_string()),
                ],
            )
            .await?;
        Page::parse(&body)
    }

    async fn fetch_document(
        &self,
        doc_type: DocumentType,
        id: &str,
    ) -> Result<RawDocument, ProviderError> {
        let url = format!("{}/document/{}", self.inbox_url(doc_type), id);
        let payload = self.get_json(&url, &[]).await?;
        if !payload.is_object() {
            return Err(ProviderError::Malformed(format!(
                "document {} body is not an object",
                id
            )));
        }
        Ok(RawDocument {
            provider_id: id.to_string(),
            doc_type,
            payload,
        })
    }
}

#[async_trait]
impl ReceiptSink for Session {
    async fn mark_received(&self, document: &RawDocument) -> Result<(), ProviderError> {
        let url = format!(
            "{}/api/v1/documents/{}/receive",
            self.base_url, document.provider_id
        );
        let response = self
            .send(|token| self.client.post(&url).header(AUTHORIZATION, token))
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// One page of a document listing.
struct Page {
    ids: Vec<String>,
    /// Items on the page, including ones without an identifier.
    len: usize,
    total: Option<u64>,
}

impl Page {
    fn parse(body: &Value) -> Result<Self, ProviderError> {
        let items = match body.get("items").or_else(|| body.get("documents")) {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => {
                return Err(ProviderError::Malformed(
                    "document list is not an array".to_string(),
                ))
            }
        };

        let ids = items
            .iter()
            .filter_map(|item| item.get("documentId").or_else(|| item.get("id")))
            .filter_map(|id| match id {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        let total = body
            .get("total")
            .or_else(|| body.get("totalCount"))
            .and_then(Value::as_u64);

        Ok(Self {
            ids,
            len: items.len(),
            total,
        })
    }
}

/// Walks every document type, page by page, yielding one body at a time.
struct Pager {
    session: Arc<Session>,
    window: FetchWindow,
    remaining_types: VecDeque<DocumentType>,
    current: Option<TypeCursor>,
}

struct TypeCursor {
    doc_type: DocumentType,
    next_page: u32,
    seen: u64,
    done: bool,
    pending: VecDeque<String>,
}

impl Pager {
    fn new(session: Arc<Session>, window: FetchWindow) -> Self {
        Self {
            session,
            window,
            remaining_types: DocumentType::ALL.into_iter().collect(),
            current: None,
        }
    }

    async fn next(&mut self) -> Result<Option<RawDocument>, ProviderError> {
        loop {
            if self.current.is_none() {
                let Some(doc_type) = self.remaining_types.pop_front() else {
                    return Ok(None);
                };
                self.current = Some(TypeCursor {
                    doc_type,
                    next_page: 1,
                    seen: 0,
                    done: false,
                    pending: VecDeque::new(),
                });
            }
            let Some(cursor) = self.current.as_mut() else {
                continue;
            };

            if let Some(id) = cursor.pending.pop_front() {
                let doc = self.session.fetch_document(cursor.doc_type, &id).await?;
                return Ok(Some(doc));
            }

            if cursor.done {
                self.current = None;
                continue;
            }

            let page = self
                .session
                .list_page(cursor.doc_type, &self.window, cursor.next_page)
                .await?;
            cursor.seen += page.len as u64;
            cursor.next_page += 1;
            cursor.done = page.len == 0
                || page.len < self.session.page_size as usize
                || page.total.is_some_and(|total| cursor.seen >= total);
            cursor.pending.extend(page.ids);
        }
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY_LENGTH).collect(),
    })
}

async fn read_json(response: Response) -> Result<Value, ProviderError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(format!("invalid JSON: {}", e)))
}
