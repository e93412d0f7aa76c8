//! Provider Client: pulls new EDI documents from the upstream provider.
//!
//! A fetch returns a [`FetchCycle`]: a lazy, finite stream of documents
//! plus the marker to store once the whole stream has been consumed.
//! Restarting is done across cycles through the marker, never mid-stream.

pub mod client;
pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use futures_util::stream::BoxStream;

use crate::document::RawDocument;

pub use client::ProviderClient;
pub use error::ProviderError;

/// Storage key of the provider marker.
pub const MARKER_KEY: &str = "provider";

const MARKER_FORMAT: &str = "%Y-%m-%d";

/// Document date range requested in one cycle, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl FetchWindow {
    /// `[marker - lookback_days, today]`. Without a usable marker the
    /// window starts `lookback_days` before today.
    pub fn new(marker: Option<&str>, today: NaiveDate, lookback_days: u32) -> Self {
        let start = marker
            .and_then(|m| NaiveDate::parse_from_str(m.trim(), MARKER_FORMAT).ok())
            .map_or(today, |date| date.min(today));
        let from = start
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        Self { from, to: today }
    }

    /// Marker that the next cycle starts from.
    pub fn next_marker(&self) -> String {
        self.to.format(MARKER_FORMAT).to_string()
    }

    pub fn from_param(&self) -> String {
        self.from.format(MARKER_FORMAT).to_string()
    }

    pub fn to_param(&self) -> String {
        self.to.format(MARKER_FORMAT).to_string()
    }
}

/// Sends the provider's "received" acknowledgement for stored documents.
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    async fn mark_received(&self, document: &RawDocument) -> Result<(), ProviderError>;
}

/// Acknowledges stored documents within one cycle's session. A no-op
/// when acknowledgements are disabled.
#[derive(Clone, Default)]
pub struct Receipts(Option<Arc<dyn ReceiptSink>>);

impl Receipts {
    pub fn new(sink: Arc<dyn ReceiptSink>) -> Self {
        Self(Some(sink))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    pub async fn mark_received(&self, document: &RawDocument) -> Result<(), ProviderError> {
        match &self.0 {
            Some(sink) => sink.mark_received(document).await,
            None => Ok(()),
        }
    }
}

/// One polling cycle's worth of documents.
///
/// The document stream is `Send` but not `Sync`; callers take the cycle
/// apart rather than borrowing it across awaits.
pub struct FetchCycle {
    /// Ends after the last document or at the first error.
    pub documents: BoxStream<'static, Result<RawDocument, ProviderError>>,
    pub next_marker: String,
    pub receipts: Receipts,
}

impl FetchCycle {
    pub fn new(
        documents: BoxStream<'static, Result<RawDocument, ProviderError>>,
        next_marker: String,
    ) -> Self {
        Self {
            documents,
            next_marker,
            receipts: Receipts::default(),
        }
    }

    pub fn with_receipts(mut self, receipts: Arc<dyn ReceiptSink>) -> Self {
        self.receipts = Receipts::new(receipts);
        self
    }
}

/// Where the Poller gets documents from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Starts a cycle covering everything since `marker`, as of `today`.
    async fn fetch_new_documents(
        &self,
        marker: Option<&str>,
        today: NaiveDate,
    ) -> Result<FetchCycle, ProviderError>;
}
