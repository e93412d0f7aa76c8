//! Poller Loop.
//!
//! On every tick the poller asks the [`DocumentSource`] for everything new
//! since the stored marker, stores each document with its queue entry and
//! moves the marker forward once the whole cycle went through. A failed
//! cycle leaves the marker alone; the next tick simply tries again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::activity::{ActivityRefs, ActivitySink, Component, Severity};
use crate::config::PollerConfig;
use crate::db::document_repo::{self, IngestOutcome};
use crate::db::{poll_state_repo, Database};
use crate::document::extract_fields;
use crate::error::{EdigateError, Result};
use crate::provider::{DocumentSource, FetchCycle, ProviderError, MARKER_KEY};

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub created: usize,
    pub duplicates: usize,
    /// Documents whose content could not be decoded. They are skipped.
    pub malformed: usize,
}

pub struct Poller {
    db: Database,
    source: Arc<dyn DocumentSource>,
    sink: ActivitySink,
    config: PollerConfig,
    cycles: AtomicU64,
}

impl Poller {
    pub fn new(
        db: Database,
        source: Arc<dyn DocumentSource>,
        sink: ActivitySink,
        config: PollerConfig,
    ) -> Self {
        Self {
            db,
            source,
            sink,
            config,
            cycles: AtomicU64::new(0),
        }
    }

    /// Runs one cycle as of `now`. Every failure ends up in the activity
    /// log before it is returned.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("poll_cycle", cycle);
        let result = self.run_cycle(now).instrument(span).await;

        // Provider failures are recorded where they happen.
        let unrecorded = match &result {
            Err(EdigateError::Provider(_)) | Ok(_) => None,
            Err(e) => Some(format!("Poll cycle failed: {}", e)),
        };
        if let Some(message) = unrecorded {
            self.sink
                .record(Severity::Error, Component::Poller, message, ActivityRefs::none())
                .await;
        }
        result
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<PollReport> {
        let marker = poll_state_repo::get_marker(&self.db, MARKER_KEY)?;
        log::debug!("Starting poll cycle from marker {:?}", marker);

        let fetch = match self
            .source
            .fetch_new_documents(marker.as_deref(), now.date_naive())
            .await
        {
            Ok(fetch) => fetch,
            Err(e) => {
                self.report_failure(&e).await;
                return Err(e.into());
            }
        };

        let FetchCycle {
            mut documents,
            next_marker,
            receipts,
        } = fetch;

        let mut report = PollReport::default();
        while let Some(item) = documents.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    self.report_failure(&e).await;
                    return Err(e.into());
                }
            };
            report.fetched += 1;

            let fields = match extract_fields(&raw.provider_id, raw.doc_type, &raw.payload) {
                Ok(fields) => fields,
                Err(e) => {
                    report.malformed += 1;
                    self.sink
                        .record(
                            Severity::Error,
                            Component::Poller,
                            format!("Skipped {} {}: {}", raw.doc_type, raw.provider_id, e),
                            ActivityRefs::none(),
                        )
                        .await;
                    continue;
                }
            };

            match document_repo::ingest(&self.db, &raw, &fields, now)? {
                IngestOutcome::Created {
                    document_id,
                    queue_entry_id,
                } => {
                    report.created += 1;
                    self.sink
                        .record(
                            Severity::Info,
                            Component::Poller,
                            format!(
                                "Received {} {} ({})",
                                raw.doc_type,
                                fields.number(),
                                raw.provider_id
                            ),
                            ActivityRefs::entry(document_id, queue_entry_id),
                        )
                        .await;

                    if let Err(e) = receipts.mark_received(&raw).await {
                        self.sink
                            .record(
                                Severity::Warning,
                                Component::Provider,
                                format!("Could not mark {} as received: {}", raw.provider_id, e),
                                ActivityRefs::document(document_id),
                            )
                            .await;
                    }
                }
                IngestOutcome::Duplicate { .. } => report.duplicates += 1,
            }
        }

        poll_state_repo::set_marker(&self.db, MARKER_KEY, &next_marker, now)?;

        if report.fetched > 0 {
            log::info!(
                "Poll cycle finished: {} fetched, {} new, {} duplicate, {} malformed",
                report.fetched,
                report.created,
                report.duplicates,
                report.malformed
            );
        }
        Ok(report)
    }

    async fn report_failure(&self, error: &ProviderError) {
        let severity = if error.is_authentication() {
            Severity::Critical
        } else if error.is_retryable() {
            Severity::Warning
        } else {
            Severity::Error
        };
        self.sink
            .record(
                severity,
                Component::Provider,
                format!("Poll cycle failed: {}", error),
                ActivityRefs::none(),
            )
            .await;
    }

    /// Polls on the configured interval until `shutdown` flips to `true` or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Poller started, polling every {}s", self.config.interval_secs);

        let mut timer = tokio::time::interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {},
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.poll_once(Utc::now()).await {
                log::error!("Poll cycle aborted: {}", e);
            }
        }

        log::info!("Poller stopped");
    }
}
