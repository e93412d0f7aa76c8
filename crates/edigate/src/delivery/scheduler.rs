//! Delivery Scheduler.
//!
//! Each tick re-queues stale in-flight entries, selects the due entries
//! and works through them with a bounded number of concurrent workers.
//! An entry is only ever touched by the worker that claimed it.
//!
//! The tick's time decides which entries are due. Claims and completions
//! are stamped with the time they actually happen, so backoff runs from
//! the failed attempt and a live claim never looks stale to another tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::backoff::next_attempt_at;
use super::erp::{ErpClient, ErpRequest};
use super::{DeliveryOutcome, DeliveryState};
use crate::activity::{ActivityRefs, ActivitySink, Component, Severity};
use crate::config::{ErpSettings, SchedulerConfig, SettingsProvider};
use crate::db::queue_repo::{self, FailureUpdate, QueueEntry};
use crate::db::{document_repo, template_repo, Database, DatabaseError};
use crate::error::Result;
use crate::render::{self, RenderError};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Stale in-flight entries re-queued or abandoned before the tick.
    pub recovered: usize,
    pub due: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub abandoned: usize,
    /// Entries another worker claimed first.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptResult {
    Delivered,
    Retrying,
    Abandoned,
    Skipped,
}

/// Why an attempt failed.
struct Failure {
    component: Component,
    error: String,
    http_status: Option<u16>,
    response_body: Option<String>,
    permanent: bool,
}

impl Failure {
    fn new(component: Component, error: impl Into<String>) -> Self {
        Self {
            component,
            error: error.into(),
            http_status: None,
            response_body: None,
            permanent: false,
        }
    }
}

/// Wall-clock time within one tick: the tick's time plus the time elapsed
/// since the tick started.
#[derive(Debug, Clone, Copy)]
struct TickClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl TickClock {
    fn start(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
            .unwrap_or(self.origin)
    }
}

pub struct DeliveryScheduler {
    db: Database,
    settings: Arc<dyn SettingsProvider>,
    erp: ErpClient,
    sink: ActivitySink,
    config: SchedulerConfig,
    ticks: AtomicU64,
}

impl DeliveryScheduler {
    pub fn new(
        db: Database,
        settings: Arc<dyn SettingsProvider>,
        sink: ActivitySink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            settings,
            erp: ErpClient::new(),
            sink,
            config,
            ticks: AtomicU64::new(0),
        }
    }

    /// Returns stale `in_flight` entries to the queue.
    ///
    /// An entry counts as stale once its attempt started longer ago than
    /// the ERP timeout plus a margin. Entries that already used every
    /// attempt are abandoned and escalated.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<usize> {
        let settings = self.erp_settings().await?;
        self.recover_with(&settings, now).await
    }

    async fn recover_with(&self, settings: &ErpSettings, now: DateTime<Utc>) -> Result<usize> {
        let stale_before = chrono::Duration::from_std(settings.stale_after())
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let recovered =
            queue_repo::recover_stale_in_flight(&self.db, now, stale_before, settings.max_attempts)?;

        for entry in &recovered {
            let refs = ActivityRefs::entry(entry.document_id, entry.id);
            if entry.abandoned {
                self.sink
                    .record(
                        Severity::Critical,
                        Component::Scheduler,
                        format!(
                            "Delivery abandoned: attempt {} was interrupted and the limit of {} attempts is reached",
                            entry.attempt_count, settings.max_attempts
                        ),
                        refs,
                    )
                    .await;
            } else {
                self.sink
                    .record(
                        Severity::Warning,
                        Component::Scheduler,
                        format!(
                            "Attempt {} was interrupted; entry re-queued",
                            entry.attempt_count
                        ),
                        refs,
                    )
                    .await;
            }
        }

        Ok(recovered.len())
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Runs one scheduling pass as of `now`. Attempts are stamped with `now`
    /// plus the time the pass has been running.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("delivery_tick", tick);
        self.run_tick(now).instrument(span).await
    }

    async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let clock = TickClock::start(now);
        let settings = self.erp_settings().await?;

        let recovered = self.recover_with(&settings, now).await?;
        let due = queue_repo::find_due(&self.db, now, self.config.batch_size)?;

        let report = Mutex::new(TickReport {
            recovered,
            due: due.len(),
            ..TickReport::default()
        });

        let settings = &settings;
        let report_ref = &report;
        stream::iter(due)
            .for_each_concurrent(self.config.workers.max(1), |entry| async move {
                let entry_id = entry.id;
                let result = match self.process(entry, settings, clock).await {
                    Ok(result) => result,
                    Err(e) => {
                        log::error!("Delivery attempt on entry {} failed to complete: {}", entry_id, e);
                        AttemptResult::Skipped
                    }
                };
                if let Ok(mut report) = report_ref.lock() {
                    match result {
                        AttemptResult::Delivered => report.delivered += 1,
                        AttemptResult::Retrying => report.retrying += 1,
                        AttemptResult::Abandoned => report.abandoned += 1,
                        AttemptResult::Skipped => report.skipped += 1,
                    }
                }
            })
            .await;

        let report = report.into_inner().unwrap_or_else(|e| e.into_inner());
        if report.due > 0 || report.recovered > 0 {
            log::info!(
                "Delivery tick finished: {} due, {} delivered, {} retrying, {} abandoned, {} recovered",
                report.due,
                report.delivered,
                report.retrying,
                report.abandoned,
                report.recovered
            );
        }
        Ok(report)
    }

    /// Runs ticks until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A tick that is already running is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Delivery scheduler started, ticking every {}s with {} worker(s)",
            self.config.interval_secs,
            self.config.workers
        );

        if let Err(e) = self.recover(Utc::now()).await {
            log::error!("Startup recovery failed: {}", e);
        }

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

            if let Err(e) = self.tick().await {
                log::error!("Delivery tick failed: {}", e);
            }
        }

        log::info!("Delivery scheduler stopped");
    }

    async fn erp_settings(&self) -> Result<ErpSettings> {
        match self.settings.current() {
            Ok(settings) => Ok(settings.erp),
            Err(e) => {
                self.sink
                    .record(
                        Severity::Error,
                        Component::Scheduler,
                        format!("Connection settings unavailable: {}", e),
                        ActivityRefs::none(),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    async fn process(
        &self,
        entry: QueueEntry,
        settings: &ErpSettings,
        clock: TickClock,
    ) -> std::result::Result<AttemptResult, DatabaseError> {
        let Some(token) = queue_repo::claim(&self.db, entry.id, clock.now())? else {
            log::debug!("Entry {} already claimed", entry.id);
            return Ok(AttemptResult::Skipped);
        };
        let refs = ActivityRefs::entry(entry.document_id, entry.id);

        let Some(document) = document_repo::find_by_id(&self.db, entry.document_id)? else {
            let failure = Failure::new(
                Component::Scheduler,
                format!("document {} not found", entry.document_id),
            );
            return self.fail(&entry, token, failure, settings, clock.now()).await;
        };
        let key = document.idempotency_key();

        let rendered = match template_repo::find_active(&self.db, document.doc_type)? {
            Some(template) => render::render(&document, &template).map(|xml| (xml, template)),
            None => Err(RenderError::NoActiveTemplate(document.doc_type)),
        };
        let (xml, template) = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                let failure = Failure::new(
                    Component::Renderer,
                    format!("Rendering {} failed: {}", key, e),
                );
                return self.fail(&entry, token, failure, settings, clock.now()).await;
            }
        };

        let request = ErpRequest {
            body: &xml,
            content_type: &template.content_type,
            doc_type: document.doc_type,
            idempotency_key: &key,
        };
        log::debug!("Posting {} to the ERP, attempt {}", key, token);

        let failure = match self.erp.deliver(settings, &request).await {
            Ok(DeliveryOutcome::Accepted { status, body }) => {
                let completed = queue_repo::complete_delivered(
                    &self.db,
                    entry.id,
                    token,
                    status,
                    &body,
                    clock.now(),
                )?;
                if !completed {
                    log::warn!("Delivery of entry {} finished after the claim went stale", entry.id);
                    return Ok(AttemptResult::Skipped);
                }
                self.sink
                    .record(
                        Severity::Info,
                        Component::Erp,
                        format!("Delivered {} on attempt {} (HTTP {})", key, token, status),
                        refs,
                    )
                    .await;
                return Ok(AttemptResult::Delivered);
            }
            Ok(DeliveryOutcome::Rejected {
                status,
                body,
                reason,
                permanent,
            }) => Failure {
                component: Component::Erp,
                error: format!("ERP rejected {}: {}", key, reason),
                http_status: Some(status),
                response_body: Some(body),
                permanent,
            },
            Err(e) => Failure::new(Component::Erp, format!("Delivering {} failed: {}", key, e)),
        };

        self.fail(&entry, token, failure, settings, clock.now()).await
    }

    /// Records a failed attempt. `failed_at` is when the attempt failed and
    /// is the base of the retry delay.
    async fn fail(
        &self,
        entry: &QueueEntry,
        token: u32,
        failure: Failure,
        settings: &ErpSettings,
        failed_at: DateTime<Utc>,
    ) -> std::result::Result<AttemptResult, DatabaseError> {
        let abandon = failure.permanent || token >= settings.max_attempts;
        let update = FailureUpdate {
            state: if abandon {
                DeliveryState::Abandoned
            } else {
                DeliveryState::AwaitingRetry
            },
            next_attempt_at: if abandon {
                failed_at
            } else {
                next_attempt_at(failed_at, token)
            },
            error: failure.error.clone(),
            http_status: failure.http_status,
            response_body: failure.response_body,
        };

        if !queue_repo::complete_failed(&self.db, entry.id, token, &update, failed_at)? {
            log::warn!("Failure of entry {} recorded after the claim went stale", entry.id);
            return Ok(AttemptResult::Skipped);
        }

        let refs = ActivityRefs::entry(entry.document_id, entry.id);
        if abandon {
            let why = if failure.permanent {
                "permanent rejection".to_string()
            } else {
                format!("{} attempts", token)
            };
            self.sink
                .record(
                    Severity::Critical,
                    Component::Scheduler,
                    format!("Delivery abandoned after {}: {}", why, failure.error),
                    refs,
                )
                .await;
            Ok(AttemptResult::Abandoned)
        } else {
            self.sink
                .record(
                    Severity::Error,
                    failure.component,
                    format!(
                        "Attempt {} of {}: {}; next attempt at {}",
                        token,
                        settings.max_attempts,
                        failure.error,
                        update.next_attempt_at.to_rfc3339()
                    ),
                    refs,
                )
                .await;
            Ok(AttemptResult::Retrying)
        }
    }
}
