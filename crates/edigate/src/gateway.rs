//! Wires the Poller and the Delivery Scheduler together.
//!
//! The two loops run as independent tokio tasks. They share the database
//! handle and nothing else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activity::{ActivitySink, Escalator};
use crate::config::{GatewayConfig, SettingsProvider};
use crate::db::Database;
use crate::delivery::{DeliveryScheduler, TickReport};
use crate::error::{EdigateError, Result};
use crate::poller::{PollReport, Poller};
use crate::provider::{DocumentSource, ProviderClient};

/// The two loops, ready to run.
pub struct Services {
    pub poller: Arc<Poller>,
    pub scheduler: Arc<DeliveryScheduler>,
    /// Shared by both loops.
    pub sink: ActivitySink,
}

/// Result of [`Services::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// `None` when the poll cycle failed; the failure is in the activity log.
    pub poll: Option<PollReport>,
    pub delivery: TickReport,
}

impl Services {
    /// Builds the services against the real provider.
    pub fn new(
        db: Database,
        settings: Arc<dyn SettingsProvider>,
        escalator: Arc<dyn Escalator>,
        config: &GatewayConfig,
    ) -> Self {
        let source = Arc::new(ProviderClient::new(settings.clone()));
        Self::with_source(db, source, settings, escalator, config)
    }

    pub fn with_source(
        db: Database,
        source: Arc<dyn DocumentSource>,
        settings: Arc<dyn SettingsProvider>,
        escalator: Arc<dyn Escalator>,
        config: &GatewayConfig,
    ) -> Self {
        let sink = ActivitySink::new(db.clone(), escalator);
        let poller = Poller::new(db.clone(), source, sink.clone(), config.poller.clone());
        let scheduler = DeliveryScheduler::new(db, settings, sink.clone(), config.scheduler.clone());
        Self {
            poller: Arc::new(poller),
            scheduler: Arc::new(scheduler),
            sink,
        }
    }

    /// One poll cycle followed by one delivery tick. A failed poll does
    /// not prevent the tick. Returns once pending escalations are sent.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let poll = self.poller.poll_once(now).await.ok();
        let delivery = self.scheduler.tick_at(now).await;
        self.sink.flush().await;
        Ok(CycleReport {
            poll,
            delivery: delivery?,
        })
    }
}

/// Handle to the running loops.
pub struct Gateway {
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    sink: ActivitySink,
}

impl Gateway {
    /// Spawns both loops on the current runtime.
    pub fn start(services: Services) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let poller = services.poller;
        let poller_rx = rx.clone();
        let poller = tokio::spawn(async move { poller.run(poller_rx).await });

        let scheduler = services.scheduler;
        let scheduler = tokio::spawn(async move { scheduler.run(rx).await });

        log::info!("Gateway started");
        Self {
            shutdown,
            poller,
            scheduler,
            sink: services.sink,
        }
    }

    /// Signals both loops and waits for them. Work already in progress,
    /// including escalations being sent, is allowed to finish.
    pub async fn shutdown(self) -> Result<()> {
        log::info!("Shutting down gateway");
        // Both receivers may already be gone if a task panicked.
        let _ = self.shutdown.send(true);

        let poller = self.poller.await;
        let scheduler = self.scheduler.await;
        poller.map_err(|e| EdigateError::Task(format!("poller: {}", e)))?;
        scheduler.map_err(|e| EdigateError::Task(format!("scheduler: {}", e)))?;
        self.sink.flush().await;

        log::info!("Gateway stopped");
        Ok(())
    }
}
