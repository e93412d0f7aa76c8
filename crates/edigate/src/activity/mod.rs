//! Activity/Notification Sink.
//!
//! Every component reports what happened through [`ActivitySink::record`].
//! Records are appended to the activity log and mirrored as tracing
//! events. Critical records are also escalated once, best-effort, on a
//! separate task so that a slow escalation channel never holds up the
//! caller.

pub mod escalation;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::db::{activity_repo, Database};

pub use escalation::{Alert, EscalationError, Escalator, NoopEscalator, TelegramEscalator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown severity '{}'", s))
    }
}

/// The part of the gateway an activity record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Poller,
    Provider,
    Scheduler,
    Renderer,
    Erp,
    Escalation,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::Poller,
        Component::Provider,
        Component::Scheduler,
        Component::Renderer,
        Component::Erp,
        Component::Escalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Poller => "poller",
            Component::Provider => "provider",
            Component::Scheduler => "scheduler",
            Component::Renderer => "renderer",
            Component::Erp => "erp",
            Component::Escalation => "escalation",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown component '{}'", s))
    }
}

/// Optional links from an activity record to what it is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRefs {
    pub document_id: Option<i64>,
    pub queue_entry_id: Option<i64>,
}

impl ActivityRefs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn document(document_id: i64) -> Self {
        Self {
            document_id: Some(document_id),
            queue_entry_id: None,
        }
    }

    pub fn entry(document_id: i64, queue_entry_id: i64) -> Self {
        Self {
            document_id: Some(document_id),
            queue_entry_id: Some(queue_entry_id),
        }
    }
}

/// Append-only activity log with escalation of critical records.
#[derive(Clone)]
pub struct ActivitySink {
    db: Database,
    escalator: Arc<dyn Escalator>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ActivitySink {
    pub fn new(db: Database, escalator: Arc<dyn Escalator>) -> Self {
        Self {
            db,
            escalator,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Records an activity. Never fails: a record that cannot be stored is
    /// still written to the process log, and escalation problems are
    /// recorded rather than returned.
    pub async fn record(
        &self,
        severity: Severity,
        component: Component,
        message: impl Into<String>,
        refs: ActivityRefs,
    ) {
        let message = message.into();
        self.append(severity, component, &message, refs);

        if severity == Severity::Critical {
            let alert = Alert {
                component,
                message,
                refs,
                at: Utc::now(),
            };
            let sink = self.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = sink.escalator.escalate(&alert).await {
                    sink.append(
                        Severity::Error,
                        Component::Escalation,
                        &format!("Escalation failed: {}", e),
                        alert.refs,
                    );
                }
            });
            match self.pending.lock() {
                Ok(mut pending) => {
                    pending.retain(|h| !h.is_finished());
                    pending.push(handle);
                }
                Err(_) => log::warn!("Escalation tracking unavailable; alert sent untracked"),
            }
        }
    }

    /// Waits for escalations that are still being sent.
    pub async fn flush(&self) {
        let pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for handle in pending {
            if let Err(e) = handle.await {
                log::error!("Escalation task failed: {}", e);
            }
        }
    }

    fn append(&self, severity: Severity, component: Component, message: &str, refs: ActivityRefs) {
        emit(severity, component, message, refs);
        if let Err(e) = activity_repo::insert(&self.db, severity, component, message, refs, Utc::now())
        {
            log::error!("Failed to store {} activity record: {}", component, e);
        }
    }
}

fn emit(severity: Severity, component: Component, message: &str, refs: ActivityRefs) {
    let document_id = refs.document_id;
    let queue_entry_id = refs.queue_entry_id;
    match severity {
        Severity::Info => {
            tracing::info!(component = %component, ?document_id, ?queue_entry_id, "{}", message)
        }
        Severity::Warning => {
            tracing::warn!(component = %component, ?document_id, ?queue_entry_id, "{}", message)
        }
        Severity::Error => {
            tracing::error!(component = %component, ?document_id, ?queue_entry_id, "{}", message)
        }
        Severity::Critical => tracing::error!(
            component = %component,
            ?document_id,
            ?queue_entry_id,
            critical = true,
            "{}",
            message
        ),
    }
}
