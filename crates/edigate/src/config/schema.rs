use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::expand_home;

/// Startup configuration of the gateway, read once from `edigate.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Connection settings document, re-read on every operation.
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
}

fn default_settings_file() -> String {
    "~/.edigate/settings.yaml".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            poller: PollerConfig::default(),
            scheduler: SchedulerConfig::default(),
            settings_file: default_settings_file(),
        }
    }
}

impl GatewayConfig {
    pub fn settings_path(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.settings_file))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// The configured path, or `~/.edigate/data/edigate.db`.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.as_deref() {
            Some(path) => PathBuf::from(expand_home(path)),
            None => crate::db::default_database_path()
                .unwrap_or_else(|| PathBuf::from("edigate.db")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub interval_secs: u64,
    /// Upper bound on concurrent deliveries within one tick.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Due entries picked up per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_tick_interval() -> u64 {
    15
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> u32 {
    20
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_tick_interval(),
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
