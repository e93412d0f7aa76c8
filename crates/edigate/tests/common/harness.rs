//! Test harness for isolated gateway runs.
//!
//! The `TestHarness` struct provides:
//! - A temporary directory holding the database and the settings document
//! - Mock servers standing in for the provider, the ERP and Telegram
//! - `Services` wired exactly as the daemon wires them

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edigate::config::{FileSettingsProvider, GatewayConfig, SettingsProvider};
use edigate::db::Database;
use edigate::gateway::Services;
use edigate::TelegramEscalator;

use super::builders::{OrderBuilder, SettingsBuilder};

const INBOX_PATH: &str = "/api/v1/documents/folders/inbox/docGroup/EDI/docTypes";
pub const PROVIDER_TOKEN: &str = "tok-1";

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub settings_path: PathBuf,
    pub provider: MockServer,
    pub erp: MockServer,
    pub telegram: MockServer,
}

impl TestHarness {
    /// Starts the mock servers and opens a fresh database. Settings point
    /// at the mocks with default values.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("edigate.db")).expect("Failed to open database");
        let settings_path = temp_dir.path().join("settings.yaml");

        let harness = Self {
            temp_dir,
            db,
            settings_path,
            provider: MockServer::start().await,
            erp: MockServer::start().await,
            telegram: MockServer::start().await,
        };
        harness.write_settings(&harness.settings());
        harness
    }

    /// Settings pointing at this harness's mock servers.
    pub fn settings(&self) -> SettingsBuilder {
        SettingsBuilder::new(&self.provider.uri(), &format!("{}/import", self.erp.uri()))
    }

    pub fn write_settings(&self, settings: &SettingsBuilder) {
        std::fs::write(&self.settings_path, settings.build()).expect("Failed to write settings");
    }

    pub fn settings_provider(&self) -> Arc<dyn SettingsProvider> {
        Arc::new(FileSettingsProvider::new(self.settings_path.clone()))
    }

    pub fn config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.scheduler.workers = 2;
        config
    }

    /// Services as the daemon builds them: real provider client, real ERP
    /// client and a Telegram escalator aimed at the mock.
    pub fn services(&self) -> Services {
        self.services_for(&self.config())
    }

    /// Like [`services`](Self::services) with a given number of delivery
    /// workers.
    pub fn services_with_workers(&self, workers: usize) -> Services {
        let mut config = self.config();
        config.scheduler.workers = workers;
        self.services_for(&config)
    }

    fn services_for(&self, config: &GatewayConfig) -> Services {
        let settings = self.settings_provider();
        let escalator = TelegramEscalator::with_api_base(settings.clone(), self.telegram.uri())
            .expect("Failed to build escalator");
        Services::new(self.db.clone(), settings, Arc::new(escalator), config)
    }

    /// Serves the given orders from the provider inbox. Every other type
    /// lists as empty.
    pub async fn serve_orders(&self, orders: &[OrderBuilder]) {
        Mock::given(method("POST"))
            .and(path("/api/v1/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": PROVIDER_TOKEN })))
            .mount(&self.provider)
            .await;

        let items: Vec<_> = orders
            .iter()
            .map(|o| json!({ "documentId": o.provider_id() }))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("{}/ORDER", INBOX_PATH)))
            .and(header("Authorization", PROVIDER_TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": items,
                "total": orders.len()
            })))
            .mount(&self.provider)
            .await;

        for order in orders {
            Mock::given(method("GET"))
                .and(path(format!("{}/ORDER/document/{}", INBOX_PATH, order.provider_id())))
                .respond_with(ResponseTemplate::new(200).set_body_json(order.payload()))
                .mount(&self.provider)
                .await;
        }

        Mock::given(method("GET"))
            .and(path_regex(format!(r"^{}/[A-Z]+$", INBOX_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&self.provider)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/api/v1/documents/[^/]+/receive$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.provider)
            .await;
    }

    /// Makes the ERP answer every POST with `response`.
    pub async fn erp_responds(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/import"))
            .respond_with(response)
            .mount(&self.erp)
            .await;
    }

    /// Accepts every Telegram message.
    pub async fn telegram_accepts(&self) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/bot[^/]+/sendMessage$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&self.telegram)
            .await;
    }

    /// Bodies of every request the ERP received, in order.
    pub async fn erp_bodies(&self) -> Vec<String> {
        self.erp
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    pub async fn telegram_messages(&self) -> usize {
        self.telegram
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}
