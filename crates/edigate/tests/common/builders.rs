//! Builders for provider payloads and connection settings.

#![allow(dead_code)]

use base64::Engine;
use serde_json::{json, Value};

/// One order line as the provider sends it.
pub struct Line {
    pub ean: &'static str,
    pub name: &'static str,
    pub quantity: u32,
    pub price: f64,
}

/// Builds the provider's document body for an ORDER.
pub struct OrderBuilder {
    provider_id: String,
    number: String,
    date: String,
    lines: Vec<Line>,
}

impl OrderBuilder {
    pub fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            number: provider_id.to_string(),
            date: "2026-10-01".to_string(),
            lines: Vec::new(),
        }
    }

    pub fn number(mut self, number: &str) -> Self {
        self.number = number.to_string();
        self
    }

    pub fn line(mut self, ean: &'static str, name: &'static str, quantity: u32, price: f64) -> Self {
        self.lines.push(Line {
            ean,
            name,
            quantity,
            price,
        });
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// The decoded `content` document.
    pub fn content(&self) -> Value {
        let positions: Vec<Value> = self
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                json!({
                    "POSITIONNUMBER": i + 1,
                    "PRODUCT": line.ean,
                    "ORDEREDQUANTITY": line.quantity,
                    "ORDERPRICE": line.price,
                    "CHARACTERISTIC": { "DESCRIPTION": line.name }
                })
            })
            .collect();

        json!({
            "ORDER": {
                "NUMBER": self.number,
                "DATE": self.date,
                "DELIVERYDATE": "2026-10-05",
                "HEAD": {
                    "SUPPLIER": "4870000000017",
                    "BUYER": "4870000000024",
                    "SUPPLIER_INFO": { "полноеНазвание": "ТОО Поставщик" },
                    "BUYER_INFO": { "краткоеНазвание": "Магазин" },
                    "POSITION": positions
                }
            }
        })
    }

    /// The body returned by the provider's document endpoint.
    pub fn payload(&self) -> Value {
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.content().to_string());
        json!({
            "documentId": self.provider_id,
            "docType": "ORDER",
            "content": encoded
        })
    }
}

/// Builds a connection settings document.
pub struct SettingsBuilder {
    provider_url: String,
    erp_url: String,
    erp_timeout_secs: u64,
    max_attempts: u32,
    permanent_statuses: Vec<u16>,
    telegram: bool,
    mark_received: bool,
}

impl SettingsBuilder {
    pub fn new(provider_url: &str, erp_url: &str) -> Self {
        Self {
            provider_url: provider_url.to_string(),
            erp_url: erp_url.to_string(),
            erp_timeout_secs: 5,
            max_attempts: 5,
            permanent_statuses: Vec::new(),
            telegram: false,
            mark_received: true,
        }
    }

    pub fn erp_timeout_secs(mut self, secs: u64) -> Self {
        self.erp_timeout_secs = secs;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn permanent_status(mut self, status: u16) -> Self {
        self.permanent_statuses.push(status);
        self
    }

    /// Enables Telegram escalation. The harness points the escalator at
    /// its mock server.
    pub fn telegram(mut self) -> Self {
        self.telegram = true;
        self
    }

    pub fn mark_received(mut self, enabled: bool) -> Self {
        self.mark_received = enabled;
        self
    }

    pub fn build(&self) -> String {
        let statuses = self
            .permanent_statuses
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut yaml = format!(
            r#"provider:
  baseUrl: {}
  username: gateway
  password: secret
  pageSize: 50
  lookbackDays: 3
  timeoutSecs: 5
  markReceived: {}
erp:
  url: {}
  timeoutSecs: {}
  maxAttempts: {}
  permanentRejectionStatuses: [{}]
"#,
            self.provider_url,
            self.mark_received,
            self.erp_url,
            self.erp_timeout_secs,
            self.max_attempts,
            statuses
        );
        if self.telegram {
            yaml.push_str(
                "escalation:\n  telegram:\n    botToken: \"42:test\"\n    chatId: \"-100200\"\n",
            );
        }
        yaml
    }
}
