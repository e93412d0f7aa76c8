pub mod activity;
pub mod config;
pub mod db;
pub mod delivery;
pub mod document;
pub mod error;
pub mod gateway;
pub mod poller;
pub mod provider;
pub mod render;
pub mod secrets;

pub use activity::{ActivitySink, Component, Escalator, NoopEscalator, Severity, TelegramEscalator};
pub use config::{
    load_config, ConnectionSettings, FileSettingsProvider, GatewayConfig, SettingsProvider,
    StaticSettingsProvider,
};
pub use db::Database;
pub use delivery::{DeliveryScheduler, DeliveryState, ErpClient};
pub use document::{Document, DocumentType, RawDocument};
pub use error::{ConfigError, EdigateError, Result};
pub use gateway::{Gateway, Services};
pub use poller::Poller;
pub use provider::{DocumentSource, ProviderClient};
pub use render::{render, RenderError, XmlTemplate};
pub use secrets::{resolve_secret, SecretError, SettingsEncryptor};
